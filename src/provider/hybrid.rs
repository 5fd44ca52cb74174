// =============================================================================
// Hybrid provider — MT5 cache first, configurable fallback second
// =============================================================================
//
// Grounded on `HybridMarketDataProvider`
// (`app/services/market_data/hybrid_provider.py`): try the bridge's quote
// cache first (fresh, real, but only present while a terminal is reporting),
// and fall back to whichever provider `MARKET_DATA_HYBRID_FALLBACK` names.
// This is the default production provider -- it degrades gracefully rather
// than going dark the moment an MT5 terminal disconnects.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::quote_cache::QuoteCache;
use crate::types::OptionSide;

use super::{OptionQuoteResult, Provider, QuoteSource, UnderlyingQuote};

pub struct HybridProvider {
    quote_cache: Arc<QuoteCache>,
    ttl_seconds: i64,
    fallback: Arc<dyn Provider>,
}

impl HybridProvider {
    pub fn new(quote_cache: Arc<QuoteCache>, config: &Config, fallback: Arc<dyn Provider>) -> Self {
        Self {
            quote_cache,
            ttl_seconds: config.mt5_bridge_quote_ttl_seconds,
            fallback,
        }
    }
}

#[async_trait]
impl Provider for HybridProvider {
    async fn get_quote(&self, ticker: &str) -> Result<UnderlyingQuote, AppError> {
        if let Some(quote) = self.quote_cache.get_quote(ticker, Some(self.ttl_seconds)) {
            if let Some(current_price) = quote.reference_price() {
                return Ok(UnderlyingQuote {
                    ticker: quote.symbol,
                    current_price,
                    bid: quote.bid,
                    ask: quote.ask,
                    volume: quote.volume,
                    timestamp: quote.ts,
                    source: QuoteSource::Mt5,
                });
            }
        }

        warn!(ticker, "hybrid provider: MT5 cache miss, falling back");
        let mut result = self.fallback.get_quote(ticker).await?;
        result.source = QuoteSource::Fallback;
        Ok(result)
    }

    async fn get_option_quote(
        &self,
        ticker: &str,
        strike: f64,
        expiration: NaiveDate,
        option_type: OptionSide,
    ) -> Result<OptionQuoteResult, AppError> {
        let key = format!(
            "{}_{}_{}_{}",
            ticker.to_ascii_uppercase(),
            strike,
            option_type,
            expiration
        );
        if let Some(quote) = self
            .quote_cache
            .get_option_quote(&key, Some(self.ttl_seconds))
        {
            info!(ticker, strike, %option_type, %expiration, "option quote from MT5 cache");
            return Ok(OptionQuoteResult {
                ticker: quote.ticker,
                strike: quote.strike,
                option_type: quote.option_type,
                expiration: quote.expiration,
                bid: quote.bid,
                ask: quote.ask,
                last: quote.last,
                premium: None,
                volume: quote.volume,
                mt5_symbol: quote.mt5_symbol,
                greeks: None,
                source: QuoteSource::Mt5,
            });
        }

        info!(ticker, strike, %option_type, %expiration, "option quote from fallback provider");
        let mut result = self
            .fallback
            .get_option_quote(ticker, strike, expiration, option_type)
            .await?;
        result.source = QuoteSource::Fallback;
        Ok(result)
    }

    async fn health_check(&self) -> bool {
        self.fallback.health_check().await
    }
}
