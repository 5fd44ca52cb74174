// =============================================================================
// MT5-strict provider — reads only the bridge's quote cache, no fallback
// =============================================================================
//
// For accounts that require execution-grade quotes (no Black-Scholes
// approximation ever substituted silently), this provider answers only from
// `QuoteCache` and returns `MarketDataUnavailable` the moment a fresh quote
// isn't there. Distinct from `HybridProvider`, which always returns
// *something* by falling back.
//
// Grounded on the MT5-cache read path shared by `HybridMarketDataProvider`
// (`app/services/market_data/hybrid_provider.py`), here used without that
// provider's fallback branch.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::config::Config;
use crate::error::AppError;
use crate::quote_cache::QuoteCache;
use crate::types::OptionSide;

use super::{OptionQuoteResult, Provider, QuoteSource, UnderlyingQuote};

pub struct Mt5StrictProvider {
    quote_cache: Arc<QuoteCache>,
    ttl_seconds: i64,
}

impl Mt5StrictProvider {
    pub fn new(quote_cache: Arc<QuoteCache>, config: &Config) -> Self {
        Self {
            quote_cache,
            ttl_seconds: config.mt5_bridge_quote_ttl_seconds,
        }
    }
}

#[async_trait]
impl Provider for Mt5StrictProvider {
    async fn get_quote(&self, ticker: &str) -> Result<UnderlyingQuote, AppError> {
        let quote = self
            .quote_cache
            .get_quote(ticker, Some(self.ttl_seconds))
            .ok_or_else(|| AppError::MarketDataUnavailable(ticker.to_string()))?;

        let current_price = quote
            .reference_price()
            .ok_or_else(|| AppError::MarketDataUnavailable(ticker.to_string()))?;

        Ok(UnderlyingQuote {
            ticker: quote.symbol,
            current_price,
            bid: quote.bid,
            ask: quote.ask,
            volume: quote.volume,
            timestamp: quote.ts,
            source: QuoteSource::Mt5,
        })
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
        let quote = self
            .quote_cache
            .get_option_quote(&key, Some(self.ttl_seconds))
            .ok_or_else(|| AppError::MarketDataUnavailable(key.clone()))?;

        Ok(OptionQuoteResult {
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
        })
    }

    async fn health_check(&self) -> bool {
        // Healthy means at least one terminal has reported recently.
        !self.quote_cache.all_heartbeats().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote_cache::RawQuote;

    #[tokio::test]
    async fn missing_quote_is_market_data_unavailable() {
        let cache = Arc::new(QuoteCache::new(10));
        let provider = Mt5StrictProvider {
            quote_cache: cache,
            ttl_seconds: 10,
        };
        let result = provider.get_quote("VALE3").await;
        assert!(matches!(result, Err(AppError::MarketDataUnavailable(_))));
    }

    #[tokio::test]
    async fn fresh_quote_is_returned_with_mt5_source() {
        let cache = Arc::new(QuoteCache::new(10));
        cache.upsert_quotes(vec![RawQuote {
            symbol: "VALE3".into(),
            bid: Some(61.0),
            ask: Some(63.0),
            last: Some(62.0),
            volume: None,
            ts: None,
        }]);
        let provider = Mt5StrictProvider {
            quote_cache: cache,
            ttl_seconds: 10,
        };
        let quote = provider.get_quote("VALE3").await.unwrap();
        assert_eq!(quote.source, QuoteSource::Mt5);
        assert_eq!(quote.current_price, 62.0);
    }
}
