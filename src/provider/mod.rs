// =============================================================================
// Market data provider chain
// =============================================================================
//
// `Provider` is the trait every market-data backend implements: a mock
// generator for local development, an external-HTTP client (brapi.dev quote
// + Black-Scholes synthetic option pricing), a strict MT5 reader that only
// trusts the bridge's quote cache, and a hybrid provider that prefers MT5
// and falls back to one of the other two. `Monitor`, the roll calculator,
// and the bridge's read endpoints all depend on this trait, not on a
// concrete backend, so swapping `MARKET_DATA_PROVIDER` never touches them.
//
// Grounded on `MarketDataProvider` (`app/services/market_data/base_provider.py`)
// and the four concrete implementations in the same package.
// =============================================================================

pub mod external_http;
pub mod hybrid;
pub mod mock;
pub mod mt5_strict;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::black_scholes::Greeks;
use crate::config::Config;
use crate::error::AppError;
use crate::quote_cache::QuoteCache;
use crate::types::OptionSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSource {
    Mt5,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct UnderlyingQuote {
    pub ticker: String,
    pub current_price: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub source: QuoteSource,
}

#[derive(Debug, Clone)]
pub struct OptionQuoteResult {
    pub ticker: String,
    pub strike: f64,
    pub option_type: OptionSide,
    pub expiration: NaiveDate,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub premium: Option<f64>,
    pub volume: Option<f64>,
    pub mt5_symbol: Option<String>,
    pub greeks: Option<Greeks>,
    pub source: QuoteSource,
}

impl OptionQuoteResult {
    /// Mid of bid/ask when both sides are quoted, else premium/last.
    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) if b > 0.0 && a > 0.0 => Some((b + a) / 2.0),
            _ => self.premium.or(self.last),
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn get_quote(&self, ticker: &str) -> Result<UnderlyingQuote, AppError>;

    async fn get_option_quote(
        &self,
        ticker: &str,
        strike: f64,
        expiration: NaiveDate,
        option_type: OptionSide,
    ) -> Result<OptionQuoteResult, AppError>;

    async fn health_check(&self) -> bool;
}

/// Builds the configured provider chain. `Hybrid` wraps the quote cache with
/// an external or mock fallback depending on `MARKET_DATA_HYBRID_FALLBACK`.
pub fn from_config(
    config: &Config,
    quote_cache: std::sync::Arc<QuoteCache>,
) -> std::sync::Arc<dyn Provider> {
    use crate::config::{HybridFallbackKind, MarketDataProviderKind};

    match config.market_data_provider {
        MarketDataProviderKind::Mock => std::sync::Arc::new(mock::MockProvider::new()),
        MarketDataProviderKind::Brapi => {
            std::sync::Arc::new(external_http::ExternalHttpProvider::new(config))
        }
        MarketDataProviderKind::Mt5 => {
            std::sync::Arc::new(mt5_strict::Mt5StrictProvider::new(quote_cache, config))
        }
        MarketDataProviderKind::Hybrid => {
            let fallback: std::sync::Arc<dyn Provider> = match config.market_data_hybrid_fallback
            {
                HybridFallbackKind::Brapi => {
                    std::sync::Arc::new(external_http::ExternalHttpProvider::new(config))
                }
                HybridFallbackKind::Mock => std::sync::Arc::new(mock::MockProvider::new()),
            };
            std::sync::Arc::new(hybrid::HybridProvider::new(quote_cache, config, fallback))
        }
    }
}
