// =============================================================================
// Mock provider — deterministic-ish synthetic quotes for local development
// =============================================================================
//
// Grounded on `MockMarketDataProvider` in
// `app/services/market_data/mock_provider.py`: a table of plausible B3
// closing prices, perturbed by a small random walk, with option premiums
// built from intrinsic + a simplified time-value term rather than real
// Black-Scholes (the mock provider predates the brapi/BS path and is kept
// intentionally cheap).
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rand::Rng;

use crate::error::AppError;
use crate::types::OptionSide;

use super::{OptionQuoteResult, Provider, QuoteSource, UnderlyingQuote};

pub struct MockProvider {
    base_prices: HashMap<&'static str, f64>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            base_prices: HashMap::from([
                ("PETR4", 28.50),
                ("VALE3", 65.80),
                ("BBAS3", 45.20),
                ("ITUB4", 32.40),
                ("B3SA3", 12.90),
                ("BBDC4", 15.60),
                ("WEGE3", 42.30),
                ("RENT3", 56.70),
                ("MGLU3", 4.20),
                ("LREN3", 18.40),
            ]),
        }
    }

    fn base_price(&self, ticker: &str) -> f64 {
        *self.base_prices.get(ticker).unwrap_or(&50.00)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_option(
    ticker: &str,
    strike: f64,
    expiration: NaiveDate,
    option_type: OptionSide,
    current_price: f64,
    dte: i64,
) -> OptionQuoteResult {
    let mut rng = rand::thread_rng();

    let (intrinsic, otm_pct) = match option_type {
        OptionSide::Call => (
            (current_price - strike).max(0.0),
            (strike - current_price) / current_price,
        ),
        OptionSide::Put => (
            (strike - current_price).max(0.0),
            (current_price - strike) / current_price,
        ),
    };

    let mut time_value = current_price * 0.02 * (dte as f64 / 30.0) * 0.3;
    if intrinsic == 0.0 {
        time_value *= 1.0 - otm_pct.abs();
    }

    let premium = (intrinsic + time_value).max(0.01);

    let delta = match option_type {
        OptionSide::Call => {
            if (strike - current_price).abs() < 1.0 {
                0.50
            } else if current_price > strike {
                0.70
            } else {
                0.30
            }
        }
        OptionSide::Put => {
            if (strike - current_price).abs() < 1.0 {
                -0.50
            } else if current_price < strike {
                -0.70
            } else {
                -0.30
            }
        }
    };

    let spread = (premium * 0.02).max(0.02);
    let bid = premium - spread / 2.0;
    let ask = premium + spread / 2.0;

    OptionQuoteResult {
        ticker: ticker.to_string(),
        strike,
        option_type,
        expiration,
        bid: Some(bid),
        ask: Some(ask),
        last: None,
        premium: Some(premium),
        volume: Some(rng.gen_range(100..10_000) as f64),
        mt5_symbol: None,
        greeks: Some(crate::black_scholes::Greeks {
            delta,
            gamma: 0.05 * (30.0 / dte.max(1) as f64),
            theta: -premium * 0.05,
            vega: premium * 0.10,
            rho: if matches!(option_type, OptionSide::Call) {
                premium * 0.01
            } else {
                -premium * 0.01
            },
        }),
        source: QuoteSource::Fallback,
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn get_quote(&self, ticker: &str) -> Result<UnderlyingQuote, AppError> {
        let ticker = ticker.to_ascii_uppercase();
        let base = self.base_price(&ticker);
        let mut rng = rand::thread_rng();

        let variation: f64 = rng.gen_range(-0.02..0.02);
        let current_price = base * (1.0 + variation);
        let spread_pct: f64 = rng.gen_range(0.001..0.003);

        Ok(UnderlyingQuote {
            ticker,
            current_price,
            bid: Some(current_price * (1.0 - spread_pct / 2.0)),
            ask: Some(current_price * (1.0 + spread_pct / 2.0)),
            volume: Some(rng.gen_range(500_000..5_000_000) as f64),
            timestamp: Utc::now(),
            source: QuoteSource::Fallback,
        })
    }

    async fn get_option_quote(
        &self,
        ticker: &str,
        strike: f64,
        expiration: NaiveDate,
        option_type: OptionSide,
    ) -> Result<OptionQuoteResult, AppError> {
        let quote = self.get_quote(ticker).await?;
        let dte = (expiration - Utc::now().date_naive()).num_days();
        Ok(generate_option(
            ticker,
            strike,
            expiration,
            option_type,
            quote.current_price,
            dte,
        ))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_ticker_uses_default_base_price() {
        let provider = MockProvider::new();
        let quote = provider.get_quote("ZZZZ9").await.unwrap();
        // Default base is 50.00, +-2% variation.
        assert!(quote.current_price > 48.0 && quote.current_price < 52.0);
    }

    #[tokio::test]
    async fn known_ticker_uses_its_table_price() {
        let provider = MockProvider::new();
        let quote = provider.get_quote("VALE3").await.unwrap();
        assert!(quote.current_price > 64.0 && quote.current_price < 68.0);
    }

    #[tokio::test]
    async fn option_quote_premium_is_never_negative() {
        let provider = MockProvider::new();
        let expiration = Utc::now().date_naive() + chrono::Duration::days(30);
        let quote = provider
            .get_option_quote("VALE3", 65.0, expiration, OptionSide::Call)
            .await
            .unwrap();
        assert!(quote.premium.unwrap() >= 0.01);
        assert!(quote.mid().is_some());
    }

    #[tokio::test]
    async fn health_check_is_always_true() {
        assert!(MockProvider::new().health_check().await);
    }
}
