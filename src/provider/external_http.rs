// =============================================================================
// External HTTP provider — brapi.dev underlying quotes + Black-Scholes options
// =============================================================================
//
// brapi.dev publishes B3 underlying quotes but no options chain, so option
// premiums are synthesized via Black-Scholes off the fetched underlying
// price. A failed or malformed HTTP response surfaces as
// `AppError::ExternalService`/`MarketDataUnavailable` rather than panicking;
// callers (hybrid provider, monitor) decide whether to fall back further.
//
// Grounded on `BrapiMarketDataProvider` in
// `app/services/market_data/brapi_provider.py`.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::black_scholes;
use crate::config::Config;
use crate::error::AppError;
use crate::types::OptionSide;

use super::{OptionQuoteResult, Provider, QuoteSource, UnderlyingQuote};

pub struct ExternalHttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BrapiQuoteResponse {
    #[serde(default)]
    results: Vec<BrapiQuoteResult>,
}

#[derive(Debug, Deserialize)]
struct BrapiQuoteResult {
    symbol: Option<String>,
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    close: Option<f64>,
}

impl ExternalHttpProvider {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builder never fails with only a timeout set"),
            base_url: "https://brapi.dev/api".to_string(),
            api_key: config.market_data_api_key.clone(),
        }
    }

    async fn fetch_quote(&self, ticker: &str) -> Result<f64, AppError> {
        let url = format!("{}/quote/{}", self.base_url, ticker);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            AppError::external_service("brapi", format!("quote request failed: {e}"))
        })?;

        let payload: BrapiQuoteResponse = response.json().await.map_err(|e| {
            AppError::external_service("brapi", format!("quote response malformed: {e}"))
        })?;

        let result = payload
            .results
            .into_iter()
            .next()
            .ok_or_else(|| AppError::MarketDataUnavailable(ticker.to_string()))?;

        result
            .regular_market_price
            .or(result.close)
            .ok_or_else(|| AppError::MarketDataUnavailable(ticker.to_string()))
    }
}

#[async_trait]
impl Provider for ExternalHttpProvider {
    async fn get_quote(&self, ticker: &str) -> Result<UnderlyingQuote, AppError> {
        let ticker = ticker.to_ascii_uppercase();
        let current_price = self.fetch_quote(&ticker).await?;
        Ok(UnderlyingQuote {
            ticker,
            current_price,
            bid: None,
            ask: None,
            volume: None,
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
        let underlying = self.get_quote(ticker).await?;
        let dte = (expiration - Utc::now().date_naive()).num_days();
        let t = black_scholes::years_to_expiration(dte);
        let pricing = black_scholes::price(underlying.current_price, strike, t, option_type);

        let half_spread = (0.02 * pricing.premium).max(0.01);
        let bid = (pricing.premium - half_spread).max(0.0);
        let ask = pricing.premium + half_spread;

        Ok(OptionQuoteResult {
            ticker: ticker.to_ascii_uppercase(),
            strike,
            option_type,
            expiration,
            bid: Some(bid),
            ask: Some(ask),
            last: None,
            premium: Some(pricing.premium),
            volume: None,
            mt5_symbol: None,
            greeks: Some(pricing.greeks),
            source: QuoteSource::Fallback,
        })
    }

    async fn health_check(&self) -> bool {
        self.fetch_quote("BBAS3").await.is_ok()
    }
}
