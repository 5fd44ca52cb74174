// =============================================================================
// Roll calculator — ranked roll suggestions for an open position
// =============================================================================
//
// `generate_suggestions`/`position_metrics` are pure functions of a position,
// its rule, the current underlying price, a buyback quote for the leg being
// closed, and a pre-fetched option chain slice. `preview` is the I/O
// orchestration wrapper the `/api/rolls/{id}/preview` handler calls: it
// pulls the underlying quote and buyback leg from the provider/quote cache,
// assembles the chain slice, and falls back to synthesizing candidates from
// the provider when the cache has nothing for the target band.
//
// Grounded on `RollCalculator` in `app/services/roll_calculator.py`
// (`_generate_suggestions`, `_calculate_suggestion_score`,
// `_candidate_expirations_in_range`, `_calculate_position_metrics`, and
// `_synthesize_candidate` for the provider-fallback branch).
// =============================================================================

use chrono::{Datelike, NaiveDate};
use tracing::warn;

use crate::provider::Provider;
use crate::quote_cache::QuoteCache;
use crate::symbol_mapper::third_friday;
use crate::types::{OptionQuote, OptionSide, Position, Rule};

#[derive(Debug, Clone)]
pub struct RollSuggestion {
    pub strike: f64,
    pub expiration: NaiveDate,
    pub dte: i64,
    pub otm_pct: f64,
    pub premium: f64,
    pub net_credit: f64,
    pub spread: Option<f64>,
    pub volume: Option<f64>,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PositionMetrics {
    pub dte: i64,
    pub otm_pct: Option<f64>,
    pub is_itm: Option<bool>,
    pub current_premium: f64,
    pub pnl: f64,
    pub current_price: f64,
}

/// Third Fridays, walking forward up to 12 months from `today`, whose DTE
/// falls within `[dte_min, dte_max]`.
pub fn candidate_expirations_in_range(today: NaiveDate, dte_min: i64, dte_max: i64) -> Vec<NaiveDate> {
    let mut candidates = Vec::new();
    for month_offset in 0..12u32 {
        let total_months = (today.month0() as u32) + month_offset;
        let year = today.year() + (total_months / 12) as i32;
        let month = total_months % 12 + 1;
        let Some(expiration) = third_friday(year, month) else {
            continue;
        };
        let dte = (expiration - today).num_days();
        if dte >= dte_min && dte <= dte_max {
            candidates.push(expiration);
        }
    }
    candidates
}

fn suggestion_score(otm_pct: f64, net_credit: f64, dte: i64, rule: &Rule) -> f64 {
    let mut score = 0.0;

    if net_credit > 0.0 {
        score += (net_credit * 10.0).min(40.0);
    }

    let target_otm = (rule.target_otm_pct_low + rule.target_otm_pct_high) / 2.0;
    let otm_distance = (otm_pct - target_otm).abs();
    score += (30.0 - otm_distance * 300.0).max(0.0);

    let target_dte = (rule.dte_min + rule.dte_max) as f64 / 2.0;
    let dte_distance = (dte as f64 - target_dte).abs();
    score += (20.0 - dte_distance / 2.0).max(0.0);

    // Liquidity bonus; the original leaves this as a flat mock value pending
    // real open-interest data.
    score += 10.0;

    score
}

/// Target strike band for `position.side` around `current_price`, per the
/// rule's OTM targets. Shared by `generate_suggestions` and the provider
/// synthesis fallback so both pick the same band.
fn target_strike_band(position: &Position, rule: &Rule, current_price: f64) -> (f64, f64) {
    let (low, high) = match position.side {
        OptionSide::Call => (
            current_price * (1.0 + rule.target_otm_pct_low),
            current_price * (1.0 + rule.target_otm_pct_high),
        ),
        OptionSide::Put => (
            current_price * (1.0 - rule.target_otm_pct_high),
            current_price * (1.0 - rule.target_otm_pct_low),
        ),
    };
    (low.min(high), low.max(high))
}

/// Rounds to the nearest 0.50, per §4.5 step 6's synthesized-strike rule.
fn round_to_half(value: f64) -> f64 {
    (value * 2.0).round() / 2.0
}

/// Generates up to 5 ranked roll suggestions from a pre-fetched option chain
/// slice. `buyback_mid` is the mid-price to close the position's current
/// leg; suggestions outside the rule's OTM/DTE targets are filtered out.
pub fn generate_suggestions(
    position: &Position,
    rule: &Rule,
    current_price: f64,
    buyback_mid: f64,
    chain: &[OptionQuote],
    today: NaiveDate,
) -> Vec<RollSuggestion> {
    if current_price <= 0.0 {
        return Vec::new();
    }

    let (strike_low, strike_high) = target_strike_band(position, rule, current_price);

    let candidate_exps = candidate_expirations_in_range(today, rule.dte_min, rule.dte_max);
    if candidate_exps.is_empty() {
        return Vec::new();
    }

    let mut suggestions = Vec::new();
    for entry in chain {
        if entry.ticker != position.ticker {
            continue;
        }
        if entry.option_type != position.side {
            continue;
        }
        if !candidate_exps.contains(&entry.expiration) {
            continue;
        }
        if entry.strike <= 0.0 || !(strike_low..=strike_high).contains(&entry.strike) {
            continue;
        }
        let Some(mid) = entry.mid() else { continue };
        if mid <= 0.0 {
            continue;
        }

        let dte = (entry.expiration - today).num_days();
        if dte < rule.dte_min || dte > rule.dte_max {
            continue;
        }

        let otm_pct = (entry.strike - current_price).abs() / current_price;
        let net_credit = mid - buyback_mid;
        let spread = match (entry.bid, entry.ask) {
            (Some(b), Some(a)) if b > 0.0 && a > 0.0 => Some((a - b) / mid),
            _ => None,
        };

        let score = suggestion_score(otm_pct, net_credit, dte, rule);

        suggestions.push(RollSuggestion {
            strike: entry.strike,
            expiration: entry.expiration,
            dte,
            otm_pct: otm_pct * 100.0,
            premium: mid,
            net_credit,
            spread,
            volume: entry.volume,
            score,
        });
    }

    suggestions.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    suggestions.truncate(5);
    suggestions
}

pub fn position_metrics(position: &Position, current_price: f64, current_premium: f64, today: NaiveDate) -> PositionMetrics {
    let dte = position.dte(today);

    let otm_pct = (current_price > 0.0).then(|| {
        (position.strike - current_price).abs() / current_price * 100.0
    });

    let is_itm = (current_price > 0.0).then(|| match position.side {
        OptionSide::Call => current_price > position.strike,
        OptionSide::Put => current_price < position.strike,
    });

    let pnl = (position.avg_premium - current_premium) * position.quantity as f64 * 100.0;

    PositionMetrics {
        dte,
        otm_pct,
        is_itm,
        current_premium,
        pnl,
        current_price,
    }
}

#[derive(Debug, Clone)]
pub struct RollPreview {
    pub metrics: PositionMetrics,
    pub suggestions: Vec<RollSuggestion>,
}

/// Requests the provider for a single strike at the midpoint of the OTM
/// band, rounded to 0.50, for up to three candidate expirations. Used only
/// when the option-quote cache produced nothing for the band (§4.5 step 6).
async fn synthesize_candidates(
    provider: &dyn Provider,
    position: &Position,
    rule: &Rule,
    current_price: f64,
    buyback_mid: f64,
    candidate_exps: &[NaiveDate],
    today: NaiveDate,
) -> Vec<RollSuggestion> {
    let (strike_low, strike_high) = target_strike_band(position, rule, current_price);
    let strike = round_to_half((strike_low + strike_high) / 2.0);

    let mut suggestions = Vec::new();
    for expiration in candidate_exps.iter().take(3) {
        let quote = match provider
            .get_option_quote(&position.ticker, strike, *expiration, position.side)
            .await
        {
            Ok(quote) => quote,
            Err(e) => {
                warn!(
                    ticker = %position.ticker, strike, expiration = %expiration, error = %e,
                    "roll calculator: provider synthesis request failed"
                );
                continue;
            }
        };
        let Some(mid) = quote.mid() else { continue };
        if mid <= 0.0 {
            continue;
        }

        let dte = (*expiration - today).num_days();
        let otm_pct = (strike - current_price).abs() / current_price;
        let net_credit = mid - buyback_mid;
        let spread = match (quote.bid, quote.ask) {
            (Some(b), Some(a)) if b > 0.0 && a > 0.0 => Some((a - b) / mid),
            _ => None,
        };
        let score = suggestion_score(otm_pct, net_credit, dte, rule);

        suggestions.push(RollSuggestion {
            strike,
            expiration: *expiration,
            dte,
            otm_pct: otm_pct * 100.0,
            premium: mid,
            net_credit,
            spread,
            volume: quote.volume,
            score,
        });
    }

    suggestions.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    suggestions
}

/// Orchestrates a full roll preview for `position`: fetches the underlying
/// price and the position's own leg (for `position_metrics`' PnL), then
/// either filters the cached option chain or, if the cache has nothing in
/// the target band, synthesizes candidates straight from the provider
/// (§4.5 step 6). Returns `current_metrics` only, with no suggestions, when
/// no fresh underlying price or buyback quote is available (§4.5 steps 1/3).
pub async fn preview(
    provider: &dyn Provider,
    quote_cache: &QuoteCache,
    position: &Position,
    rule: &Rule,
    today: NaiveDate,
) -> RollPreview {
    let underlying = provider.get_quote(&position.ticker).await.ok();
    let current_price = underlying.as_ref().map(|q| q.current_price).unwrap_or(0.0);

    let own_leg = provider
        .get_option_quote(&position.ticker, position.strike, position.expiration, position.side)
        .await
        .ok();
    let current_premium = own_leg
        .as_ref()
        .and_then(|q| q.mid())
        .unwrap_or(position.avg_premium);

    let metrics = position_metrics(position, current_price, current_premium, today);

    if current_price <= 0.0 {
        return RollPreview {
            metrics,
            suggestions: Vec::new(),
        };
    }

    let cache_key = format!(
        "{}_{}_{}_{}",
        position.ticker, position.strike, position.side, position.expiration
    );
    let buyback_mid = quote_cache
        .get_option_quote(&cache_key, None)
        .and_then(|q| q.mid())
        .or_else(|| own_leg.as_ref().and_then(|q| q.mid()));

    let Some(buyback_mid) = buyback_mid else {
        return RollPreview {
            metrics,
            suggestions: Vec::new(),
        };
    };

    let chain = quote_cache.all_option_quotes(None);
    let mut suggestions = generate_suggestions(position, rule, current_price, buyback_mid, &chain, today);

    if suggestions.is_empty() {
        let candidate_exps = candidate_expirations_in_range(today, rule.dte_min, rule.dte_max);
        suggestions = synthesize_candidates(
            provider,
            position,
            rule,
            current_price,
            buyback_mid,
            &candidate_exps,
            today,
        )
        .await;
    }

    RollPreview { metrics, suggestions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use crate::provider::mt5_strict::Mt5StrictProvider;
    use crate::types::QuoteSource;
    use std::sync::Arc;
    use uuid::Uuid;

    fn rule() -> Rule {
        Rule {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            delta_threshold: Some(0.60),
            dte_min: 21,
            dte_max: 45,
            spread_threshold: None,
            price_to_strike_ratio: None,
            min_volume: Some(1000),
            max_spread: Some(0.05),
            min_oi: Some(5000),
            target_otm_pct_low: 0.03,
            target_otm_pct_high: 0.08,
            premium_close_threshold: None,
            notify_channels: vec![],
            is_active: true,
        }
    }

    fn position(strike: f64, expiration: NaiveDate) -> Position {
        Position {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            asset_id: Uuid::new_v4(),
            ticker: "VALE3".into(),
            side: OptionSide::Call,
            strategy: "covered_call".into(),
            strike,
            expiration,
            quantity: 1,
            avg_premium: 2.0,
            status: crate::types::PositionStatus::Open,
            notes: None,
        }
    }

    fn quote(strike: f64, expiration: NaiveDate, bid: f64, ask: f64) -> OptionQuote {
        OptionQuote {
            ticker: "VALE3".into(),
            strike,
            option_type: OptionSide::Call,
            expiration,
            mt5_symbol: None,
            bid: Some(bid),
            ask: Some(ask),
            last: None,
            volume: Some(500.0),
            ts: chrono::Utc::now(),
        }
    }

    #[test]
    fn no_suggestions_when_price_unavailable() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let pos = position(60.0, today + chrono::Duration::days(4));
        let suggestions = generate_suggestions(&pos, &rule(), 0.0, 1.0, &[], today);
        assert!(suggestions.is_empty());
    }

    #[test]
    fn filters_chain_by_ticker_type_expiration_and_strike_band() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let pos = position(60.0, today + chrono::Duration::days(4));
        let candidate_exps = candidate_expirations_in_range(today, 21, 45);
        let target_exp = candidate_exps[0];
        let current_price = 60.0;

        let in_band_strike = current_price * 1.05; // within [3%, 8%] OTM band
        let chain = vec![
            quote(in_band_strike, target_exp, 2.0, 2.1),
            // Wrong ticker
            OptionQuote {
                ticker: "PETR4".into(),
                ..quote(in_band_strike, target_exp, 2.0, 2.1)
            },
            // Strike out of band
            quote(current_price * 1.50, target_exp, 1.0, 1.1),
        ];

        let suggestions = generate_suggestions(&pos, &rule(), current_price, 1.0, &chain, today);
        assert_eq!(suggestions.len(), 1);
        assert!((suggestions[0].strike - in_band_strike).abs() < 1e-6);
    }

    #[test]
    fn higher_net_credit_scores_higher() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let pos = position(60.0, today + chrono::Duration::days(4));
        let candidate_exps = candidate_expirations_in_range(today, 21, 45);
        let target_exp = candidate_exps[0];
        let current_price = 60.0;
        let strike = current_price * 1.05;

        let chain = vec![
            quote(strike, target_exp, 1.0, 1.1),   // low premium -> low net credit
            OptionQuote { last: None, ..quote(strike + 0.01, target_exp, 5.0, 5.2) }, // high premium
        ];

        let suggestions = generate_suggestions(&pos, &rule(), current_price, 0.5, &chain, today);
        assert_eq!(suggestions[0].net_credit, suggestions.iter().map(|s| s.net_credit).fold(f64::MIN, f64::max));
    }

    #[test]
    fn position_metrics_computes_pnl_and_itm() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let pos = position(60.0, today + chrono::Duration::days(4));
        let metrics = position_metrics(&pos, 65.0, 3.0, today);
        assert_eq!(metrics.dte, 4);
        assert_eq!(metrics.is_itm, Some(true)); // CALL, price > strike
        // (avg_premium - current_premium) * quantity * 100 = (2.0 - 3.0) * 1 * 100
        assert!((metrics.pnl - (-100.0)).abs() < 1e-6);
    }

    #[test]
    fn candidate_expirations_are_all_third_fridays_within_band() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let candidates = candidate_expirations_in_range(today, 21, 45);
        assert!(!candidates.is_empty());
        for c in &candidates {
            let dte = (*c - today).num_days();
            assert!((21..=45).contains(&dte));
        }
    }

    #[test]
    fn quotes_without_a_usable_mid_are_skipped() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let pos = position(60.0, today + chrono::Duration::days(4));
        let candidate_exps = candidate_expirations_in_range(today, 21, 45);
        let target_exp = candidate_exps[0];
        let current_price = 60.0;
        let strike = current_price * 1.05;

        let mut zero_quote = quote(strike, target_exp, 0.0, 0.0);
        zero_quote.last = None;
        let chain = vec![zero_quote];

        let suggestions = generate_suggestions(&pos, &rule(), current_price, 0.5, &chain, today);
        assert!(suggestions.is_empty());
    }

    #[tokio::test]
    async fn preview_falls_back_to_provider_synthesis_when_cache_is_empty() {
        let today = chrono::Utc::now().date_naive();
        let pos = position(65.0, today + chrono::Duration::days(30));
        let cache = QuoteCache::new(60);
        let provider = MockProvider::new();

        let result = preview(&provider, &cache, &pos, &rule(), today).await;

        assert!(!result.suggestions.is_empty());
        assert!(result.suggestions.len() <= 3);
        assert!(result.metrics.current_price > 0.0);
    }

    #[tokio::test]
    async fn preview_returns_metrics_only_when_underlying_price_unavailable() {
        let today = chrono::Utc::now().date_naive();
        let pos = position(65.0, today + chrono::Duration::days(30));
        let cache = Arc::new(QuoteCache::new(60));
        let provider = Mt5StrictProvider::new(cache.clone(), &test_config());

        let result = preview(&provider, &cache, &pos, &rule(), today).await;

        assert!(result.suggestions.is_empty());
        assert_eq!(result.metrics.current_price, 0.0);
    }

    fn test_config() -> crate::config::Config {
        crate::config::Config {
            mt5_bridge_enabled: true,
            mt5_bridge_token: String::new(),
            mt5_bridge_allowed_ips: vec![],
            mt5_bridge_quote_ttl_seconds: 60,
            monitor_interval_minutes: 5,
            notifier_interval_seconds: 30,
            max_notification_retries: 2,
            notifier_batch_size: 100,
            market_data_provider: crate::config::MarketDataProviderKind::Mt5,
            market_data_hybrid_fallback: crate::config::HybridFallbackKind::Mock,
            market_data_api_key: None,
            market_data_refresh_interval: 60,
            session_window: crate::config::SessionWindowConfig {
                timezone: "UTC".into(),
                open_hour: 0,
                open_minute: 0,
                close_hour: 23,
                close_minute: 59,
            },
            rule_defaults: crate::config::RuleDefaults {
                delta_threshold: 0.6,
                dte_min: 3,
                dte_max: 5,
                min_volume: 1000,
                max_spread: 0.05,
                min_oi: 5000,
            },
            comm_api_url: "http://localhost".into(),
            comm_api_key: "key".into(),
            comm_client_id: None,
            comm_email: None,
            comm_password: None,
            host: "0.0.0.0".into(),
            port: 8080,
            cors_origins: vec![],
            admin_bearer_token: String::new(),
        }
    }
}
