// =============================================================================
// Rule evaluation — pure predicate: does a position trigger a roll rule?
// =============================================================================
//
// Six-step evaluation, checked in order, any failing step short-circuits to
// `false`:
//   1. rule must be active
//   2. premium-close threshold overrides everything else (unconditional,
//      see SPEC_FULL.md §9 open-question decision)
//   3. DTE must be within [dte_min, dte_max]
//   4. delta, if both threshold and live delta are known, must meet |delta|
//   5. spread, if both threshold and live price are known, must meet it
//   6. otherwise triggered
//
// Grounded on `evaluate_rule_for_position` in
// `app/database/repositories/rules.py`. Unlike the original, this never
// touches a database or awaits anything: it's a pure function of a `Rule`,
// a `Position`, and a `LiveMarketData` snapshot the caller has already
// fetched, so a monitor tick can call it without I/O in the hot loop.
// =============================================================================

use chrono::NaiveDate;
use tracing::debug;

use crate::types::{Position, Rule};

/// Live market data available to a rule check at the time of evaluation.
/// Any field may be absent if the provider couldn't supply it this tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveMarketData {
    pub delta: Option<f64>,
    pub underlying_price: Option<f64>,
    pub current_premium: Option<f64>,
}

pub fn evaluate(rule: &Rule, position: &Position, today: NaiveDate, live: LiveMarketData) -> bool {
    if !rule.is_active {
        return false;
    }

    if let (Some(threshold), Some(premium)) = (rule.premium_close_threshold, live.current_premium)
    {
        if premium <= threshold {
            debug!(rule_id = %rule.id, position_id = %position.id, premium, threshold, "rule triggered by premium threshold");
            return true;
        }
    }

    let dte = position.dte(today);
    if dte < rule.dte_min {
        debug!(rule_id = %rule.id, dte, dte_min = rule.dte_min, "rule dte_min not met");
        return false;
    }
    if dte > rule.dte_max {
        debug!(rule_id = %rule.id, dte, dte_max = rule.dte_max, "rule dte_max exceeded");
        return false;
    }

    if let (Some(threshold), Some(delta)) = (rule.delta_threshold, live.delta) {
        if delta.abs() < threshold {
            debug!(rule_id = %rule.id, delta, threshold, "rule delta threshold not met");
            return false;
        }
    }

    if let (Some(threshold), Some(price)) = (rule.spread_threshold, live.underlying_price) {
        if position.strike > 0.0 {
            let spread_percent = (price - position.strike).abs() / position.strike * 100.0;
            if spread_percent < threshold {
                debug!(rule_id = %rule.id, spread_percent, threshold, "rule spread threshold not met");
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OptionSide, PositionStatus};
    use uuid::Uuid;

    fn base_rule() -> Rule {
        Rule {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            delta_threshold: None,
            dte_min: 3,
            dte_max: 5,
            spread_threshold: None,
            price_to_strike_ratio: None,
            min_volume: None,
            max_spread: None,
            min_oi: None,
            target_otm_pct_low: 0.0,
            target_otm_pct_high: 0.0,
            premium_close_threshold: None,
            notify_channels: vec![],
            is_active: true,
        }
    }

    fn base_position(expiration: NaiveDate) -> Position {
        Position {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            asset_id: Uuid::new_v4(),
            ticker: "VALE3".into(),
            side: OptionSide::Call,
            strategy: "covered_call".into(),
            strike: 60.0,
            expiration,
            quantity: 1,
            avg_premium: 2.0,
            status: PositionStatus::Open,
            notes: None,
        }
    }

    #[test]
    fn inactive_rule_never_triggers() {
        let mut rule = base_rule();
        rule.is_active = false;
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let position = base_position(today + chrono::Duration::days(4));
        assert!(!evaluate(&rule, &position, today, LiveMarketData::default()));
    }

    #[test]
    fn premium_threshold_overrides_dte_band() {
        let mut rule = base_rule();
        rule.premium_close_threshold = Some(0.10);
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        // Outside the DTE band entirely, but premium threshold is unconditional.
        let position = base_position(today + chrono::Duration::days(60));
        let live = LiveMarketData {
            current_premium: Some(0.05),
            ..Default::default()
        };
        assert!(evaluate(&rule, &position, today, live));
    }

    #[test]
    fn dte_outside_band_does_not_trigger() {
        let rule = base_rule();
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let position = base_position(today + chrono::Duration::days(30));
        assert!(!evaluate(&rule, &position, today, LiveMarketData::default()));
    }

    #[test]
    fn dte_within_band_with_no_other_thresholds_triggers() {
        let rule = base_rule();
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let position = base_position(today + chrono::Duration::days(4));
        assert!(evaluate(&rule, &position, today, LiveMarketData::default()));
    }

    #[test]
    fn delta_threshold_not_met_blocks_trigger() {
        let mut rule = base_rule();
        rule.delta_threshold = Some(0.60);
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let position = base_position(today + chrono::Duration::days(4));
        let live = LiveMarketData {
            delta: Some(0.30),
            ..Default::default()
        };
        assert!(!evaluate(&rule, &position, today, live));
    }

    #[test]
    fn delta_threshold_met_triggers() {
        let mut rule = base_rule();
        rule.delta_threshold = Some(0.60);
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let position = base_position(today + chrono::Duration::days(4));
        let live = LiveMarketData {
            delta: Some(-0.75),
            ..Default::default()
        };
        assert!(evaluate(&rule, &position, today, live));
    }

    #[test]
    fn spread_threshold_not_met_blocks_trigger() {
        let mut rule = base_rule();
        rule.spread_threshold = Some(10.0);
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let position = base_position(today + chrono::Duration::days(4));
        let live = LiveMarketData {
            underlying_price: Some(61.0), // ~1.7% from strike 60 -- below 10%
            ..Default::default()
        };
        assert!(!evaluate(&rule, &position, today, live));
    }

    #[test]
    fn missing_live_data_skips_that_threshold_rather_than_blocking() {
        let mut rule = base_rule();
        rule.delta_threshold = Some(0.60);
        rule.spread_threshold = Some(10.0);
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let position = base_position(today + chrono::Duration::days(4));
        // Neither delta nor price supplied this tick -- both thresholds are
        // skipped rather than treated as failing, matching the original's
        // `is not None` guards.
        assert!(evaluate(&rule, &position, today, LiveMarketData::default()));
    }
}
