// =============================================================================
// Monitor engine — scans open positions against roll rules
// =============================================================================
//
// Grounded on `MonitorWorker.run()` (`app/workers/monitor_worker.py`): gate on
// the session window, enumerate accounts, then per-account fetch active
// rules and open positions, check each position for an expiration warning
// and against every active rule, deduping same-day alerts. Account-level
// fetch failures retry up to 3 times with a short fixed backoff before that
// account is skipped for the tick (`_get_all_accounts`'s retry loop).
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::provider::Provider;
use crate::repositories::{AccountRepo, AlertRepo, NewAlert, PositionRepo, RuleRepo};
use crate::rules::{self, LiveMarketData};
use crate::session_gate;
use crate::types::{Account, AlertPayload, AlertReason, Position, Rule};

pub struct MonitorEngine {
    config: Arc<Config>,
    accounts: Arc<dyn AccountRepo>,
    positions: Arc<dyn PositionRepo>,
    rules: Arc<dyn RuleRepo>,
    alerts: Arc<dyn AlertRepo>,
    provider: Arc<dyn Provider>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MonitorRunSummary {
    pub status: &'static str,
    pub accounts_processed: usize,
    pub positions_checked: usize,
    pub alerts_created: usize,
}

impl MonitorEngine {
    pub fn new(
        config: Arc<Config>,
        accounts: Arc<dyn AccountRepo>,
        positions: Arc<dyn PositionRepo>,
        rules: Arc<dyn RuleRepo>,
        alerts: Arc<dyn AlertRepo>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            config,
            accounts,
            positions,
            rules,
            alerts,
            provider,
        }
    }

    pub async fn run(&self) -> MonitorRunSummary {
        let now = Utc::now();
        if !session_gate::is_market_open(&self.config.session_window, now) {
            debug!("monitor: skipped, market closed");
            return MonitorRunSummary {
                status: "skipped",
                ..Default::default()
            };
        }

        let accounts = match self.fetch_accounts_with_retry().await {
            Some(accounts) => accounts,
            None => {
                warn!("monitor: giving up on account list for this tick");
                return MonitorRunSummary {
                    status: "failed",
                    ..Default::default()
                };
            }
        };

        let mut accounts_processed = 0;
        let mut positions_checked = 0;
        let mut alerts_created = 0;

        for account in &accounts {
            let active_rules = match self.rules.get_active_rules(account.id).await {
                Ok(rules) if !rules.is_empty() => rules,
                Ok(_) => {
                    debug!(account_id = %account.id, "monitor: no active rules");
                    continue;
                }
                Err(e) => {
                    warn!(account_id = %account.id, error = %e, "monitor: failed to fetch rules");
                    continue;
                }
            };

            let open_positions = match self.positions.get_open_positions(account.id).await {
                Ok(positions) if !positions.is_empty() => positions,
                Ok(_) => {
                    debug!(account_id = %account.id, "monitor: no open positions");
                    continue;
                }
                Err(e) => {
                    warn!(account_id = %account.id, error = %e, "monitor: failed to fetch positions");
                    continue;
                }
            };

            for position in &open_positions {
                positions_checked += 1;

                if self.check_expiration_warning(account, position).await {
                    alerts_created += 1;
                }

                for rule in &active_rules {
                    if self.check_position_against_rule(account, position, rule).await {
                        alerts_created += 1;
                    }
                }
            }

            accounts_processed += 1;
        }

        info!(
            accounts_processed,
            positions_checked, alerts_created, "monitor tick complete"
        );

        MonitorRunSummary {
            status: "ok",
            accounts_processed,
            positions_checked,
            alerts_created,
        }
    }

    async fn fetch_accounts_with_retry(&self) -> Option<Vec<Account>> {
        for attempt in 0..3 {
            match self.accounts.get_all().await {
                Ok(accounts) => return Some(accounts),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "monitor: failed to fetch accounts");
                    if attempt < 2 {
                        tokio::time::sleep(Duration::from_millis(1000 * (attempt as u64 + 1))).await;
                    }
                }
            }
        }
        None
    }

    async fn check_expiration_warning(&self, account: &Account, position: &Position) -> bool {
        let today = Utc::now().date_naive();
        let dte = position.dte(today);
        if !(0..=3).contains(&dte) {
            return false;
        }

        match self
            .alerts
            .has_alert_today(position.id, None, AlertReason::ExpirationWarning, today)
            .await
        {
            Ok(true) => return false,
            Ok(false) => {}
            Err(e) => {
                warn!(position_id = %position.id, error = %e, "monitor: dedup check failed");
                return false;
            }
        }

        let payload = AlertPayload {
            ticker: Some(position.ticker.clone()),
            side: Some(position.side),
            strike: Some(position.strike),
            expiration: Some(position.expiration),
            dte: Some(dte),
            ..Default::default()
        };

        let result = self
            .alerts
            .create(
                NewAlert {
                    account_id: account.id,
                    option_position_id: Some(position.id),
                    reason: AlertReason::ExpirationWarning,
                    payload,
                    rule_id: None,
                },
                Some(account.user_id),
            )
            .await;

        match result {
            Ok(_) => {
                info!(position_id = %position.id, dte, "created expiration warning alert");
                true
            }
            Err(e) => {
                warn!(position_id = %position.id, error = %e, "monitor: failed to create expiration alert");
                false
            }
        }
    }

    async fn check_position_against_rule(
        &self,
        account: &Account,
        position: &Position,
        rule: &Rule,
    ) -> bool {
        let live = self.gather_live_data(position).await;
        let today = Utc::now().date_naive();

        if !rules::evaluate(rule, position, today, live.clone()) {
            return false;
        }

        match self
            .alerts
            .has_alert_today(position.id, Some(rule.id), AlertReason::RollTrigger, today)
            .await
        {
            Ok(true) => return false,
            Ok(false) => {}
            Err(e) => {
                warn!(position_id = %position.id, rule_id = %rule.id, error = %e, "monitor: dedup check failed");
                return false;
            }
        }

        let payload = AlertPayload {
            ticker: Some(position.ticker.clone()),
            side: Some(position.side),
            strike: Some(position.strike),
            expiration: Some(position.expiration),
            dte: Some(position.dte(today)),
            underlying_price: live.underlying_price,
            current_premium: live.current_premium,
            avg_premium: Some(position.avg_premium),
            delta: live.delta,
            delta_threshold: rule.delta_threshold,
            ..Default::default()
        };

        let result = self
            .alerts
            .create(
                NewAlert {
                    account_id: account.id,
                    option_position_id: Some(position.id),
                    reason: AlertReason::RollTrigger,
                    payload,
                    rule_id: Some(rule.id),
                },
                Some(account.user_id),
            )
            .await;

        match result {
            Ok(_) => {
                info!(
                    position_id = %position.id, rule_id = %rule.id,
                    premium = live.current_premium, price = live.underlying_price,
                    "created roll trigger alert"
                );
                true
            }
            Err(e) => {
                warn!(position_id = %position.id, rule_id = %rule.id, error = %e, "monitor: failed to create roll alert");
                false
            }
        }
    }

    /// Best-effort fetch of live underlying price, option premium, and
    /// delta. Failures are logged and simply leave the field absent, per
    /// §4.6 ("failures fetching market data are logged but non-fatal").
    async fn gather_live_data(&self, position: &Position) -> LiveMarketData {
        let mut live = LiveMarketData::default();

        match self.provider.get_quote(&position.ticker).await {
            Ok(quote) => live.underlying_price = Some(quote.current_price),
            Err(e) => warn!(ticker = %position.ticker, error = %e, "monitor: failed to fetch underlying quote"),
        }

        match self
            .provider
            .get_option_quote(&position.ticker, position.strike, position.expiration, position.side)
            .await
        {
            Ok(option) => {
                live.current_premium = option.mid();
                live.delta = option.greeks.map(|g| g.delta);
            }
            Err(e) => warn!(ticker = %position.ticker, error = %e, "monitor: failed to fetch option quote"),
        }

        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use crate::repositories::testutil::{
        InMemoryAccountRepo, InMemoryAlertRepo, InMemoryPositionRepo, InMemoryRuleRepo,
    };
    use crate::types::{NotifyChannel, OptionSide, PositionStatus};
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn config() -> Arc<Config> {
        Arc::new(Config {
            mt5_bridge_enabled: true,
            mt5_bridge_token: String::new(),
            mt5_bridge_allowed_ips: vec![],
            mt5_bridge_quote_ttl_seconds: 10,
            monitor_interval_minutes: 5,
            notifier_interval_seconds: 30,
            max_notification_retries: 3,
            notifier_batch_size: 100,
            market_data_provider: crate::config::MarketDataProviderKind::Mock,
            market_data_hybrid_fallback: crate::config::HybridFallbackKind::Mock,
            market_data_api_key: None,
            market_data_refresh_interval: 60,
            session_window: crate::config::SessionWindowConfig {
                timezone: "UTC".to_string(),
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
            comm_api_url: String::new(),
            comm_api_key: String::new(),
            comm_client_id: None,
            comm_email: None,
            comm_password: None,
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec![],
            admin_bearer_token: String::new(),
        })
    }

    fn account() -> Account {
        Account {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Test".into(),
            broker: "XP".into(),
            account_number: "1".into(),
            phone: None,
            email: None,
        }
    }

    fn position(account_id: Uuid, expiration_offset_days: i64) -> Position {
        Position {
            id: Uuid::new_v4(),
            account_id,
            asset_id: Uuid::new_v4(),
            ticker: "VALE3".into(),
            side: OptionSide::Call,
            strategy: "covered_call".into(),
            strike: 65.0,
            expiration: Utc::now().date_naive() + ChronoDuration::days(expiration_offset_days),
            quantity: 1,
            avg_premium: 2.0,
            status: PositionStatus::Open,
            notes: None,
        }
    }

    fn rule(account_id: Uuid) -> Rule {
        Rule {
            id: Uuid::new_v4(),
            account_id,
            delta_threshold: None,
            dte_min: 0,
            dte_max: 30,
            spread_threshold: None,
            price_to_strike_ratio: None,
            min_volume: None,
            max_spread: None,
            min_oi: None,
            target_otm_pct_low: 0.02,
            target_otm_pct_high: 0.08,
            premium_close_threshold: None,
            notify_channels: vec![NotifyChannel::WhatsApp],
            is_active: true,
        }
    }

    #[tokio::test]
    async fn creates_expiration_warning_for_near_dated_position() {
        let acc = account();
        let pos = position(acc.id, 2);
        let engine = MonitorEngine::new(
            config(),
            Arc::new(InMemoryAccountRepo::new(vec![acc.clone()])),
            Arc::new(InMemoryPositionRepo::new(vec![pos.clone()])),
            Arc::new(InMemoryRuleRepo::new(vec![])),
            Arc::new(InMemoryAlertRepo::default()),
            Arc::new(MockProvider::new()),
        );

        let summary = engine.run().await;
        assert_eq!(summary.status, "ok");
        assert_eq!(summary.positions_checked, 1);
        assert_eq!(summary.alerts_created, 1);
    }

    #[tokio::test]
    async fn does_not_double_alert_within_the_same_tick() {
        let acc = account();
        let pos = position(acc.id, 1);
        let alerts = Arc::new(InMemoryAlertRepo::default());
        let engine = MonitorEngine::new(
            config(),
            Arc::new(InMemoryAccountRepo::new(vec![acc.clone()])),
            Arc::new(InMemoryPositionRepo::new(vec![pos.clone()])),
            Arc::new(InMemoryRuleRepo::new(vec![])),
            alerts.clone(),
            Arc::new(MockProvider::new()),
        );

        engine.run().await;
        let second = engine.run().await;
        assert_eq!(second.alerts_created, 0);
    }

    #[tokio::test]
    async fn skips_entirely_when_market_is_closed() {
        let mut cfg = (*config()).clone();
        cfg.session_window.open_hour = 0;
        cfg.session_window.open_minute = 0;
        cfg.session_window.close_hour = 0;
        cfg.session_window.close_minute = 0;
        let acc = account();
        let pos = position(acc.id, 30);
        let engine = MonitorEngine::new(
            Arc::new(cfg),
            Arc::new(InMemoryAccountRepo::new(vec![acc])),
            Arc::new(InMemoryPositionRepo::new(vec![pos])),
            Arc::new(InMemoryRuleRepo::new(vec![])),
            Arc::new(InMemoryAlertRepo::default()),
            Arc::new(MockProvider::new()),
        );

        // UTC "now" almost certainly falls outside a 23:00-23:01 window.
        let summary = engine.run().await;
        assert_eq!(summary.status, "skipped");
    }

    #[tokio::test]
    async fn rule_scan_creates_roll_trigger_when_dte_in_band() {
        let acc = account();
        let pos = position(acc.id, 10);
        let r = rule(acc.id);
        let engine = MonitorEngine::new(
            config(),
            Arc::new(InMemoryAccountRepo::new(vec![acc.clone()])),
            Arc::new(InMemoryPositionRepo::new(vec![pos.clone()])),
            Arc::new(InMemoryRuleRepo::new(vec![r.clone()])),
            Arc::new(InMemoryAlertRepo::default()),
            Arc::new(MockProvider::new()),
        );

        let summary = engine.run().await;
        assert_eq!(summary.alerts_created, 1);
    }
}
