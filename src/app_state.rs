// =============================================================================
// AppState — the process-wide aggregate shared by workers and HTTP handlers
// =============================================================================
//
// Grounded on the teacher's `app_state.rs`: a single `Arc`-wrapped struct
// built once in `main.rs` and cloned (cheaply, via `Arc`) into every spawned
// worker loop and into axum's router `with_state`. The teacher's version
// aggregates trading-domain engines behind `Arc`/`RwLock`; this one
// aggregates the quote cache, command queue, channel client, provider chain,
// the five repository trait objects, and the scheduler's job table — every
// piece Monitor, Notifier, the bridge handlers, and the admin surface need.
//
// Unlike the teacher, there is no hot-reloadable `RuntimeConfig` or
// dashboard snapshot here: `Config` is loaded once at boot (§4.15) and the
// administrative surface exposes only the scheduler/alert-retry operations
// named in §4.17, not a full state dashboard.
// =============================================================================

use std::sync::Arc;

use crate::channel_client::ChannelClient;
use crate::command_queue::CommandQueue;
use crate::config::Config;
use crate::provider::Provider;
use crate::quote_cache::QuoteCache;
use crate::repositories::{AccountRepo, AlertRepo, LogRepo, PositionRepo, RuleRepo};
use crate::scheduler::Scheduler;

pub struct AppState {
    pub config: Arc<Config>,
    pub quote_cache: Arc<QuoteCache>,
    pub command_queue: Arc<CommandQueue>,
    pub channel_client: Arc<ChannelClient>,
    pub provider: Arc<dyn Provider>,
    pub accounts: Arc<dyn AccountRepo>,
    pub positions: Arc<dyn PositionRepo>,
    pub rules: Arc<dyn RuleRepo>,
    pub alerts: Arc<dyn AlertRepo>,
    pub logs: Arc<dyn LogRepo>,
    pub scheduler: Arc<Scheduler>,
}

/// The pieces `main.rs` must supply beyond `Config` itself (repository
/// implementations — no concrete one ships in this crate, see §6). Keeping
/// these in their own struct lets `AppState::new` stay a plain aggregation
/// with no construction logic of its own, matching the teacher's
/// `AppState::new(config)` shape even though this domain's constructor
/// needs more than one argument.
pub struct AppStateDeps {
    pub accounts: Arc<dyn AccountRepo>,
    pub positions: Arc<dyn PositionRepo>,
    pub rules: Arc<dyn RuleRepo>,
    pub alerts: Arc<dyn AlertRepo>,
    pub logs: Arc<dyn LogRepo>,
}

impl AppState {
    pub fn new(config: Arc<Config>, deps: AppStateDeps) -> Self {
        let quote_cache = Arc::new(QuoteCache::new(config.mt5_bridge_quote_ttl_seconds));
        let provider = crate::provider::from_config(&config, quote_cache.clone());

        Self {
            channel_client: Arc::new(ChannelClient::new(&config)),
            command_queue: Arc::new(CommandQueue::new()),
            quote_cache,
            provider,
            accounts: deps.accounts,
            positions: deps.positions,
            rules: deps.rules,
            alerts: deps.alerts,
            logs: deps.logs,
            scheduler: Arc::new(Scheduler::new()),
            config,
        }
    }

    pub fn monitor_engine(&self) -> crate::monitor::MonitorEngine {
        crate::monitor::MonitorEngine::new(
            self.config.clone(),
            self.accounts.clone(),
            self.positions.clone(),
            self.rules.clone(),
            self.alerts.clone(),
            self.provider.clone(),
        )
    }

    pub fn notifier_engine(&self) -> crate::notifier::NotifierEngine {
        crate::notifier::NotifierEngine::new(
            self.config.clone(),
            self.accounts.clone(),
            self.positions.clone(),
            self.alerts.clone(),
            self.logs.clone(),
            self.provider.clone(),
            self.channel_client.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HybridFallbackKind, MarketDataProviderKind, RuleDefaults, SessionWindowConfig};
    use crate::repositories::testutil::{
        InMemoryAccountRepo, InMemoryAlertRepo, InMemoryLogRepo, InMemoryPositionRepo,
        InMemoryRuleRepo,
    };

    fn config() -> Arc<Config> {
        Arc::new(Config {
            mt5_bridge_enabled: true,
            mt5_bridge_token: "token".into(),
            mt5_bridge_allowed_ips: vec![],
            mt5_bridge_quote_ttl_seconds: 10,
            monitor_interval_minutes: 5,
            notifier_interval_seconds: 30,
            max_notification_retries: 2,
            notifier_batch_size: 100,
            market_data_provider: MarketDataProviderKind::Mock,
            market_data_hybrid_fallback: HybridFallbackKind::Mock,
            market_data_api_key: None,
            market_data_refresh_interval: 60,
            session_window: SessionWindowConfig {
                timezone: "UTC".into(),
                open_hour: 0,
                open_minute: 0,
                close_hour: 23,
                close_minute: 59,
            },
            rule_defaults: RuleDefaults {
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
            admin_bearer_token: "admin".into(),
        })
    }

    fn deps() -> AppStateDeps {
        AppStateDeps {
            accounts: Arc::new(InMemoryAccountRepo::new(vec![])),
            positions: Arc::new(InMemoryPositionRepo::new(vec![])),
            rules: Arc::new(InMemoryRuleRepo::new(vec![])),
            alerts: Arc::new(InMemoryAlertRepo::default()),
            logs: Arc::new(InMemoryLogRepo::default()),
        }
    }

    #[test]
    fn builds_engines_from_shared_state() {
        let state = AppState::new(config(), deps());
        let _monitor = state.monitor_engine();
        let _notifier = state.notifier_engine();
        assert_eq!(state.scheduler.all_status().len(), 4);
    }
}
