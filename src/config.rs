// =============================================================================
// Configuration — environment-driven settings with typed defaults
// =============================================================================
//
// Every tunable named in SPEC_FULL.md §6 lives here. Unlike the teacher's
// `RuntimeConfig` (a JSON-file-backed, hot-reloadable struct), this config is
// loaded once at process start from the environment (optionally overlaid by
// a `.env` file via `dotenv`) and handed out as an `Arc<Config>` — the core
// has no hot-reload requirement, but every field still carries a typed
// default so a missing env var never panics.
//
// `Config::from_env()` returns `Result` so a malformed numeric env var
// surfaces as a `Validation` error at boot instead of a panic.
// =============================================================================

use std::env;
use std::str::FromStr;

use serde::Serialize;

use crate::error::AppError;

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            AppError::validation(format!("environment variable {key} has an invalid value"))
        }),
        Err(_) => Ok(default),
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketDataProviderKind {
    Mock,
    Brapi,
    Hybrid,
    Mt5,
}

impl FromStr for MarketDataProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "brapi" => Ok(Self::Brapi),
            "hybrid" => Ok(Self::Hybrid),
            "mt5" => Ok(Self::Mt5),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HybridFallbackKind {
    Brapi,
    Mock,
}

impl FromStr for HybridFallbackKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "brapi" => Ok(Self::Brapi),
            "mock" => Ok(Self::Mock),
            _ => Err(()),
        }
    }
}

/// Session-window configuration consumed by the session gate (§4.11).
#[derive(Debug, Clone, Serialize)]
pub struct SessionWindowConfig {
    pub timezone: String,
    pub open_hour: u32,
    pub open_minute: u32,
    pub close_hour: u32,
    pub close_minute: u32,
}

/// Rule-default configuration, used when a `Rule` omits an optional field.
#[derive(Debug, Clone, Serialize)]
pub struct RuleDefaults {
    pub delta_threshold: f64,
    pub dte_min: i64,
    pub dte_max: i64,
    pub min_volume: i64,
    pub max_spread: f64,
    pub min_oi: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    // --- Bridge ----------------------------------------------------------
    pub mt5_bridge_enabled: bool,
    /// Never serialized into a snapshot — see `redacted_summary`.
    #[serde(skip)]
    pub mt5_bridge_token: String,
    pub mt5_bridge_allowed_ips: Vec<String>,
    pub mt5_bridge_quote_ttl_seconds: i64,

    // --- Worker intervals --------------------------------------------------
    pub monitor_interval_minutes: u64,
    pub notifier_interval_seconds: u64,
    pub max_notification_retries: u32,
    pub notifier_batch_size: usize,

    // --- Market data ---------------------------------------------------------
    pub market_data_provider: MarketDataProviderKind,
    pub market_data_hybrid_fallback: HybridFallbackKind,
    pub market_data_api_key: Option<String>,
    pub market_data_refresh_interval: u64,

    // --- Session window ----------------------------------------------------
    pub session_window: SessionWindowConfig,

    // --- Rule defaults -------------------------------------------------------
    pub rule_defaults: RuleDefaults,

    // --- Channel client ------------------------------------------------------
    pub comm_api_url: String,
    #[serde(skip)]
    pub comm_api_key: String,
    pub comm_client_id: Option<String>,
    pub comm_email: Option<String>,
    #[serde(skip)]
    pub comm_password: Option<String>,

    // --- Ambient -----------------------------------------------------------
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    #[serde(skip)]
    pub admin_bearer_token: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let cors_origins = env_string("CORS_ORIGINS", "http://localhost:5173,http://localhost:3000")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let allowed_ips = env::var("MT5_BRIDGE_ALLOWED_IPS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let provider_raw = env_string("MARKET_DATA_PROVIDER", "mock");
        let market_data_provider = provider_raw.parse().unwrap_or(MarketDataProviderKind::Mock);

        let fallback_raw = env_string("MARKET_DATA_HYBRID_FALLBACK", "brapi");
        let market_data_hybrid_fallback = fallback_raw.parse().unwrap_or(HybridFallbackKind::Brapi);

        Ok(Self {
            mt5_bridge_enabled: env_or("MT5_BRIDGE_ENABLED", true)?,
            mt5_bridge_token: env_string("MT5_BRIDGE_TOKEN", ""),
            mt5_bridge_allowed_ips: allowed_ips,
            mt5_bridge_quote_ttl_seconds: env_or("MT5_BRIDGE_QUOTE_TTL_SECONDS", 10)?,

            monitor_interval_minutes: env_or("MONITOR_INTERVAL_MINUTES", 5)?,
            notifier_interval_seconds: env_or("NOTIFIER_INTERVAL_SECONDS", 30)?,
            max_notification_retries: env_or("MAX_NOTIFICATION_RETRIES", 3)?,
            notifier_batch_size: env_or("NOTIFIER_BATCH_SIZE", 100)?,

            market_data_provider,
            market_data_hybrid_fallback,
            market_data_api_key: env_opt_string("MARKET_DATA_API_KEY"),
            market_data_refresh_interval: env_or("MARKET_DATA_REFRESH_INTERVAL", 60)?,

            session_window: SessionWindowConfig {
                timezone: env_string("MARKET_SESSION_TZ", "America/Sao_Paulo"),
                open_hour: env_or("MARKET_OPEN_HOUR", 10)?,
                open_minute: env_or("MARKET_OPEN_MINUTE", 0)?,
                close_hour: env_or("MARKET_CLOSE_HOUR", 17)?,
                close_minute: env_or("MARKET_CLOSE_MINUTE", 0)?,
            },

            rule_defaults: RuleDefaults {
                delta_threshold: env_or("DEFAULT_DELTA_THRESHOLD", 0.60)?,
                dte_min: env_or("DEFAULT_DTE_MIN", 3)?,
                dte_max: env_or("DEFAULT_DTE_MAX", 5)?,
                min_volume: env_or("DEFAULT_MIN_VOLUME", 1000)?,
                max_spread: env_or("DEFAULT_MAX_SPREAD", 0.05)?,
                min_oi: env_or("DEFAULT_MIN_OI", 5000)?,
            },

            comm_api_url: env_string("COMM_API_URL", ""),
            comm_api_key: env_string("COMM_API_KEY", ""),
            comm_client_id: env_opt_string("COMM_CLIENT_ID"),
            comm_email: env_opt_string("COMM_EMAIL"),
            comm_password: env_opt_string("COMM_PASSWORD"),

            host: env_string("HOST", "0.0.0.0"),
            port: env_or("PORT", 8000)?,
            cors_origins,
            admin_bearer_token: env_string("ADMIN_BEARER_TOKEN", ""),
        })
    }

    /// A redacted view safe to expose over HTTP or log — secrets (`#[serde(skip)]`
    /// fields above) are simply absent, the same shape the teacher's
    /// `RuntimeConfigSummary` uses to strip secrets from `AppState` snapshots.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
