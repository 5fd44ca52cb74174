// =============================================================================
// Repository contracts
// =============================================================================
//
// Persistence is out of scope for this crate (SPEC_FULL.md §1/§6): no
// concrete database-backed implementation ships here. Each contract is a
// trait with `async fn` methods, held by the core as `Arc<dyn Trait + Send +
// Sync>`, so Monitor, Notifier, and the bridge/admin handlers depend only on
// the interface. `testutil` provides one in-memory implementation per trait,
// sufficient to exercise the engines in tests without a real database.
//
// Grounded on the original's repository layer
// (`app/database/repositories/{accounts,positions,rules,alerts,logs}.py`),
// translated from async Python/Supabase-RLS methods to async Rust traits.
// =============================================================================

pub mod testutil;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::types::{Account, Alert, AlertPayload, AlertReason, AlertStatus, LogStatus, Position, Rule};

#[async_trait]
pub trait AccountRepo: Send + Sync {
    async fn get_all(&self) -> Result<Vec<Account>, AppError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Account, AppError>;
    async fn user_owns_account(&self, account_id: Uuid, user_id: Uuid) -> Result<bool, AppError>;
}

#[async_trait]
pub trait PositionRepo: Send + Sync {
    async fn get_open_positions(&self, account_id: Uuid) -> Result<Vec<Position>, AppError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Position, AppError>;
    async fn get_user_position(&self, id: Uuid, user_id: Uuid) -> Result<Position, AppError>;

    /// Transitions every OPEN position with `expiration < today` to EXPIRED.
    /// Returns the number of positions transitioned (§4.12's daily cron job).
    async fn expire_due_positions(&self, today: chrono::NaiveDate) -> Result<usize, AppError>;
}

#[async_trait]
pub trait RuleRepo: Send + Sync {
    async fn get_active_rules(&self, account_id: Uuid) -> Result<Vec<Rule>, AppError>;
}

/// Data needed to create a new alert; `id`/`created_at`/`status` are assigned
/// by the repository, matching the original's insert-and-return shape.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub account_id: Uuid,
    pub option_position_id: Option<Uuid>,
    pub reason: AlertReason,
    pub payload: AlertPayload,
    /// Rule that produced this alert, when `reason == RollTrigger`. Not part
    /// of the public `Alert` shape; repositories keep it only to drive the
    /// per-(position,rule,day) dedup check.
    pub rule_id: Option<Uuid>,
}

#[async_trait]
pub trait AlertRepo: Send + Sync {
    async fn create(&self, data: NewAlert, as_user: Option<Uuid>) -> Result<Alert, AppError>;
    async fn get_pending_alerts(&self, limit: usize) -> Result<Vec<Alert>, AppError>;
    async fn get_by_account_id(
        &self,
        account_id: Uuid,
        status: Option<AlertStatus>,
        as_user: Option<Uuid>,
    ) -> Result<Vec<Alert>, AppError>;
    async fn update_status(
        &self,
        id: Uuid,
        status: AlertStatus,
        error: Option<String>,
        as_user: Option<Uuid>,
    ) -> Result<(), AppError>;
    async fn merge_payload(&self, id: Uuid, patch: AlertPayload) -> Result<Alert, AppError>;
    async fn retry_failed_alert(&self, id: Uuid) -> Result<Alert, AppError>;
    async fn cleanup_old_alerts(&self, days: i64) -> Result<usize, AppError>;

    /// True if a PENDING/PROCESSING `roll_trigger` alert already exists for
    /// this (position, rule) today, or an `expiration_warning` for this
    /// position today -- the dedup check from §4.6 step 3/5.
    async fn has_alert_today(
        &self,
        position_id: Uuid,
        rule_id: Option<Uuid>,
        reason: AlertReason,
        today: chrono::NaiveDate,
    ) -> Result<bool, AppError>;
}

#[async_trait]
pub trait LogRepo: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn create_log(
        &self,
        queue_id: Uuid,
        channel: crate::types::NotifyChannel,
        target: String,
        message: String,
        status: LogStatus,
        provider_msg_id: Option<String>,
        sent_at: DateTime<Utc>,
    ) -> Result<(), AppError>;
    async fn cleanup_old_logs(&self, days: i64) -> Result<usize, AppError>;
}

/// Tolerates the original's duck-typed payload shapes (stringified JSON,
/// lists-as-strings) when reading an `AlertPayload` back from a legacy
/// store. New alerts are always written through `AlertPayload` directly;
/// this only matters at the read boundary of a real repository
/// implementation, so it is provided here for that implementation to call.
pub fn parse_legacy_payload(raw: &serde_json::Value) -> AlertPayload {
    let mut payload = AlertPayload::default();

    let as_value = match raw {
        serde_json::Value::String(s) => {
            serde_json::from_str::<serde_json::Value>(s).unwrap_or(serde_json::Value::Null)
        }
        other => other.clone(),
    };

    let obj = match as_value.as_object() {
        Some(obj) => obj,
        None => return payload,
    };

    payload.ticker = obj.get("ticker").and_then(|v| v.as_str()).map(String::from);
    payload.strike = obj.get("strike").and_then(|v| v.as_f64());
    payload.dte = obj.get("dte").and_then(|v| v.as_i64());
    payload.underlying_price = obj.get("underlying_price").and_then(|v| v.as_f64());
    payload.current_premium = obj.get("current_premium").and_then(|v| v.as_f64());
    payload.avg_premium = obj.get("avg_premium").and_then(|v| v.as_f64());
    payload.delta = obj.get("delta").and_then(|v| v.as_f64());
    payload.delta_threshold = obj.get("delta_threshold").and_then(|v| v.as_f64());
    payload.moneyness = obj.get("moneyness").and_then(|v| v.as_f64());
    payload.otm_pct = obj.get("otm_pct").and_then(|v| v.as_f64());
    payload.pnl_premium = obj.get("pnl_premium").and_then(|v| v.as_f64());
    payload.error = obj.get("error").and_then(|v| v.as_str()).map(String::from);

    // Legacy channel lists sometimes arrive as a single comma-joined string
    // rather than a JSON array.
    payload.channels = match obj.get("channels") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(parse_channel)
            .collect(),
        Some(serde_json::Value::String(s)) => {
            s.split(',').filter_map(|p| parse_channel(p.trim())).collect()
        }
        _ => Vec::new(),
    };

    payload
}

fn parse_channel(raw: &str) -> Option<crate::types::NotifyChannel> {
    match raw.to_ascii_lowercase().as_str() {
        "whatsapp" => Some(crate::types::NotifyChannel::WhatsApp),
        "sms" => Some(crate::types::NotifyChannel::Sms),
        "email" => Some(crate::types::NotifyChannel::Email),
        _ => None,
    }
}
