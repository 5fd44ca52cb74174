// =============================================================================
// Domain Types — Accounts, Positions, Rules, Alerts, Logs, Quotes, Commands
// =============================================================================
//
// These are the core data shapes the monitor/notifier engines, the provider
// chain, and the bridge endpoints all operate on. Persistence-backed types
// (Account, Position, Rule) are read through the repository traits in
// `crate::repositories`; the rest (Quote, OptionQuote, Heartbeat, Command)
// live only in the in-memory quote cache.
// =============================================================================

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Account / Position / Rule
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub broker: String,
    pub account_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionSide {
    Call,
    Put,
}

impl fmt::Display for OptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionSide::Call => write!(f, "CALL"),
            OptionSide::Put => write!(f, "PUT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub account_id: Uuid,
    pub asset_id: Uuid,
    /// Underlying ticker, denormalized onto the position for convenience
    /// (the Asset row itself is out of scope for this core).
    pub ticker: String,
    pub side: OptionSide,
    pub strategy: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub quantity: i64,
    pub avg_premium: f64,
    pub status: PositionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Position {
    /// Days-to-expiration relative to `today`. May be negative for expired
    /// positions that haven't yet been transitioned by the daily job.
    pub fn dte(&self, today: NaiveDate) -> i64 {
        (self.expiration - today).num_days()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyChannel {
    #[serde(rename = "whatsapp")]
    WhatsApp,
    #[serde(rename = "sms")]
    Sms,
    #[serde(rename = "email")]
    Email,
}

impl fmt::Display for NotifyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyChannel::WhatsApp => write!(f, "whatsapp"),
            NotifyChannel::Sms => write!(f, "sms"),
            NotifyChannel::Email => write!(f, "email"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub account_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_threshold: Option<f64>,
    pub dte_min: i64,
    pub dte_max: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_to_strike_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_volume: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_spread: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_oi: Option<i64>,
    pub target_otm_pct_low: f64,
    pub target_otm_pct_high: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium_close_threshold: Option<f64>,
    pub notify_channels: Vec<NotifyChannel>,
    pub is_active: bool,
}

// =============================================================================
// Alerts and Logs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertReason {
    RollTrigger,
    ExpirationWarning,
    DeltaThreshold,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

/// Contextual snapshot carried by an alert, one shape for every `reason`.
/// This replaces the duck-typed payload dict of the original implementation
/// (see SPEC_FULL.md §9) while keeping a tolerant legacy-shape parser at the
/// repository boundary (`parse_legacy_payload`, `crate::repositories`) for
/// payloads that predate this schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<OptionSide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strike: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dte: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underlying_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_premium: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_premium: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moneyness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otm_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_premium: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    /// Free-text suggestion surfaced in the roll-trigger message; set by the
    /// roll calculator when it has a concrete candidate to name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_hint: Option<String>,
    /// Operator-supplied override: when present, the notifier sends this
    /// verbatim instead of building a message from the rest of the payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<NotifyChannel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub account_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_position_id: Option<Uuid>,
    pub reason: AlertReason,
    pub payload: AlertPayload,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    pub id: Uuid,
    pub queue_id: Uuid,
    pub channel: NotifyChannel,
    pub target: String,
    pub message: String,
    pub status: LogStatus,
    pub sent_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_msg_id: Option<String>,
}

// =============================================================================
// Market data
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSource {
    Mt5,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    pub ts: DateTime<Utc>,
    pub source: QuoteSource,
}

impl Quote {
    /// Best available reference price: last, else mid of bid/ask, else
    /// whichever single side is present.
    pub fn reference_price(&self) -> Option<f64> {
        if let Some(last) = self.last {
            return Some(last);
        }
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    pub ticker: String,
    pub strike: f64,
    pub option_type: OptionSide,
    pub expiration: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mt5_symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    pub ts: DateTime<Utc>,
}

impl OptionQuote {
    pub fn key(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.ticker, self.strike, self.option_type, self.expiration
        )
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) if a > 0.0 || b > 0.0 => Some((b + a) / 2.0),
            _ => self.last,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub terminal_id: String,
    pub account_number: String,
    pub broker: String,
    pub build: String,
    pub ts: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    RollPosition,
    OpenPosition,
    ClosePosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandStatus {
    Pending,
    Dispatched,
    Filled,
    Rejected,
    Cancelled,
    Partial,
    Unknown,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Filled | CommandStatus::Rejected | CommandStatus::Cancelled
        )
    }

    pub fn is_dispatchable(self) -> bool {
        matches!(self, CommandStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionLeg {
    pub ticker: String,
    pub strike: f64,
    pub option_type: OptionSide,
    pub expiration: NaiveDate,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub command_id: Uuid,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub terminal_id: String,
    pub account_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_leg: Option<OptionLeg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_leg: Option<OptionLeg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<serde_json::Value>,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<ExecutionReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dte_counts_calendar_days() {
        let pos = Position {
            id: Uuid::nil(),
            account_id: Uuid::nil(),
            asset_id: Uuid::nil(),
            ticker: "VALE3".into(),
            side: OptionSide::Call,
            strategy: "covered_call".into(),
            strike: 100.0,
            expiration: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            quantity: 1,
            avg_premium: 2.0,
            status: PositionStatus::Open,
            notes: None,
        };
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        assert_eq!(pos.dte(today), 4);
    }

    #[test]
    fn quote_reference_price_prefers_last() {
        let q = Quote {
            symbol: "VALE3".into(),
            bid: Some(61.0),
            ask: Some(63.0),
            last: Some(62.5),
            volume: None,
            ts: Utc::now(),
            source: QuoteSource::Mt5,
        };
        assert_eq!(q.reference_price(), Some(62.5));
    }

    #[test]
    fn quote_reference_price_falls_back_to_mid() {
        let q = Quote {
            symbol: "VALE3".into(),
            bid: Some(61.0),
            ask: Some(63.0),
            last: None,
            volume: None,
            ts: Utc::now(),
            source: QuoteSource::Mt5,
        };
        assert_eq!(q.reference_price(), Some(62.0));
    }

    #[test]
    fn command_terminal_status() {
        assert!(CommandStatus::Filled.is_terminal());
        assert!(!CommandStatus::Partial.is_terminal());
        assert!(!CommandStatus::Pending.is_terminal());
    }
}
