// =============================================================================
// Bridge endpoints — MT5 EA ingress/egress (§4.10, §6)
// =============================================================================
//
// All routes require a valid `MT5_BRIDGE_TOKEN` bearer (checked by
// `BridgeAuth`) and are only mounted when `config.mt5_bridge_enabled` is
// true. Grounded on `MT5/routes.py`'s handler set: heartbeat upsert, quote
// and option-quote batch ingestion, pending-command polling, execution
// report reconciliation, and an aggregate health view.
// =============================================================================

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::auth::BridgeAuth;
use crate::app_state::AppState;
use crate::quote_cache::{RawOptionQuote, RawQuote};
use crate::symbol_mapper;
use crate::types::{CommandStatus, ExecutionReport, Heartbeat};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/mt5/heartbeat", post(heartbeat))
        .route("/api/mt5/quotes", post(quotes))
        .route("/api/mt5/option_quotes", post(option_quotes))
        .route("/api/mt5/commands", get(commands))
        .route("/api/mt5/execution_report", post(execution_report))
        .route("/api/mt5/health", get(health))
}

// =============================================================================
// Heartbeat
// =============================================================================

#[derive(Deserialize)]
struct HeartbeatRequest {
    terminal_id: String,
    account_number: String,
    broker: String,
    build: String,
    #[serde(default)]
    timestamp: Option<String>,
}

async fn heartbeat(
    _auth: BridgeAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    let ts = req
        .timestamp
        .as_deref()
        .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    state.quote_cache.upsert_heartbeat(Heartbeat {
        terminal_id: req.terminal_id.clone(),
        account_number: req.account_number,
        broker: req.broker,
        build: req.build,
        ts,
        updated_at: Utc::now(),
    });

    info!(terminal_id = %req.terminal_id, "bridge: heartbeat accepted");
    Json(serde_json::json!({ "status": "ok" }))
}

// =============================================================================
// Quotes
// =============================================================================

#[derive(Deserialize)]
struct QuoteRow {
    symbol: String,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
    #[serde(default)]
    last: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Deserialize)]
struct QuotesRequest {
    #[serde(default)]
    terminal_id: String,
    #[serde(default)]
    account_number: String,
    quotes: Vec<QuoteRow>,
}

async fn quotes(
    _auth: BridgeAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<QuotesRequest>,
) -> impl IntoResponse {
    let total = req.quotes.len();
    let raws = req
        .quotes
        .into_iter()
        .map(|q| RawQuote {
            symbol: q.symbol,
            bid: q.bid,
            ask: q.ask,
            last: q.last,
            volume: q.volume,
            ts: q.ts,
        })
        .collect();
    let accepted = state.quote_cache.upsert_quotes(raws);

    info!(
        terminal_id = %req.terminal_id,
        account_number = %req.account_number,
        accepted,
        total,
        "bridge: quotes ingested"
    );
    (StatusCode::ACCEPTED, Json(serde_json::json!({ "accepted": accepted })))
}

// =============================================================================
// Option quotes
// =============================================================================

#[derive(Deserialize)]
struct OptionQuoteRow {
    mt5_symbol: String,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
    #[serde(default)]
    last: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Deserialize)]
struct OptionQuotesRequest {
    #[serde(default)]
    terminal_id: String,
    #[serde(default)]
    account_number: String,
    option_quotes: Vec<OptionQuoteRow>,
}

#[derive(Serialize)]
struct MappingError {
    mt5_symbol: String,
    error: String,
}

async fn option_quotes(
    _auth: BridgeAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptionQuotesRequest>,
) -> impl IntoResponse {
    let total = req.option_quotes.len();
    let now = Utc::now();
    let mut raws = Vec::with_capacity(total);
    let mut mapping_errors = Vec::new();

    for row in req.option_quotes {
        match symbol_mapper::decode(&row.mt5_symbol, now.year(), now.month()) {
            Ok(decoded) => raws.push(RawOptionQuote {
                ticker: decoded.ticker,
                strike: decoded.strike,
                option_type: decoded.option_type,
                expiration: decoded.expiration_date,
                mt5_symbol: Some(row.mt5_symbol),
                bid: row.bid,
                ask: row.ask,
                last: row.last,
                volume: row.volume,
                ts: row.ts,
            }),
            Err(e) => {
                warn!(mt5_symbol = %row.mt5_symbol, error = %e, "bridge: option symbol decode failed");
                mapping_errors.push(MappingError {
                    mt5_symbol: row.mt5_symbol,
                    error: e.to_string(),
                });
            }
        }
    }

    let accepted = state.quote_cache.upsert_option_quotes(raws);

    info!(
        terminal_id = %req.terminal_id,
        account_number = %req.account_number,
        accepted,
        total,
        mapping_errors = mapping_errors.len(),
        "bridge: option quotes ingested"
    );

    let mut body = serde_json::json!({ "accepted": accepted, "total": total });
    if !mapping_errors.is_empty() {
        body["mapping_errors"] = serde_json::to_value(&mapping_errors).unwrap_or_default();
    }
    (StatusCode::ACCEPTED, Json(body))
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Deserialize)]
struct CommandsQuery {
    terminal_id: Option<String>,
    account_number: Option<String>,
}

async fn commands(
    _auth: BridgeAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<CommandsQuery>,
) -> impl IntoResponse {
    let pending = state.command_queue.pending_for(
        query.terminal_id.as_deref(),
        query.account_number.as_deref(),
        50,
    );
    Json(serde_json::json!({ "commands": pending }))
}

// =============================================================================
// Execution report
// =============================================================================

#[derive(Deserialize)]
struct ExecutionReportRequest {
    command_id: Uuid,
    status: CommandStatus,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

async fn execution_report(
    _auth: BridgeAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecutionReportRequest>,
) -> impl IntoResponse {
    state.command_queue.record_execution_report(ExecutionReport {
        command_id: req.command_id,
        status: req.status,
        order_id: req.order_id,
        details: req.details,
    });
    info!(command_id = %req.command_id, status = ?req.status, "bridge: execution report recorded");
    Json(serde_json::json!({ "status": "ok" }))
}

// =============================================================================
// Health
// =============================================================================

async fn health(_auth: BridgeAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let heartbeats = state.quote_cache.all_heartbeats();
    let freshest_heartbeat_age = heartbeats
        .iter()
        .map(|hb| (Utc::now() - hb.updated_at).num_seconds())
        .min();
    let heartbeat_fresh = freshest_heartbeat_age.map(|age| age <= 60).unwrap_or(false);

    let fresh_quotes = state
        .quote_cache
        .all_quotes(Some(state.config.mt5_bridge_quote_ttl_seconds))
        .len();

    let status = if !state.config.mt5_bridge_enabled {
        "unhealthy"
    } else if heartbeat_fresh && fresh_quotes > 0 {
        "ok"
    } else if heartbeat_fresh || fresh_quotes > 0 {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(serde_json::json!({
        "status": status,
        "bridge_enabled": state.config.mt5_bridge_enabled,
        "quote_ttl_seconds": state.config.mt5_bridge_quote_ttl_seconds,
        "heartbeat": {
            "terminals": heartbeats.len(),
            "freshest_age_seconds": freshest_heartbeat_age,
        },
        "quotes": {
            "fresh_count": fresh_quotes,
        },
        "timestamp": Utc::now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::AppStateDeps;
    use crate::config::{
        Config, HybridFallbackKind, MarketDataProviderKind, RuleDefaults, SessionWindowConfig,
    };
    use crate::repositories::testutil::{
        InMemoryAccountRepo, InMemoryAlertRepo, InMemoryLogRepo, InMemoryPositionRepo,
        InMemoryRuleRepo,
    };
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn config() -> Arc<Config> {
        Arc::new(Config {
            mt5_bridge_enabled: true,
            mt5_bridge_token: "bridge-secret".into(),
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

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(
            config(),
            AppStateDeps {
                accounts: Arc::new(InMemoryAccountRepo::new(vec![])),
                positions: Arc::new(InMemoryPositionRepo::new(vec![])),
                rules: Arc::new(InMemoryRuleRepo::new(vec![])),
                alerts: Arc::new(InMemoryAlertRepo::default()),
                logs: Arc::new(InMemoryLogRepo::default()),
            },
        ))
    }

    #[tokio::test]
    async fn rejects_missing_bearer_token() {
        let app = router().with_state(state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/mt5/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn accepts_quote_batch_with_valid_token() {
        let app = router().with_state(state());
        let body = serde_json::json!({
            "terminal_id": "MT5-01",
            "account_number": "4472007",
            "quotes": [{"symbol": "VALE3", "bid": 61.0, "ask": 61.2, "last": 61.1}]
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/mt5/quotes")
                    .header("Authorization", "Bearer bridge-secret")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn option_quote_decode_failure_reported_per_row_not_fatal() {
        let app = router().with_state(state());
        let body = serde_json::json!({
            "option_quotes": [{"mt5_symbol": "!!!"}]
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/mt5/option_quotes")
                    .header("Authorization", "Bearer bridge-secret")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["accepted"], 0);
        assert_eq!(json["mapping_errors"].as_array().unwrap().len(), 1);
    }
}
