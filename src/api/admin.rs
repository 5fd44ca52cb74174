// =============================================================================
// Administrative surface — scheduler control + alert retry (§4.17, §6)
// =============================================================================
//
// New relative to spec.md's bridge-only interface list: the natural home for
// the Scheduler operations named in §4.12 (pause/resume/status/trigger), the
// Notifier manual retry named in §4.7, and the roll-preview lookup named in
// the roll calculator's own header (§4.5) — none of which spec.md gives an
// explicit transport. Gated by `ADMIN_BEARER_TOKEN` via `AdminAuth`, the same
// constant-time-compared-bearer pattern as the bridge surface but a distinct
// token, grounded on the teacher's `AuthBearer`-gated route group split in
// `api/rest.rs`.
// =============================================================================

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::api::auth::AdminAuth;
use crate::app_state::AppState;
use crate::error::AppError;
use crate::repositories::{AlertRepo, PositionRepo, RuleRepo};
use crate::roll_calculator;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/admin/scheduler", get(scheduler_status))
        .route("/api/admin/scheduler/:job/pause", post(scheduler_pause))
        .route("/api/admin/scheduler/:job/resume", post(scheduler_resume))
        .route("/api/admin/scheduler/:job/trigger", post(scheduler_trigger))
        .route("/api/admin/alerts/:id/retry", post(retry_alert))
        .route("/api/admin/positions/:id/roll_preview", get(roll_preview))
        .route("/api/health", get(health))
}

async fn scheduler_status(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "jobs": state.scheduler.all_status() }))
}

fn find_job<'a>(
    state: &'a AppState,
    name: &str,
) -> Result<&'a Arc<crate::scheduler::Job>, AppError> {
    state
        .scheduler
        .job(name)
        .ok_or_else(|| AppError::not_found("scheduler job", name))
}

async fn scheduler_pause(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(job): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    find_job(&state, &job)?.pause();
    info!(job = %job, "admin: job paused");
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn scheduler_resume(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(job): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    find_job(&state, &job)?.resume();
    info!(job = %job, "admin: job resumed");
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn scheduler_trigger(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(job): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    find_job(&state, &job)?.trigger();
    info!(job = %job, "admin: job manually triggered");
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn retry_alert(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.alerts.retry_failed_alert(id).await?;
    info!(alert_id = %id, "admin: alert queued for retry");
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[derive(serde::Deserialize)]
struct RollPreviewQuery {
    rule_id: Uuid,
}

/// Ranked roll suggestions plus current metrics for one open position,
/// against one of its account's active rules. Grounded on
/// `RollCalculator.preview`'s consumer, the handler named in
/// `roll_calculator.rs`'s header comment.
async fn roll_preview(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(position_id): Path<Uuid>,
    Query(query): Query<RollPreviewQuery>,
) -> Result<impl IntoResponse, AppError> {
    let position = state.positions.get_by_id(position_id).await?;

    let rule = state
        .rules
        .get_active_rules(position.account_id)
        .await?
        .into_iter()
        .find(|r| r.id == query.rule_id)
        .ok_or_else(|| AppError::not_found("rule", query.rule_id))?;

    let today = Utc::now().date_naive();
    let result = roll_calculator::preview(
        state.provider.as_ref(),
        &state.quote_cache,
        &position,
        &rule,
        today,
    )
    .await;

    Ok(Json(serde_json::json!({
        "metrics": {
            "dte": result.metrics.dte,
            "otm_pct": result.metrics.otm_pct,
            "is_itm": result.metrics.is_itm,
            "current_premium": result.metrics.current_premium,
            "pnl": result.metrics.pnl,
            "current_price": result.metrics.current_price,
        },
        "suggestions": result.suggestions.iter().map(|s| serde_json::json!({
            "strike": s.strike,
            "expiration": s.expiration,
            "dte": s.dte,
            "otm_pct": s.otm_pct,
            "premium": s.premium,
            "net_credit": s.net_credit,
            "spread": s.spread,
            "volume": s.volume,
            "score": s.score,
        })).collect::<Vec<_>>(),
    })))
}

// =============================================================================
// Public liveness (distinct from the bridge's MT5-specific health)
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
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
    use axum::http::{Request, StatusCode};
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
            admin_bearer_token: "admin-secret".into(),
        })
    }

    fn state() -> Arc<AppState> {
        state_with(vec![], vec![])
    }

    fn state_with(
        positions: Vec<crate::types::Position>,
        rules: Vec<crate::types::Rule>,
    ) -> Arc<AppState> {
        Arc::new(AppState::new(
            config(),
            AppStateDeps {
                accounts: Arc::new(InMemoryAccountRepo::new(vec![])),
                positions: Arc::new(InMemoryPositionRepo::new(positions)),
                rules: Arc::new(InMemoryRuleRepo::new(rules)),
                alerts: Arc::new(InMemoryAlertRepo::default()),
                logs: Arc::new(InMemoryLogRepo::default()),
            },
        ))
    }

    #[tokio::test]
    async fn health_requires_no_auth() {
        let app = router().with_state(state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn scheduler_status_requires_admin_bearer() {
        let app = router().with_state(state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/scheduler")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn pause_unknown_job_is_not_found() {
        let app = router().with_state(state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/admin/scheduler/nonexistent/pause")
                    .header("Authorization", "Bearer admin-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn retry_alert_on_unknown_id_is_not_found() {
        let app = router().with_state(state());
        let id = Uuid::new_v4();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/admin/alerts/{id}/retry"))
                    .header("Authorization", "Bearer admin-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    fn test_rule(account_id: Uuid) -> crate::types::Rule {
        crate::types::Rule {
            id: Uuid::new_v4(),
            account_id,
            delta_threshold: None,
            dte_min: 21,
            dte_max: 45,
            spread_threshold: None,
            price_to_strike_ratio: None,
            min_volume: None,
            max_spread: None,
            min_oi: None,
            target_otm_pct_low: 0.03,
            target_otm_pct_high: 0.08,
            premium_close_threshold: None,
            notify_channels: vec![],
            is_active: true,
        }
    }

    fn test_position(account_id: Uuid) -> crate::types::Position {
        crate::types::Position {
            id: Uuid::new_v4(),
            account_id,
            asset_id: Uuid::new_v4(),
            ticker: "VALE3".into(),
            side: crate::types::OptionSide::Call,
            strategy: "covered_call".into(),
            strike: 65.0,
            expiration: Utc::now().date_naive() + chrono::Duration::days(30),
            quantity: 1,
            avg_premium: 2.0,
            status: crate::types::PositionStatus::Open,
            notes: None,
        }
    }

    #[tokio::test]
    async fn roll_preview_returns_metrics_and_suggestions() {
        let account_id = Uuid::new_v4();
        let position = test_position(account_id);
        let rule = test_rule(account_id);
        let app = router().with_state(state_with(vec![position.clone()], vec![rule.clone()]));

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!(
                        "/api/admin/positions/{}/roll_preview?rule_id={}",
                        position.id, rule.id
                    ))
                    .header("Authorization", "Bearer admin-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn roll_preview_on_unknown_rule_is_not_found() {
        let account_id = Uuid::new_v4();
        let position = test_position(account_id);
        let app = router().with_state(state_with(vec![position.clone()], vec![]));

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!(
                        "/api/admin/positions/{}/roll_preview?rule_id={}",
                        position.id,
                        Uuid::new_v4()
                    ))
                    .header("Authorization", "Bearer admin-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
