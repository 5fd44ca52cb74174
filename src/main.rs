// =============================================================================
// rollwatch — Main Entry Point
// =============================================================================
//
// Composition root, in the teacher's shape: parse config, build one
// `AppState`, spawn the worker loops (Monitor/Notifier on their interval,
// cleanup/expire-positions on their daily cron time) as separate tasks each
// owning a timer, build the axum router, serve, and await `ctrl_c` for
// shutdown. No concrete repository implementation ships in this crate
// (§1/§6) — until one is wired in, the in-memory `testutil` repositories
// stand in so the process boots and the bridge/admin surface is exercisable
// end to end.
// =============================================================================

mod api;
mod app_state;
mod black_scholes;
mod channel_client;
mod command_queue;
mod config;
mod error;
mod monitor;
mod notifier;
mod provider;
mod quote_cache;
mod repositories;
mod roll_calculator;
mod rules;
mod scheduler;
mod session_gate;
mod symbol_mapper;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, AppStateDeps};
use crate::config::Config;
use crate::repositories::testutil::{
    InMemoryAccountRepo, InMemoryAlertRepo, InMemoryLogRepo, InMemoryPositionRepo,
    InMemoryRuleRepo,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("rollwatch starting up");

    let config = Arc::new(Config::from_env()?);

    // ── 2. Build shared state ────────────────────────────────────────────
    // No concrete database-backed repository ships in this crate (§6); the
    // in-memory implementations stand in until one is wired in.
    let deps = AppStateDeps {
        accounts: Arc::new(InMemoryAccountRepo::new(vec![])),
        positions: Arc::new(InMemoryPositionRepo::new(vec![])),
        rules: Arc::new(InMemoryRuleRepo::new(vec![])),
        alerts: Arc::new(InMemoryAlertRepo::default()),
        logs: Arc::new(InMemoryLogRepo::default()),
    };
    let state = Arc::new(AppState::new(config.clone(), deps));

    info!(
        bridge_enabled = state.config.mt5_bridge_enabled,
        provider = ?state.config.market_data_provider,
        "configuration loaded"
    );

    // ── 3. Monitor loop (interval minutes) ───────────────────────────────
    {
        let state = state.clone();
        let job = state.scheduler.monitor.clone();
        let period = Duration::from_secs(state.config.monitor_interval_minutes * 60);
        tokio::spawn(async move {
            scheduler::run_interval_loop(job, period, move || {
                let state = state.clone();
                async move {
                    let summary = state.monitor_engine().run().await;
                    info!(status = summary.status, accounts = summary.accounts_processed, alerts = summary.alerts_created, "monitor tick complete");
                }
            })
            .await;
        });
    }

    // ── 4. Notifier loop (interval seconds) ──────────────────────────────
    {
        let state = state.clone();
        let job = state.scheduler.notifier.clone();
        let period = Duration::from_secs(state.config.notifier_interval_seconds);
        tokio::spawn(async move {
            scheduler::run_interval_loop(job, period, move || {
                let state = state.clone();
                async move {
                    let summary = state.notifier_engine().run().await;
                    info!(status = summary.status, total = summary.total, successful = summary.successful, failed = summary.failed, "notifier tick complete");
                }
            })
            .await;
        });
    }

    // ── 5. Cleanup job (cron 03:00 local) ────────────────────────────────
    {
        let state = state.clone();
        let job = state.scheduler.cleanup.clone();
        tokio::spawn(async move {
            scheduler::run_daily_loop(job, 3, 0, move || {
                let state = state.clone();
                async move {
                    match state.alerts.cleanup_old_alerts(30).await {
                        Ok(n) => info!(deleted = n, "cleanup: old alerts purged"),
                        Err(e) => warn!(error = %e, "cleanup: alert purge failed"),
                    }
                    match state.logs.cleanup_old_logs(90).await {
                        Ok(n) => info!(deleted = n, "cleanup: old logs purged"),
                        Err(e) => warn!(error = %e, "cleanup: log purge failed"),
                    }
                }
            })
            .await;
        });
    }

    // ── 6. Expire-positions job (cron 01:00 local) ───────────────────────
    {
        let state = state.clone();
        let job = state.scheduler.expire_positions.clone();
        tokio::spawn(async move {
            scheduler::run_daily_loop(job, 1, 0, move || {
                let state = state.clone();
                async move {
                    let today = chrono::Utc::now().date_naive();
                    match state.positions.expire_due_positions(today).await {
                        Ok(n) => info!(expired = n, "expire-positions: transitioned past-due positions"),
                        Err(e) => warn!(error = %e, "expire-positions: transition failed"),
                    }
                }
            })
            .await;
        });
    }

    // ── 7. HTTP server ────────────────────────────────────────────────────
    let app = api::router(state.clone());
    let bind_addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "HTTP server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        {
            warn!(error = %e, "HTTP server stopped unexpectedly");
        }
    });

    info!("all subsystems running, press Ctrl+C to stop");

    // ── 8. Graceful shutdown ──────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping");

    Ok(())
}
