// =============================================================================
// Notifier engine — sequential FIFO alert dispatch across channels
// =============================================================================
//
// Grounded on `NotifierWorker.run()` (`app/workers/notifier_worker.py`) for
// the outer session-gate-then-batch shape, and `NotificationService`
// (`app/services/notification_service.py`) for the per-alert body:
// transition to PROCESSING, resolve the owning account, enrich a
// possibly-incomplete payload with live market data (best-effort, never
// blocks delivery), build a message that varies by `reason`, fan out to the
// channel list with bounded retries, write one Log per channel outcome, and
// finish by transitioning the alert to SENT or FAILED.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::channel_client::ChannelClient;
use crate::config::Config;
use crate::error::AppError;
use crate::provider::Provider;
use crate::repositories::{AccountRepo, AlertRepo, PositionRepo};
use crate::session_gate;
use crate::types::{Alert, AlertPayload, AlertReason, AlertStatus, LogStatus, NotifyChannel, OptionSide};

pub struct NotifierEngine {
    config: Arc<Config>,
    accounts: Arc<dyn AccountRepo>,
    positions: Arc<dyn PositionRepo>,
    alerts: Arc<dyn AlertRepo>,
    logs: Arc<dyn crate::repositories::LogRepo>,
    provider: Arc<dyn Provider>,
    channel_client: Arc<ChannelClient>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct NotifierRunSummary {
    pub status: &'static str,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl NotifierEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        accounts: Arc<dyn AccountRepo>,
        positions: Arc<dyn PositionRepo>,
        alerts: Arc<dyn AlertRepo>,
        logs: Arc<dyn crate::repositories::LogRepo>,
        provider: Arc<dyn Provider>,
        channel_client: Arc<ChannelClient>,
    ) -> Self {
        Self {
            config,
            accounts,
            positions,
            alerts,
            logs,
            provider,
            channel_client,
        }
    }

    pub async fn run(&self) -> NotifierRunSummary {
        let now = Utc::now();
        if !session_gate::is_market_open(&self.config.session_window, now) {
            debug!("notifier: skipped, market closed");
            return NotifierRunSummary {
                status: "skipped",
                ..Default::default()
            };
        }

        let pending = match self
            .alerts
            .get_pending_alerts(self.config.notifier_batch_size)
            .await
        {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(error = %e, "notifier: failed to load pending alerts");
                return NotifierRunSummary {
                    status: "failed",
                    ..Default::default()
                };
            }
        };

        if pending.is_empty() {
            debug!("notifier: no pending alerts");
            return NotifierRunSummary {
                status: "ok",
                ..Default::default()
            };
        }

        info!(count = pending.len(), "notifier: processing pending alerts");

        let mut successful = 0;
        let mut failed = 0;
        let total = pending.len();

        for alert in pending {
            match self.process_alert(alert).await {
                true => successful += 1,
                false => failed += 1,
            }
        }

        info!(total, successful, failed, "notifier: batch finished");
        NotifierRunSummary {
            status: "ok",
            total,
            successful,
            failed,
        }
    }

    async fn process_alert(&self, alert: Alert) -> bool {
        if let Err(e) = self
            .alerts
            .update_status(alert.id, AlertStatus::Processing, None, None)
            .await
        {
            warn!(alert_id = %alert.id, error = %e, "notifier: failed to mark alert processing");
            return false;
        }

        let account = match self.accounts.get_by_id(alert.account_id).await {
            Ok(account) => account,
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "notifier: account not found");
                let _ = self
                    .alerts
                    .update_status(alert.id, AlertStatus::Failed, Some("account not found".into()), None)
                    .await;
                return false;
            }
        };

        let payload = self.enrich_payload(&alert).await;

        let channels = Self::resolve_channels(&payload);
        let message = Self::build_message(alert.reason, &payload);

        let mut all_success = true;
        for channel in &channels {
            let target = match channel {
                NotifyChannel::WhatsApp | NotifyChannel::Sms => account.phone.clone(),
                NotifyChannel::Email => account.email.clone(),
            };
            let sent = self.send_to_channel(alert.id, channel.clone(), target, &message).await;
            if !sent {
                all_success = false;
            }
        }

        let result = if all_success {
            self.alerts.update_status(alert.id, AlertStatus::Sent, None, None).await
        } else {
            self.alerts
                .update_status(alert.id, AlertStatus::Failed, Some("one or more channels failed".into()), None)
                .await
        };
        if let Err(e) = result {
            warn!(alert_id = %alert.id, error = %e, "notifier: failed to record final alert status");
        }

        if all_success {
            info!(alert_id = %alert.id, "notifier: alert delivered");
        }
        all_success
    }

    /// Fills in missing ticker/side/strike/expiration/dte from the position
    /// (for legacy-shaped payloads), then best-effort market data (price,
    /// premium, delta, moneyness, otm_pct, pnl_premium). Market-data failures
    /// are logged and otherwise ignored; they never block delivery.
    async fn enrich_payload(&self, alert: &Alert) -> AlertPayload {
        let mut payload = alert.payload.clone();

        if alert.reason == AlertReason::RollTrigger && Self::missing_core_fields(&payload) {
            if let Some(position_id) = alert.option_position_id {
                match self.positions.get_by_id(position_id).await {
                    Ok(position) => {
                        payload.ticker.get_or_insert(position.ticker.clone());
                        payload.side.get_or_insert(position.side);
                        payload.strike.get_or_insert(position.strike);
                        payload.expiration.get_or_insert(position.expiration);
                        payload.quantity.get_or_insert(position.quantity);
                        payload.avg_premium.get_or_insert(position.avg_premium);
                        if payload.dte.is_none() {
                            payload.dte = Some(position.dte(Utc::now().date_naive()).max(0));
                        }
                    }
                    Err(e) => {
                        warn!(alert_id = %alert.id, error = %e, "notifier: failed to load position for enrichment");
                    }
                }
            }
        }

        if payload.dte.is_none() {
            if let Some(expiration) = payload.expiration {
                payload.dte = Some((expiration - Utc::now().date_naive()).num_days().max(0));
            }
        }

        let (Some(ticker), Some(side), Some(strike), Some(expiration)) =
            (payload.ticker.clone(), payload.side, payload.strike, payload.expiration)
        else {
            return payload;
        };

        match self.provider.get_quote(&ticker).await {
            Ok(quote) => payload.underlying_price.get_or_insert(quote.current_price),
            Err(e) => {
                warn!(alert_id = %alert.id, ticker, error = %e, "notifier: market price enrichment failed");
                None
            }
        };

        match self.provider.get_option_quote(&ticker, strike, expiration, side).await {
            Ok(quote) => {
                payload.current_premium.get_or_insert(quote.mid().unwrap_or_default());
                if let Some(greeks) = quote.greeks {
                    payload.delta.get_or_insert(greeks.delta);
                }
            }
            Err(e) => {
                warn!(alert_id = %alert.id, ticker, error = %e, "notifier: option premium enrichment failed");
            }
        }

        if (payload.moneyness.is_none() || payload.otm_pct.is_none())
            && payload.underlying_price.is_some()
        {
            let price = payload.underlying_price.unwrap();
            let otm_pct = match side {
                OptionSide::Call => ((strike - price) / price).max(0.0),
                OptionSide::Put => ((price - strike) / price).max(0.0),
            };
            let moneyness = match side {
                OptionSide::Call if price > strike => 1.0,
                OptionSide::Put if price < strike => 1.0,
                _ => 0.0,
            };
            payload.moneyness.get_or_insert(moneyness);
            payload.otm_pct.get_or_insert(otm_pct);
        }

        if payload.pnl_premium.is_none() {
            if let (Some(premium), Some(avg)) = (payload.current_premium, payload.avg_premium) {
                payload.pnl_premium = Some(premium - avg);
            }
        }

        payload
    }

    fn missing_core_fields(payload: &AlertPayload) -> bool {
        payload.ticker.is_none()
            || payload.side.is_none()
            || payload.strike.is_none()
            || payload.expiration.is_none()
            || payload.dte.is_none()
    }

    /// Channels named on the payload plus the always-on whatsapp/sms
    /// defaults, deduplicated while preserving first-seen order.
    fn resolve_channels(payload: &AlertPayload) -> Vec<NotifyChannel> {
        let mut seen = Vec::new();
        for channel in payload.channels.iter().chain([NotifyChannel::WhatsApp, NotifyChannel::Sms].iter()) {
            if !seen.contains(channel) {
                seen.push(channel.clone());
            }
        }
        seen
    }

    fn build_message(reason: AlertReason, payload: &AlertPayload) -> String {
        if let Some(message) = &payload.message {
            return message.clone();
        }
        match reason {
            AlertReason::RollTrigger => Self::build_roll_trigger_message(payload),
            AlertReason::ExpirationWarning => Self::build_expiration_warning_message(payload),
            AlertReason::DeltaThreshold => Self::build_delta_threshold_message(payload),
            AlertReason::Manual => "Manual alert".to_string(),
        }
    }

    fn build_roll_trigger_message(payload: &AlertPayload) -> String {
        let ticker = payload.ticker.as_deref().unwrap_or("N/A");
        let side = payload.side.map(|s| s.to_string()).unwrap_or_else(|| "N/A".into());
        let strike = fmt_num(payload.strike);
        let expiration = payload.expiration.map(|e| e.to_string()).unwrap_or_else(|| "N/A".into());
        let dte = payload.dte.map(|d| d.to_string()).unwrap_or_else(|| "N/A".into());

        let head = format!("Roll: {ticker} {side} {strike} | Exp: {expiration} (DTE {dte})");

        let mut line2 = format!(
            "Underlying: {} | Premium: {}",
            fmt_money(payload.underlying_price),
            fmt_money(payload.current_premium)
        );
        if payload.avg_premium.is_some() || payload.pnl_premium.is_some() {
            line2.push_str(&format!(" (avg {}", fmt_money(payload.avg_premium)));
            if let Some(pnl) = payload.pnl_premium {
                line2.push_str(&format!(", PnL {}", fmt_money(Some(pnl))));
            }
            line2.push(')');
        }

        let mny = match payload.moneyness {
            Some(m) if m >= 1.0 => "ITM",
            Some(_) => "OTM",
            None => "N/A",
        };
        let mut line3 = format!("Status: {mny}");
        if let Some(otm) = payload.otm_pct {
            line3.push_str(&format!(" ({})", fmt_pct(Some(otm))));
        }
        if let Some(delta) = payload.delta {
            line3.push_str(&format!(" | Delta: {}", fmt_num(Some(delta))));
        }

        let line4 = payload
            .action_hint
            .clone()
            .unwrap_or_else(|| "Suggestion: roll to stay within the target OTM band.".to_string());

        format!("{head}\n{line2}\n{line3}\n{line4}")
    }

    fn build_expiration_warning_message(payload: &AlertPayload) -> String {
        let ticker = payload.ticker.as_deref().unwrap_or("N/A");
        let side = payload.side.map(|s| s.to_string());
        let strike = payload.strike;
        let expiration = payload.expiration.map(|e| e.to_string()).unwrap_or_else(|| "N/A".into());
        let days = payload.dte.unwrap_or(0).max(0);
        let unit = if days == 1 { "day" } else { "days" };

        let mut parts = vec![ticker.to_string()];
        if let Some(side) = side.filter(|s| s != "N/A") {
            parts.push(side);
        }
        if let Some(strike) = strike {
            parts.push(fmt_num(Some(strike)));
        }
        let asset_str = parts.join(" ");

        let head = format!("Warning: expires in {days} {unit}: {asset_str}");
        let line2 = format!(
            "Exp: {expiration} | Qty: {}",
            payload.quantity.map(|q| q.to_string()).unwrap_or_else(|| "N/A".into())
        );
        let line3 = "Suggestion: consider rolling today to avoid assignment.".to_string();
        format!("{head}\n{line2}\n{line3}")
    }

    fn build_delta_threshold_message(payload: &AlertPayload) -> String {
        let ticker = payload.ticker.as_deref().unwrap_or("N/A");
        let side = payload.side.map(|s| s.to_string()).unwrap_or_else(|| "N/A".into());
        let strike = fmt_num(payload.strike);

        let head = "Delta threshold reached".to_string();
        let line2 = format!(
            "{ticker} {side} {strike} | Delta: {} (limit {})",
            fmt_num(payload.delta),
            fmt_num(payload.delta_threshold)
        );
        let line3 = "The option is approaching the strike (assignment risk).".to_string();
        format!("{head}\n{line2}\n{line3}")
    }

    /// Sends to one channel with up to `max_notification_retries` attempts,
    /// sleeping `retry_delay` between attempts, and writes exactly one Log
    /// row recording the final outcome.
    async fn send_to_channel(
        &self,
        alert_id: uuid::Uuid,
        channel: NotifyChannel,
        target: Option<String>,
        message: &str,
    ) -> bool {
        let Some(target) = target else {
            warn!(%alert_id, %channel, "notifier: no target for channel");
            return false;
        };

        let attempts = self.config.max_notification_retries.max(1);
        let mut last_error: Option<AppError> = None;

        for attempt in 0..attempts {
            match self.channel_client.send(channel.clone(), &target, "Alert", message).await {
                Ok(result) => {
                    let log_result = self
                        .logs
                        .create_log(
                            alert_id,
                            channel,
                            target,
                            message.to_string(),
                            LogStatus::Success,
                            result.provider_msg_id,
                            Utc::now(),
                        )
                        .await;
                    if let Err(e) = log_result {
                        warn!(%alert_id, error = %e, "notifier: failed to write success log");
                    }
                    return true;
                }
                Err(e) => {
                    warn!(%alert_id, %channel, attempt = attempt + 1, error = %e, "notifier: channel send failed, retrying");
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        }

        warn!(%alert_id, %channel, "notifier: channel send exhausted retries");
        let log_result = self
            .logs
            .create_log(alert_id, channel, target, message.to_string(), LogStatus::Failed, None, Utc::now())
            .await;
        if let Err(e) = log_result {
            warn!(%alert_id, error = %e, "notifier: failed to write failure log");
        }
        let _ = last_error;
        false
    }
}

fn fmt_money(v: Option<f64>) -> String {
    v.map(|v| format!("R$ {v:.2}")).unwrap_or_else(|| "N/A".to_string())
}

fn fmt_pct(v: Option<f64>) -> String {
    v.map(|v| format!("{:.2}%", v * 100.0)).unwrap_or_else(|| "N/A".to_string())
}

fn fmt_num(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "N/A".to_string())
}
