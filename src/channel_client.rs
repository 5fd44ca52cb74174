// =============================================================================
// External channel client — WhatsApp/SMS/Email delivery
// =============================================================================
//
// Grounded on `CommunicationsAPIClient`
// (`app/services/communications_client.py`): a bearer token preferring a
// static API key, falling back to a login flow against two endpoint shapes;
// per-channel primary/fallback endpoint pairs; 401 triggers one re-auth and
// retry, 400/404/415 move on to the next endpoint variant without
// re-authenticating. The bearer token is read/written through a
// `parking_lot::RwLock` per SPEC_FULL.md §5's concurrent-sends resolution.
// =============================================================================

use std::time::Duration;

use parking_lot::RwLock;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::types::NotifyChannel;

pub struct ChannelClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    client_id: Option<String>,
    email: Option<String>,
    password: Option<String>,
    auth_token: RwLock<Option<String>>,
}

/// Outcome of a single channel send, enough for the notifier to write a Log.
pub struct SendResult {
    pub provider_msg_id: Option<String>,
}

impl ChannelClient {
    pub fn new(config: &Config) -> Self {
        let api_key = Some(config.comm_api_key.clone()).filter(|s| !s.is_empty());
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builder never fails with only a timeout set"),
            base_url: config.comm_api_url.trim_end_matches('/').to_string(),
            auth_token: RwLock::new(api_key.clone()),
            api_key,
            client_id: config.comm_client_id.clone(),
            email: config.comm_email.clone(),
            password: config.comm_password.clone(),
        }
    }

    fn bearer(&self) -> Option<String> {
        self.auth_token.read().clone()
    }

    /// Re-authenticates, preferring the static API key if one is configured.
    async fn login(&self) -> Result<(), AppError> {
        if let Some(key) = &self.api_key {
            *self.auth_token.write() = Some(key.clone());
            return Ok(());
        }

        let mut payload_variants: Vec<Value> = Vec::new();
        if let (Some(client_id), Some(email), Some(password)) =
            (&self.client_id, &self.email, &self.password)
        {
            payload_variants.push(json!({
                "clientId": client_id,
                "email": email,
                "password": password,
            }));
        }
        if let (Some(email), Some(password)) = (&self.email, &self.password) {
            payload_variants.push(json!({ "email": email, "password": password }));
        }

        if payload_variants.is_empty() {
            warn!("channel client: login skipped, no credentials configured");
            *self.auth_token.write() = None;
            return Ok(());
        }

        let endpoints = [
            format!("{}/api/v1/Auth/client-login", self.base_url),
            format!("{}/api/v1/Auth/login", self.base_url),
        ];

        for endpoint in &endpoints {
            for payload in &payload_variants {
                let response = match self.client.post(endpoint).json(payload).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(endpoint, error = %e, "channel client: auth attempt failed");
                        continue;
                    }
                };
                if response.status().as_u16() >= 400 {
                    continue;
                }
                let body: Value = match response.json().await {
                    Ok(b) => b,
                    Err(_) => continue,
                };
                let token = body
                    .get("access_token")
                    .or_else(|| body.get("accessToken"))
                    .or_else(|| body.get("token"))
                    .or_else(|| body.get("jwt"))
                    .and_then(|v| v.as_str())
                    .map(String::from);
                if let Some(token) = token {
                    info!(endpoint, "channel client: auth success");
                    *self.auth_token.write() = Some(token);
                    return Ok(());
                }
            }
        }

        warn!("channel client: auth failed, no token obtained");
        *self.auth_token.write() = None;
        Ok(())
    }

    fn normalize_phone(phone: &str) -> String {
        phone.chars().filter(|c| c.is_ascii_digit()).collect()
    }

    fn extract_message_id(body: &Value) -> Option<String> {
        body.get("message_id")
            .or_else(|| body.get("id"))
            .or_else(|| body.get("externalId"))
            .or_else(|| body.get("messageId"))
            .and_then(|v| v.as_str().map(String::from).or_else(|| v.as_i64().map(|n| n.to_string())))
    }

    /// Tries `endpoints` in order, retrying once on 401 after re-auth, and
    /// advancing to the next endpoint on 400/404/415 without re-auth.
    async fn try_endpoints(&self, endpoints: &[(String, Value)]) -> Result<SendResult, AppError> {
        if self.bearer().is_none() {
            self.login().await?;
        }

        let mut last_error: Option<String> = None;
        for (endpoint, payload) in endpoints {
            for attempt in 0..2 {
                let mut request = self.client.post(endpoint).json(payload);
                if let Some(token) = self.bearer() {
                    request = request.bearer_auth(token);
                }

                let response = match request.send().await {
                    Ok(r) => r,
                    Err(e) => {
                        last_error = Some(e.to_string());
                        break;
                    }
                };

                let status = response.status();
                if status == StatusCode::UNAUTHORIZED && attempt == 0 {
                    self.login().await?;
                    continue;
                }
                if matches!(
                    status,
                    StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNSUPPORTED_MEDIA_TYPE
                ) {
                    last_error = Some(format!("{endpoint} returned {status}"));
                    break;
                }
                if !status.is_success() {
                    last_error = Some(format!("{endpoint} returned {status}"));
                    break;
                }

                let body: Value = response.json().await.unwrap_or(Value::Null);
                info!(endpoint, "channel client: send succeeded");
                return Ok(SendResult {
                    provider_msg_id: Self::extract_message_id(&body),
                });
            }
        }

        Err(AppError::external_service(
            "communications_api",
            last_error.unwrap_or_else(|| "all endpoints exhausted".to_string()),
        ))
    }

    pub async fn send_whatsapp(&self, phone: &str, message: &str) -> Result<SendResult, AppError> {
        let normalized = Self::normalize_phone(phone);
        let endpoints = vec![
            (
                format!("{}/api/v1/Notification/whatsapp", self.base_url),
                json!({ "to": normalized, "message": message }),
            ),
            (
                format!("{}/api/v1/Message/text", self.base_url),
                json!({ "to": normalized, "content": message }),
            ),
        ];
        self.try_endpoints(&endpoints).await
    }

    pub async fn send_sms(&self, phone: &str, message: &str) -> Result<SendResult, AppError> {
        let normalized = Self::normalize_phone(phone);
        let endpoints = vec![
            (
                format!("{}/api/v1/Notification/sms", self.base_url),
                json!({ "to": normalized, "message": message }),
            ),
            (
                format!("{}/api/v1/Message/text", self.base_url),
                json!({ "to": normalized, "content": message }),
            ),
        ];
        self.try_endpoints(&endpoints).await
    }

    pub async fn send_email(
        &self,
        email: &str,
        subject: &str,
        message: &str,
    ) -> Result<SendResult, AppError> {
        let endpoints = vec![(
            format!("{}/api/v1/Notification/email", self.base_url),
            json!({ "to": email, "subject": subject, "htmlContent": message, "textContent": message }),
        )];
        self.try_endpoints(&endpoints).await
    }

    pub async fn send(
        &self,
        channel: NotifyChannel,
        target: &str,
        subject: &str,
        message: &str,
    ) -> Result<SendResult, AppError> {
        match channel {
            NotifyChannel::WhatsApp => self.send_whatsapp(target, message).await,
            NotifyChannel::Sms => self.send_sms(target, message).await,
            NotifyChannel::Email => self.send_email(target, subject, message).await,
        }
    }

    pub async fn health_check(&self) -> bool {
        let endpoint = format!("{}/health", self.base_url);
        match self
            .client
            .get(&endpoint)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                warn!(error = %e, "channel client: health check failed");
                false
            }
        }
    }
}
