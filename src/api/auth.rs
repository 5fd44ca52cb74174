// =============================================================================
// Bearer Token Authentication — Axum Middleware
// =============================================================================
//
// Two distinct gates, per SPEC_FULL.md §6: the MT5 bridge endpoints accept
// `MT5_BRIDGE_TOKEN`, the administrative surface accepts `ADMIN_BEARER_TOKEN`.
// The teacher's single-token `AuthBearer` read straight from an env var on
// every request; here both extractors read their expected token out of the
// shared `AppState`'s `Config` instead, since this domain's state is built
// once at boot rather than left to an env lookup per request. Comparison is
// still constant-time to avoid a timing side-channel on the token.
//
// Usage as an Axum extractor:
//
//   async fn handler(_auth: BridgeAuth, State(state): State<Arc<AppState>>, ...) { ... }
//
// If the token is missing or invalid, the extractor short-circuits the
// request with a 403 Forbidden response before the handler body executes.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::app_state::AppState;

// =============================================================================
// Constant-time comparison
// =============================================================================

/// Compare two byte slices in constant time. Returns `true` if they are
/// identical. The comparison always examines every byte of both slices even
/// when a mismatch is found early, preventing timing side-channels.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Rejection type returned when authentication fails.
pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, axum::Json(body)).into_response()
    }
}

fn check_bearer(parts: &Parts, expected: &str) -> Result<String, AuthRejection> {
    if expected.is_empty() {
        warn!("bearer token not configured — all authenticated requests will be rejected");
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "Server authentication not configured",
        });
    }

    let auth_header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = match auth_header {
        Some(value) if value.starts_with("Bearer ") => &value[7..],
        _ => {
            warn!("missing or malformed Authorization header");
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "Missing or invalid authorization token",
            });
        }
    };

    if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        warn!("invalid bearer token presented");
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "Invalid authorization token",
        });
    }

    Ok(token.to_string())
}

// =============================================================================
// Bridge extractor — guards `/api/mt5/*`
// =============================================================================

pub struct BridgeAuth(pub String);

/// Returns `true` when `allowlist` is empty (no restriction configured) or
/// contains the caller's address — the "optional IP allowlist" named
/// alongside the bridge's bearer token in SPEC_FULL.md §4.10.
fn ip_allowed(allowlist: &[String], remote: Option<std::net::IpAddr>) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    match remote {
        Some(ip) => allowlist.iter().any(|allowed| allowed == &ip.to_string()),
        None => false,
    }
}

impl FromRequestParts<Arc<AppState>> for BridgeAuth {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let remote = parts
            .extensions
            .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
            .map(|ci| ci.0.ip());

        if !ip_allowed(&state.config.mt5_bridge_allowed_ips, remote) {
            warn!(?remote, "bridge request rejected: source IP not in allowlist");
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "Source IP not permitted",
            });
        }

        check_bearer(parts, &state.config.mt5_bridge_token).map(BridgeAuth)
    }
}

// =============================================================================
// Admin extractor — guards `/api/admin/*`
// =============================================================================

pub struct AdminAuth(pub String);

impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        check_bearer(parts, &state.config.admin_bearer_token).map(AdminAuth)
    }
}

// =============================================================================
// Tests
// =============================================================================
