// Authentication middleware for API endpoints. Auth is active only when both
// admin credentials are configured; otherwise every request passes through
// (reverse-proxy deployment).
//
// Session tokens are HMAC-SHA256 signed with SECRET_KEY and verified
// statelessly, so they survive restarts and are shared across replicas.

use std::sync::Arc;

use actix_web::{
    body::{BoxBody, EitherBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use chrono::Utc;
use futures::future::LocalBoxFuture;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::future::{ready, Ready};
use tracing::warn;
use uuid::Uuid;

use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

/// Paths reachable without a bearer token even when auth is enabled.
const OPEN_PATHS: [&str; 3] = ["/health", "/", "/api/v1/auth/login"];

/// Token version tag; bump when the signed payload changes shape.
const TOKEN_PREFIX: &str = "gdx1";

pub const SESSION_TTL_SECS: u64 = 86_400;

/// Signed session token: `gdx1.<session_id>.<expires_unix>.<hex mac>` with
/// the mac computed over `<session_id>.<expires_unix>`.
fn sign_session(secret: &str, session_id: Uuid, expires_unix: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{session_id}.{expires_unix}").as_bytes());
    let sig = hex::encode(mac.finalize().into_bytes());
    format!("{TOKEN_PREFIX}.{session_id}.{expires_unix}.{sig}")
}

/// Stateless verification: well-formed, unexpired at `now_unix`, and the
/// mac round-trips under the same key (constant-time compare).
fn verify_session(secret: &str, token: &str, now_unix: i64) -> bool {
    let mut parts = token.splitn(4, '.');
    let (Some(prefix), Some(session_id), Some(expires_raw), Some(sig_hex)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if prefix != TOKEN_PREFIX {
        return false;
    }
    let Ok(expires_unix) = expires_raw.parse::<i64>() else {
        return false;
    };
    if expires_unix <= now_unix {
        return false;
    }
    let Ok(sig) = hex::decode(sig_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{session_id}.{expires_unix}").as_bytes());
    mac.verify_slice(&sig).is_ok()
}

pub struct AuthState {
    enabled: bool,
    admin_email: Option<String>,
    admin_password: Option<String>,
    /// Signing key for session tokens; also accepted as a static service
    /// bearer (server-to-server callers).
    secret_key: Option<String>,
    /// Bearer for the AI tool collaborator.
    mcp_api_key: Option<String>,
}

impl AuthState {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            enabled: cfg.auth_enabled(),
            admin_email: cfg.admin_email.clone(),
            admin_password: cfg.admin_password.clone(),
            secret_key: cfg.secret_key.clone(),
            mcp_api_key: cfg.mcp_api_key.clone(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Issue a signed session token on a correct admin login.
    pub fn login(&self, email: &str, password: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let ok = self.admin_email.as_deref() == Some(email)
            && self.admin_password.as_deref() == Some(password);
        if !ok {
            return None;
        }
        let Some(secret) = self.secret_key.as_deref() else {
            warn!("auth enabled but SECRET_KEY unset; cannot issue session tokens");
            return None;
        };
        let expires_unix = Utc::now().timestamp() + SESSION_TTL_SECS as i64;
        Some(sign_session(secret, Uuid::new_v4(), expires_unix))
    }

    pub fn verify_bearer(&self, token: &str) -> bool {
        if self.secret_key.as_deref() == Some(token) {
            return true;
        }
        if self.mcp_api_key.as_deref() == Some(token) {
            return true;
        }
        match self.secret_key.as_deref() {
            Some(secret) => verify_session(secret, token, Utc::now().timestamp()),
            None => false,
        }
    }
}

pub struct Auth {
    state: Arc<AuthState>,
}

impl Auth {
    pub fn new(state: Arc<AuthState>) -> Self {
        Self { state }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Auth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddleware {
            service,
            state: self.state.clone(),
        }))
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    state: Arc<AuthState>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let bypass = !self.state.enabled() || OPEN_PATHS.contains(&req.path());
        if bypass {
            let fut = self.service.call(req);
            return Box::pin(async move {
                let res = fut.await?;
                Ok(res.map_into_left_body())
            });
        }

        let authorized = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|token| self.state.verify_bearer(token))
            .unwrap_or(false);

        if authorized {
            let fut = self.service.call(req);
            Box::pin(async move {
                let res = fut.await?;
                Ok(res.map_into_left_body())
            })
        } else {
            Box::pin(async move {
                let response = HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": {
                        "code": "UNAUTHORIZED",
                        "message": "missing or invalid bearer token",
                        "details": {},
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                        "trace_id": Uuid::new_v4(),
                    }
                }));
                Ok(req.into_response(response).map_into_right_body())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(enabled: bool) -> AuthState {
        AuthState {
            enabled,
            admin_email: Some("admin@example.com".into()),
            admin_password: Some("hunter2".into()),
            secret_key: Some("svc-secret".into()),
            mcp_api_key: Some("mcp-key".into()),
        }
    }

    #[test]
    fn login_issues_verifiable_tokens() {
        let auth = state(true);
        assert!(auth.login("admin@example.com", "wrong").is_none());
        let token = auth.login("admin@example.com", "hunter2").unwrap();
        assert!(token.starts_with("gdx1."));
        assert!(auth.verify_bearer(&token));
        assert!(!auth.verify_bearer("bogus"));
    }

    #[test]
    fn tokens_survive_a_fresh_auth_state() {
        // Verification is stateless: a second AuthState with the same key
        // (another replica, or the process after a restart) accepts it.
        let token = state(true).login("admin@example.com", "hunter2").unwrap();
        assert!(state(true).verify_bearer(&token));
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let now = Utc::now().timestamp();
        let token = sign_session("svc-secret", Uuid::new_v4(), now + 600);
        assert!(verify_session("svc-secret", &token, now));
        let mut forged = token.clone();
        forged.truncate(token.len() - 2);
        forged.push_str("00");
        assert!(!verify_session("svc-secret", &forged, now));
        assert!(!verify_session("other-key", &token, now));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let now = Utc::now().timestamp();
        let token = sign_session("svc-secret", Uuid::new_v4(), now - 1);
        assert!(!verify_session("svc-secret", &token, now));
    }

    #[test]
    fn static_bearers_always_verify() {
        let auth = state(true);
        assert!(auth.verify_bearer("svc-secret"));
        assert!(auth.verify_bearer("mcp-key"));
    }

    #[test]
    fn disabled_auth_never_issues_tokens() {
        let auth = state(false);
        assert!(auth.login("admin@example.com", "hunter2").is_none());
    }
}
