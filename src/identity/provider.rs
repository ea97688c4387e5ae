use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use super::principal::UserSession;
use super::session::SessionSlot;
use crate::error::{AppError, AppResult};

pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";

// Refresh a little before the provider's deadline.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// The identity provider as the client sees it.
///
/// Implementations own the current session and publish every change through
/// [`IdentityProvider::subscribe`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> AppResult<UserSession>;
    async fn sign_in(&self, email: &str, password: &str) -> AppResult<UserSession>;
    async fn sign_out(&self) -> AppResult<()>;
    /// A bearer token for the current session, refreshed if it is about to lapse.
    async fn id_token(&self) -> AppResult<String>;
    fn subscribe(&self) -> watch::Receiver<Option<UserSession>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    id_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

fn ttl_from(expires_in: Option<&str>) -> Duration {
    Duration::from_secs(expires_in.and_then(|s| s.parse::<u64>().ok()).unwrap_or(3600))
}

/// Turn a non-success provider response into an error: 4xx is a refusal, anything else is an outage.
async fn provider_error(resp: reqwest::Response) -> AppError {
    let status = resp.status();
    let message = resp
        .json::<ErrorEnvelope>()
        .await
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {status}"));
    if status.is_client_error() { AppError::rejected(message) } else { AppError::upstream(message) }
}

/// Firebase Authentication over its REST API (email/password accounts).
pub struct FirebaseAuth {
    api_key: String,
    identity_url: String,
    token_url: String,
    http: reqwest::Client,
    slot: SessionSlot,
}

impl FirebaseAuth {
    pub fn new(api_key: impl Into<String>, http: reqwest::Client) -> Self {
        Self::with_endpoints(api_key, IDENTITY_TOOLKIT_URL, SECURE_TOKEN_URL, http)
    }

    /// Point at alternate endpoints, e.g. the auth emulator.
    pub fn with_endpoints(
        api_key: impl Into<String>,
        identity_url: impl Into<String>,
        token_url: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            identity_url: identity_url.into(),
            token_url: token_url.into(),
            http,
            slot: SessionSlot::default(),
        }
    }

    async fn password_call(&self, op: &str, email: &str, password: &str) -> AppResult<UserSession> {
        let url = format!("{}/accounts:{op}?key={}", self.identity_url, urlencoding::encode(&self.api_key));
        let resp = self
            .http
            .post(url)
            .json(&PasswordRequest { email, password, return_secure_token: true })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(provider_error(resp).await);
        }
        let body: PasswordResponse = resp.json().await?;
        let session = UserSession {
            uid: body.local_id,
            email: body.email.or_else(|| Some(email.to_string())),
            id_token: body.id_token,
            refresh_token: body.refresh_token,
        };
        self.slot.set(session.clone(), ttl_from(body.expires_in.as_deref()));
        info!(uid = %session.uid, "auth.{op} ok");
        Ok(session)
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<String> {
        let url = format!("{}/token?key={}", self.token_url, urlencoding::encode(&self.api_key));
        let resp = self
            .http
            .post(url)
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(provider_error(resp).await);
        }
        let body: RefreshResponse = resp.json().await?;
        self.slot.refresh_token(body.id_token.clone(), body.refresh_token, ttl_from(body.expires_in.as_deref()));
        Ok(body.id_token)
    }
}

#[async_trait]
impl IdentityProvider for FirebaseAuth {
    async fn sign_up(&self, email: &str, password: &str) -> AppResult<UserSession> {
        self.password_call("signUp", email, password).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<UserSession> {
        self.password_call("signInWithPassword", email, password).await
    }

    async fn sign_out(&self) -> AppResult<()> {
        self.slot.clear();
        Ok(())
    }

    async fn id_token(&self) -> AppResult<String> {
        let Some(session) = self.slot.current() else { return Err(AppError::missing_token()); };
        if !self.slot.expires_within(REFRESH_MARGIN) {
            return Ok(session.id_token);
        }
        let Some(refresh_token) = session.refresh_token.as_deref() else {
            self.slot.clear();
            return Err(AppError::invalid_token());
        };
        match self.refresh(refresh_token).await {
            Ok(token) => Ok(token),
            Err(AppError::Rejected(msg)) => {
                // Refresh token revoked or expired: the session is over.
                warn!("token refresh rejected ({msg}), signing out");
                self.slot.clear();
                Err(AppError::invalid_token())
            }
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserSession>> { self.slot.subscribe() }
}
