//! In-process identity provider for tests and the offline client.
//!
//! Accounts live in a map; tokens are real HS256 JWTs with the same claim
//! layout as the managed provider's, so a [`JwksVerifier`] built with
//! [`MemoryIdentityProvider::verifier`] accepts them.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;

use super::principal::UserSession;
use super::provider::IdentityProvider;
use super::session::SessionSlot;
use super::verifier::{JwksVerifier, ISSUER_PREFIX};
use crate::error::{AppError, AppResult};

pub const MEMORY_KEY_ID: &str = "memory";
const TOKEN_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Serialize)]
pub struct IssuedClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub auth_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

struct Account {
    uid: String,
    password: String,
    auth_time: i64,
}

pub struct MemoryIdentityProvider {
    project_id: String,
    secret: Vec<u8>,
    accounts: RwLock<HashMap<String, Account>>,
    slot: SessionSlot,
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn uid_for(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    format!("{}-uid", local.to_ascii_lowercase())
}

impl MemoryIdentityProvider {
    pub fn new(project_id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self { project_id: project_id.into(), secret: secret.into(), accounts: RwLock::new(HashMap::new()), slot: SessionSlot::default() }
    }

    /// A verifier that accepts this provider's tokens.
    pub fn verifier(&self) -> JwksVerifier {
        JwksVerifier::with_static_keys(
            self.project_id.clone(),
            Algorithm::HS256,
            [(MEMORY_KEY_ID.to_string(), DecodingKey::from_secret(&self.secret))],
        )
    }

    /// Sign arbitrary claims with this provider's key (lets tests forge expired tokens).
    pub fn sign(&self, claims: &IssuedClaims) -> AppResult<String> {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(MEMORY_KEY_ID.to_string());
        encode(&header, claims, &EncodingKey::from_secret(&self.secret)).map_err(|e| AppError::internal(e.to_string()))
    }

    pub fn claims_for(&self, uid: &str, email: Option<&str>, auth_time: i64) -> IssuedClaims {
        let now = now_secs();
        IssuedClaims {
            iss: format!("{ISSUER_PREFIX}{}", self.project_id),
            aud: self.project_id.clone(),
            sub: uid.to_string(),
            iat: now,
            exp: now + TOKEN_TTL.as_secs() as i64,
            auth_time,
            email: email.map(|s| s.to_string()),
        }
    }

    fn open_session(&self, email: &str, uid: &str, auth_time: i64) -> AppResult<UserSession> {
        let id_token = self.sign(&self.claims_for(uid, Some(email), auth_time))?;
        let session = UserSession { uid: uid.to_string(), email: Some(email.to_string()), id_token, refresh_token: None };
        self.slot.set(session.clone(), TOKEN_TTL);
        Ok(session)
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_up(&self, email: &str, password: &str) -> AppResult<UserSession> {
        let email = email.trim().to_ascii_lowercase();
        if !email.contains('@') { return Err(AppError::rejected("INVALID_EMAIL")); }
        if password.len() < 6 { return Err(AppError::rejected("WEAK_PASSWORD")); }
        let (uid, auth_time) = {
            let mut accounts = self.accounts.write();
            if accounts.contains_key(&email) { return Err(AppError::rejected("EMAIL_EXISTS")); }
            let base = uid_for(&email);
            let mut uid = base.clone();
            let mut n = 1;
            while accounts.values().any(|a| a.uid == uid) {
                n += 1;
                uid = format!("{base}{n}");
            }
            let auth_time = now_secs();
            accounts.insert(email.clone(), Account { uid: uid.clone(), password: password.to_string(), auth_time });
            (uid, auth_time)
        };
        self.open_session(&email, &uid, auth_time)
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<UserSession> {
        let email = email.trim().to_ascii_lowercase();
        let (uid, auth_time) = {
            let mut accounts = self.accounts.write();
            let Some(account) = accounts.get_mut(&email) else { return Err(AppError::rejected("EMAIL_NOT_FOUND")); };
            if account.password != password { return Err(AppError::rejected("INVALID_PASSWORD")); }
            account.auth_time = now_secs();
            (account.uid.clone(), account.auth_time)
        };
        self.open_session(&email, &uid, auth_time)
    }

    async fn sign_out(&self) -> AppResult<()> {
        self.slot.clear();
        Ok(())
    }

    async fn id_token(&self) -> AppResult<String> {
        let Some(session) = self.slot.current() else { return Err(AppError::missing_token()); };
        if !self.slot.expires_within(Duration::ZERO) {
            return Ok(session.id_token);
        }
        let auth_time = self.accounts.read().values().find(|a| a.uid == session.uid).map(|a| a.auth_time).unwrap_or_else(now_secs);
        let token = self.sign(&self.claims_for(&session.uid, session.email.as_deref(), auth_time))?;
        self.slot.refresh_token(token.clone(), None, TOKEN_TTL);
        Ok(token)
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserSession>> { self.slot.subscribe() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TokenVerifier;

    #[tokio::test]
    async fn sign_up_then_sign_in() -> anyhow::Result<()> {
        let idp = MemoryIdentityProvider::new("demo", b"secret".to_vec());
        let s = idp.sign_up("Alice@Example.com", "hunter22").await?;
        assert_eq!(s.uid, "alice-uid");
        assert_eq!(s.email.as_deref(), Some("alice@example.com"));

        assert_eq!(idp.sign_up("alice@example.com", "hunter22").await.unwrap_err(), AppError::rejected("EMAIL_EXISTS"));
        assert_eq!(idp.sign_in("alice@example.com", "wrong!").await.unwrap_err(), AppError::rejected("INVALID_PASSWORD"));
        let again = idp.sign_in("alice@example.com", "hunter22").await?;
        assert_eq!(again.uid, "alice-uid");
        Ok(())
    }

    #[tokio::test]
    async fn uids_stay_unique_across_domains() -> anyhow::Result<()> {
        let idp = MemoryIdentityProvider::new("demo", b"secret".to_vec());
        let a = idp.sign_up("bob@one.test", "password").await?;
        let b = idp.sign_up("bob@two.test", "password").await?;
        assert_ne!(a.uid, b.uid);
        Ok(())
    }

    #[tokio::test]
    async fn issued_tokens_verify() -> anyhow::Result<()> {
        let idp = MemoryIdentityProvider::new("demo", b"secret".to_vec());
        idp.sign_up("carol@example.com", "password").await?;
        let token = idp.id_token().await?;
        let claims = idp.verifier().verify(&token).await?;
        assert_eq!(claims.uid, "carol-uid");
        assert_eq!(claims.email.as_deref(), Some("carol@example.com"));
        Ok(())
    }

    #[tokio::test]
    async fn sign_out_drops_the_session() -> anyhow::Result<()> {
        let idp = MemoryIdentityProvider::new("demo", b"secret".to_vec());
        let rx = idp.subscribe();
        idp.sign_up("dave@example.com", "password").await?;
        assert!(rx.borrow().is_some());
        idp.sign_out().await?;
        assert!(rx.borrow().is_none());
        assert_eq!(idp.id_token().await.unwrap_err(), AppError::missing_token());
        Ok(())
    }
}
