//! Bearer token verification against the identity provider's published keys.
//!
//! Tokens are RS256 JWTs whose `kid` header selects a key from the provider's
//! JWKS. The key set is fetched over HTTPS and cached for the lifetime the
//! provider advertises in `Cache-Control: max-age`. Signature, expiry,
//! audience and issuer checks are done by `jsonwebtoken`; `iat`, `auth_time`
//! and a non-empty subject are checked here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

use super::principal::VerifiedClaims;
use crate::error::{AppError, AppResult};

pub const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
pub const ISSUER_PREFIX: &str = "https://securetoken.google.com/";

const CLOCK_SKEW_SECS: u64 = 60;
const DEFAULT_KEYS_TTL: Duration = Duration::from_secs(60 * 60);
// Lower bound between refetches triggered by an unknown kid.
const MIN_REFRESH: Duration = Duration::from_secs(30);

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> AppResult<VerifiedClaims>;
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    auth_time: Option<i64>,
    iat: i64,
}

struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedKeys {
    fn is_fresh(&self) -> bool { self.fetched_at.elapsed() < self.ttl }
}

enum KeySource {
    Remote { url: String, http: reqwest::Client },
    Static,
}

pub struct JwksVerifier {
    project_id: String,
    algorithm: Algorithm,
    source: KeySource,
    cache: Arc<RwLock<Option<CachedKeys>>>,
}

impl JwksVerifier {
    /// Verifier for `project_id` that pulls RS256 keys from `jwks_url`.
    pub fn new(project_id: impl Into<String>, jwks_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            project_id: project_id.into(),
            algorithm: Algorithm::RS256,
            source: KeySource::Remote { url: jwks_url.into(), http },
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Verifier over a fixed key set that never expires. Used by tests and
    /// local emulators that sign with a known key.
    pub fn with_static_keys<I>(project_id: impl Into<String>, algorithm: Algorithm, keys: I) -> Self
    where
        I: IntoIterator<Item = (String, DecodingKey)>,
    {
        let cached = CachedKeys { keys: keys.into_iter().collect(), fetched_at: Instant::now(), ttl: Duration::MAX };
        Self {
            project_id: project_id.into(),
            algorithm,
            source: KeySource::Static,
            cache: Arc::new(RwLock::new(Some(cached))),
        }
    }

    pub fn project_id(&self) -> &str { &self.project_id }

    pub fn issuer(&self) -> String { format!("{ISSUER_PREFIX}{}", self.project_id) }

    fn validation(&self) -> Validation {
        let mut v = Validation::new(self.algorithm);
        v.leeway = CLOCK_SKEW_SECS;
        v.set_audience(&[self.project_id.as_str()]);
        v.set_issuer(&[self.issuer()]);
        v.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);
        v
    }

    fn cached_key(&self, kid: &str) -> Option<DecodingKey> {
        let guard = self.cache.read();
        guard.as_ref().filter(|c| c.is_fresh()).and_then(|c| c.keys.get(kid).cloned())
    }

    fn may_refetch(&self) -> bool {
        match self.cache.read().as_ref() {
            Some(c) => !c.is_fresh() || c.fetched_at.elapsed() >= MIN_REFRESH,
            None => true,
        }
    }

    async fn key_for(&self, kid: &str) -> AppResult<DecodingKey> {
        if let Some(key) = self.cached_key(kid) { return Ok(key); }
        let KeySource::Remote { url, http } = &self.source else { return Err(AppError::invalid_token()); };
        if !self.may_refetch() { return Err(AppError::invalid_token()); }

        let fetched = fetch_keys(http, url).await?;
        let key = fetched.keys.get(kid).cloned();
        *self.cache.write() = Some(fetched);
        key.ok_or_else(AppError::invalid_token)
    }
}

async fn fetch_keys(http: &reqwest::Client, url: &str) -> AppResult<CachedKeys> {
    let resp = http.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(AppError::upstream(format!("key set fetch failed: HTTP {}", resp.status())));
    }
    let ttl = resp
        .headers()
        .get(reqwest::header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_max_age)
        .unwrap_or(DEFAULT_KEYS_TTL);
    let set: JwkSet = resp.json().await?;
    let mut keys = HashMap::new();
    for jwk in &set.keys {
        let Some(kid) = jwk.common.key_id.clone() else { continue; };
        match DecodingKey::from_jwk(jwk) {
            Ok(k) => { keys.insert(kid, k); }
            Err(e) => warn!("skipping unusable key {kid}: {e}"),
        }
    }
    debug!(count = keys.len(), ttl_secs = ttl.as_secs(), "fetched signing keys");
    Ok(CachedKeys { keys, fetched_at: Instant::now(), ttl })
}

pub(crate) fn parse_max_age(header: &str) -> Option<Duration> {
    header
        .split(',')
        .filter_map(|d| d.trim().strip_prefix("max-age="))
        .find_map(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> AppResult<VerifiedClaims> {
        let header = decode_header(token).map_err(|e| {
            debug!("token header rejected: {e}");
            AppError::invalid_token()
        })?;
        if header.alg != self.algorithm { return Err(AppError::invalid_token()); }
        let Some(kid) = header.kid.as_deref() else { return Err(AppError::invalid_token()); };
        let key = self.key_for(kid).await?;

        let data = decode::<IdTokenClaims>(token, &key, &self.validation()).map_err(|e| {
            debug!("token rejected: {e}");
            AppError::invalid_token()
        })?;
        let claims = data.claims;

        let latest = now_secs() + CLOCK_SKEW_SECS as i64;
        if claims.sub.is_empty() || claims.sub.len() > 128 || claims.iat > latest {
            return Err(AppError::invalid_token());
        }
        let Some(auth_time) = claims.auth_time.filter(|t| *t <= latest) else {
            return Err(AppError::invalid_token());
        };
        Ok(VerifiedClaims { uid: claims.sub, email: claims.email, auth_time })
    }
}
