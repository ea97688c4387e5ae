//! Cloud Firestore adapter over the REST API.
//!
//! Requests are authorized with the signed-in user's ID token, so security
//! rules on the `users` collection apply exactly as they would to a browser
//! client. Creation uses `documentId` on a collection POST, which fails with
//! 409 instead of overwriting. Increments go through `:commit` with a
//! `fieldTransforms.increment` and an `exists: true` precondition.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{CounterStore, CLICKS_FIELD, USERS_COLLECTION};
use crate::error::{AppError, AppResult};
use crate::identity::IdentityProvider;

pub const FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";

pub struct FirestoreCounterStore {
    base_url: String,
    project_id: String,
    http: reqwest::Client,
    identity: Arc<dyn IdentityProvider>,
}

impl FirestoreCounterStore {
    pub fn new(project_id: impl Into<String>, identity: Arc<dyn IdentityProvider>, http: reqwest::Client) -> Self {
        Self::with_base_url(FIRESTORE_URL, project_id, identity, http)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        identity: Arc<dyn IdentityProvider>,
        http: reqwest::Client,
    ) -> Self {
        Self { base_url: base_url.into(), project_id: project_id.into(), http, identity }
    }

    fn database(&self) -> String { format!("projects/{}/databases/(default)", self.project_id) }

    /// Resource name as it appears in request bodies; the uid is not escaped.
    fn document_name(&self, uid: &str) -> String {
        format!("{}/documents/{USERS_COLLECTION}/{uid}", self.database())
    }

    fn document_url(&self, uid: &str) -> String {
        format!("{}/{}/documents/{USERS_COLLECTION}/{}", self.base_url, self.database(), urlencoding::encode(uid))
    }

    async fn bearer(&self) -> AppResult<String> { self.identity.id_token().await }

    async fn fetch(&self, uid: &str) -> AppResult<Option<i64>> {
        let url = self.document_url(uid);
        let resp = self.http.get(url).bearer_auth(self.bearer().await?).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let doc: Value = resp.json().await?;
                Ok(Some(clicks_of(&doc)))
            }
            s => Err(AppError::upstream(format!("firestore get {uid}: HTTP {s}"))),
        }
    }

    /// Returns false when the document already existed.
    async fn create(&self, uid: &str) -> AppResult<bool> {
        let url = format!(
            "{}/{}/documents/{USERS_COLLECTION}?documentId={}",
            self.base_url,
            self.database(),
            urlencoding::encode(uid)
        );
        let body = json!({ "fields": { CLICKS_FIELD: { "integerValue": "0" } } });
        let resp = self.http.post(url).bearer_auth(self.bearer().await?).json(&body).send().await?;
        match resp.status() {
            StatusCode::CONFLICT => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(AppError::upstream(format!("firestore create {uid}: HTTP {s}"))),
        }
    }
}

/// Firestore encodes int64 as a decimal string; a missing field reads as 0.
fn clicks_of(doc: &Value) -> i64 {
    let field = &doc["fields"][CLICKS_FIELD];
    field["integerValue"]
        .as_str()
        .and_then(|s| s.parse::<i64>().ok())
        .or_else(|| field["integerValue"].as_i64())
        .or_else(|| field["doubleValue"].as_f64().map(|f| f as i64))
        .unwrap_or(0)
}

#[async_trait]
impl CounterStore for FirestoreCounterStore {
    async fn ensure(&self, uid: &str) -> AppResult<i64> {
        if let Some(v) = self.fetch(uid).await? { return Ok(v); }
        if self.create(uid).await? {
            info!(uid, "counter record created");
            return Ok(0);
        }
        // Lost a creation race with another session; read what it wrote.
        debug!(uid, "counter record appeared concurrently");
        Ok(self.fetch(uid).await?.unwrap_or(0))
    }

    async fn get(&self, uid: &str) -> AppResult<Option<i64>> { self.fetch(uid).await }

    async fn increment(&self, uid: &str, by: i64) -> AppResult<()> {
        let url = format!("{}/{}/documents:commit", self.base_url, self.database());
        let body = json!({
            "writes": [{
                "transform": {
                    "document": self.document_name(uid),
                    "fieldTransforms": [{ "fieldPath": CLICKS_FIELD, "increment": { "integerValue": by.to_string() } }]
                },
                "currentDocument": { "exists": true }
            }]
        });
        let resp = self.http.post(url).bearer_auth(self.bearer().await?).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::upstream(format!("firestore increment {uid}: HTTP {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryIdentityProvider;

    #[test]
    fn clicks_decoding() {
        assert_eq!(clicks_of(&json!({"fields": {"clicks": {"integerValue": "42"}}})), 42);
        assert_eq!(clicks_of(&json!({"fields": {"clicks": {"doubleValue": 3.0}}})), 3);
        assert_eq!(clicks_of(&json!({"fields": {}})), 0);
        assert_eq!(clicks_of(&json!({})), 0);
    }

    #[test]
    fn document_paths() {
        let idp: Arc<dyn IdentityProvider> = Arc::new(MemoryIdentityProvider::new("demo", b"k".to_vec()));
        let store = FirestoreCounterStore::new("demo", idp, reqwest::Client::new());
        assert_eq!(store.document_name("alice-uid"), "projects/demo/databases/(default)/documents/users/alice-uid");
        assert_eq!(store.document_name("a b"), "projects/demo/databases/(default)/documents/users/a b");
        assert_eq!(
            store.document_url("a b"),
            "https://firestore.googleapis.com/v1/projects/demo/databases/(default)/documents/users/a%20b"
        );
    }
}
