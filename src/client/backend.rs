use reqwest::Url;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// Caller for the backend's identity echo route.
#[derive(Clone)]
pub struct BackendClient {
    base: Url,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(base: &str, http: reqwest::Client) -> AppResult<Self> {
        let base = Url::parse(base).map_err(|e| AppError::config(format!("invalid backend URL '{base}': {e}")))?;
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &Url { &self.base }

    /// `GET /whoami` with the bearer token. Whatever JSON the backend answers
    /// (claims or an error body) comes back pretty-printed; only transport
    /// failures and non-JSON bodies are errors.
    pub async fn whoami(&self, id_token: &str) -> AppResult<String> {
        let url = self.base.join("/whoami").map_err(|e| AppError::internal(e.to_string()))?;
        let resp = self.http.get(url).bearer_auth(id_token).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        debug!(%status, "whoami answered");
        serde_json::to_string_pretty(&body).map_err(|e| AppError::internal(e.to_string()))
    }

    pub async fn health(&self) -> AppResult<bool> {
        let url = self.base.join("/health").map_err(|e| AppError::internal(e.to_string()))?;
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() { return Ok(false); }
        let body: serde_json::Value = resp.json().await?;
        Ok(body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_base_url() {
        let err = BackendClient::new("not a url", reqwest::Client::new()).err();
        assert!(matches!(err, Some(AppError::Configuration(_))));
    }

    #[test]
    fn accepts_default_base() {
        let c = BackendClient::new("http://localhost:8080", reqwest::Client::new()).ok();
        assert_eq!(c.map(|c| c.base_url().as_str().to_string()), Some("http://localhost:8080/".into()));
    }
}
