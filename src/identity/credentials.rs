//! Startup credential chain.
//!
//! Sources are tried in order and the first one that yields credentials wins.
//! A source that is simply not present (no file, no variable) is skipped
//! quietly; a source that is present but unreadable is logged and skipped.
//! Running out of sources is the one fatal configuration error.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};

/// Ambient project variables, in lookup order.
pub const PROJECT_ENV_VARS: &[&str] = &["TALLY_PROJECT_ID", "GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialKind {
    /// Explicit local key file.
    LocalFile(PathBuf),
    /// File named by `GOOGLE_APPLICATION_CREDENTIALS`.
    ApplicationDefault(PathBuf),
    /// Project id from the runtime environment; the platform supplies identity.
    Environment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub project_id: String,
    pub client_email: Option<String>,
    pub kind: CredentialKind,
}

pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &str;
    /// `Ok(None)` when this source has nothing to offer.
    fn load(&self) -> AppResult<Option<Credentials>>;
}

#[derive(Debug, Deserialize)]
struct KeyFile {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    quota_project_id: Option<String>,
    #[serde(default)]
    client_email: Option<String>,
}

fn read_key_file(path: &Path) -> AppResult<Option<KeyFile>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(AppError::config(format!("cannot read {}: {e}", path.display()))),
    };
    serde_json::from_slice::<KeyFile>(&bytes)
        .map(Some)
        .map_err(|e| AppError::config(format!("malformed key file {}: {e}", path.display())))
}

/// A JSON key file on disk, either at a configured path or at the path an
/// environment variable names.
pub struct KeyFileSource {
    label: String,
    path: Option<PathBuf>,
    ambient: bool,
}

impl KeyFileSource {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self { label: "local key file".into(), path: Some(path.into()), ambient: false }
    }

    pub fn application_default(path: Option<PathBuf>) -> Self {
        Self { label: "application default credentials".into(), path, ambient: true }
    }

    pub fn application_default_from_env() -> Self {
        Self::application_default(std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from))
    }
}

impl CredentialSource for KeyFileSource {
    fn name(&self) -> &str { &self.label }

    fn load(&self) -> AppResult<Option<Credentials>> {
        let Some(path) = self.path.as_ref() else { return Ok(None); };
        let Some(key) = read_key_file(path)? else { return Ok(None); };
        let Some(project_id) = key.project_id.or(key.quota_project_id).filter(|p| !p.trim().is_empty()) else {
            return Err(AppError::config(format!("{} has no project_id", path.display())));
        };
        let kind = if self.ambient {
            CredentialKind::ApplicationDefault(path.clone())
        } else {
            CredentialKind::LocalFile(path.clone())
        };
        Ok(Some(Credentials { project_id, client_email: key.client_email, kind }))
    }
}

/// Project id supplied by the hosting platform's environment.
pub struct EnvProjectSource {
    values: Vec<(String, Option<String>)>,
}

impl EnvProjectSource {
    pub fn from_env() -> Self {
        Self::from_pairs(PROJECT_ENV_VARS.iter().map(|k| (k.to_string(), std::env::var(k).ok())))
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Option<String>)>) -> Self {
        Self { values: pairs.into_iter().collect() }
    }
}

impl CredentialSource for EnvProjectSource {
    fn name(&self) -> &str { "environment project" }

    fn load(&self) -> AppResult<Option<Credentials>> {
        for (var, value) in &self.values {
            if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                return Ok(Some(Credentials {
                    project_id: v.to_string(),
                    client_email: None,
                    kind: CredentialKind::Environment(var.clone()),
                }));
            }
        }
        Ok(None)
    }
}

/// Local file first, then the ambient mechanisms.
pub fn default_chain(cfg: &ServerConfig) -> Vec<Box<dyn CredentialSource>> {
    vec![
        Box::new(KeyFileSource::local(cfg.credentials_file.clone())),
        Box::new(KeyFileSource::application_default_from_env()),
        Box::new(EnvProjectSource::from_env()),
    ]
}

pub fn resolve(chain: &[Box<dyn CredentialSource>]) -> AppResult<Credentials> {
    for source in chain {
        match source.load() {
            Ok(Some(creds)) => {
                info!(target: "startup", "credentials loaded from {} (project={})", source.name(), creds.project_id);
                return Ok(creds);
            }
            Ok(None) => debug!("credential source '{}' not available", source.name()),
            Err(e) => warn!("credential source '{}' skipped: {e}", source.name()),
        }
    }
    Err(AppError::config(format!(
        "no credentials available: tried {}",
        chain.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, Option<&str>)]) -> EnvProjectSource {
        EnvProjectSource::from_pairs(pairs.iter().map(|(k, v)| (k.to_string(), v.map(|s| s.to_string()))))
    }

    #[test]
    fn local_file_wins_over_environment() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("serviceAccountKey.json");
        std::fs::write(&path, r#"{"type":"service_account","project_id":"demo-local","client_email":"svc@demo.iam"}"#)?;
        let chain: Vec<Box<dyn CredentialSource>> = vec![
            Box::new(KeyFileSource::local(&path)),
            Box::new(env(&[("TALLY_PROJECT_ID", Some("demo-env"))])),
        ];
        let creds = resolve(&chain)?;
        assert_eq!(creds.project_id, "demo-local");
        assert_eq!(creds.client_email.as_deref(), Some("svc@demo.iam"));
        assert_eq!(creds.kind, CredentialKind::LocalFile(path));
        Ok(())
    }

    #[test]
    fn missing_file_falls_through_to_ambient() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let chain: Vec<Box<dyn CredentialSource>> = vec![
            Box::new(KeyFileSource::local(tmp.path().join("absent.json"))),
            Box::new(KeyFileSource::application_default(None)),
            Box::new(env(&[("TALLY_PROJECT_ID", None), ("GOOGLE_CLOUD_PROJECT", Some("cloud-proj"))])),
        ];
        let creds = resolve(&chain)?;
        assert_eq!(creds.project_id, "cloud-proj");
        assert_eq!(creds.kind, CredentialKind::Environment("GOOGLE_CLOUD_PROJECT".into()));
        Ok(())
    }

    #[test]
    fn malformed_file_is_skipped_not_fatal() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("key.json");
        std::fs::write(&path, "not json")?;
        let chain: Vec<Box<dyn CredentialSource>> = vec![
            Box::new(KeyFileSource::local(&path)),
            Box::new(env(&[("GCLOUD_PROJECT", Some("fallback"))])),
        ];
        assert_eq!(resolve(&chain)?.project_id, "fallback");
        Ok(())
    }

    #[test]
    fn application_default_file_is_used() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("adc.json");
        std::fs::write(&path, r#"{"type":"authorized_user","quota_project_id":"adc-proj"}"#)?;
        let chain: Vec<Box<dyn CredentialSource>> = vec![Box::new(KeyFileSource::application_default(Some(path.clone())))];
        let creds = resolve(&chain)?;
        assert_eq!(creds.project_id, "adc-proj");
        assert_eq!(creds.kind, CredentialKind::ApplicationDefault(path));
        Ok(())
    }

    #[test]
    fn exhausted_chain_is_configuration_error() {
        let chain: Vec<Box<dyn CredentialSource>> = vec![
            Box::new(KeyFileSource::application_default(None)),
            Box::new(env(&[("TALLY_PROJECT_ID", Some("  "))])),
        ];
        let err = resolve(&chain).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)), "got {err:?}");
    }
}
