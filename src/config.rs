//!
//! Environment-driven configuration
//! --------------------------------
//! Server settings (port, CORS allow-list, credential locations, key set URL)
//! and client settings (backend base URL, provider API key). CLI flags, when a
//! binary accepts them, override the environment.

use std::env;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::identity::GOOGLE_JWKS_URL;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &["http://localhost:5173", "https://web-app-dd054.web.app"];
pub const DEFAULT_CREDENTIALS_FILE: &str = "serviceAccountKey.json";
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub allowed_origins: Vec<String>,
    /// Local service-account file tried first at startup.
    pub credentials_file: PathBuf,
    pub jwks_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect(),
            credentials_file: PathBuf::from(DEFAULT_CREDENTIALS_FILE),
            jwks_url: GOOGLE_JWKS_URL.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from the process environment, then apply `--port N` from `args`.
    pub fn load(args: &[String]) -> Self {
        let mut cfg = Self::default();
        if let Some(port) = parse_port_env("PORT") { cfg.port = port; }
        if let Some(port) = parse_port_arg(args, "--port") { cfg.port = port; }
        if let Ok(origins) = env::var("TALLY_ALLOWED_ORIGINS") {
            let list = parse_origins(&origins);
            if list.is_empty() {
                warn!("TALLY_ALLOWED_ORIGINS is set but empty, keeping defaults");
            } else {
                cfg.allowed_origins = list;
            }
        }
        if let Ok(path) = env::var("TALLY_CREDENTIALS_FILE") { cfg.credentials_file = PathBuf::from(path); }
        if let Ok(url) = env::var("TALLY_JWKS_URL") { cfg.jwks_url = url; }
        info!(
            target: "startup",
            "server config: port={}, origins={:?}, credentials_file={:?}",
            cfg.port, cfg.allowed_origins, cfg.credentials_file
        );
        cfg
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub backend_url: String,
    /// Identity Toolkit web API key; without it the client runs offline.
    pub api_key: Option<String>,
    pub project_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { backend_url: DEFAULT_BACKEND_URL.to_string(), api_key: None, project_id: None }
    }
}

impl ClientConfig {
    pub fn load() -> Self {
        let non_empty = |k: &str| env::var(k).ok().filter(|v| !v.trim().is_empty());
        Self {
            backend_url: non_empty("TALLY_BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            api_key: non_empty("TALLY_API_KEY"),
            project_id: non_empty("TALLY_PROJECT_ID"),
        }
    }
}

fn parse_port_env(name: &str) -> Option<u16> {
    match env::var(name) {
        Ok(val) => match val.trim().parse::<u16>() {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Invalid {name} value '{val}': {e}, using default");
                None
            }
        },
        Err(_) => None,
    }
}

pub(crate) fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return args[i + 1].parse::<u16>().ok();
        }
        i += 1;
    }
    None
}

pub(crate) fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/'))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
