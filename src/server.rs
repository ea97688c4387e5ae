//!
//! tally HTTP server
//! -----------------
//! This module defines the Axum-based backend: a liveness route and one
//! route that verifies the caller's ID token and echoes its claims.
//!
//! Responsibilities:
//! - Resolving credentials at startup through the ordered credential chain.
//! - Verifying bearer tokens against the provider's published keys.
//! - Enforcing the configured CORS origin allow-list (credentials allowed).
//! - Graceful shutdown on Ctrl+C / SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::identity::{credentials, JwksVerifier, TokenVerifier, VerifiedClaims};

pub mod auth;

use auth::Authenticated;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self { Self { verifier } }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("ignoring unusable CORS origin '{o}': {e}");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60))
}

/// Routes plus CORS, ready to serve or to drive in tests.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/whoami", get(whoami))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn whoami(Authenticated(claims): Authenticated) -> Json<VerifiedClaims> {
    Json(claims)
}

/// Resolve credentials, build the verifier and serve until a shutdown signal.
///
/// The only fatal startup error is an exhausted credential chain.
pub async fn run(cfg: ServerConfig) -> anyhow::Result<()> {
    let chain = credentials::default_chain(&cfg);
    let creds = credentials::resolve(&chain).context("while resolving identity provider credentials")?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("while building HTTP client")?;
    let verifier = JwksVerifier::new(creds.project_id.clone(), cfg.jwks_url.clone(), http);
    let app = router(AppState::new(Arc::new(verifier)), &cfg.allowed_origins);

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.port).parse()?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("while binding {addr}"))?;
    info!("API listening on port {}", cfg.port);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
