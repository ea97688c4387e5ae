//! Backend route tests: liveness, token verification outcomes and CORS.
//! The router is driven in-process; tokens come from the in-memory provider.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use tally::identity::{IdentityProvider, MemoryIdentityProvider};
use tally::server::{router, AppState};

const PROJECT: &str = "tally-test";
const ORIGIN: &str = "http://localhost:5173";

fn provider() -> MemoryIdentityProvider {
    MemoryIdentityProvider::new(PROJECT, b"whoami-test-key".to_vec())
}

fn app(idp: &MemoryIdentityProvider) -> Router {
    router(AppState::new(Arc::new(idp.verifier())), &[ORIGIN.to_string()])
}

async fn call(app: &Router, req: Request<Body>) -> Result<(StatusCode, Value)> {
    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = resp.into_body().collect().await?.to_bytes();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
    Ok((status, body))
}

fn whoami(auth: Option<&str>) -> Result<Request<Body>> {
    let mut b = Request::builder().uri("/whoami");
    if let Some(v) = auth { b = b.header(header::AUTHORIZATION, v); }
    Ok(b.body(Body::empty())?)
}

#[tokio::test]
async fn health_is_ok_with_or_without_auth() -> Result<()> {
    let idp = provider();
    let app = app(&idp);
    let (status, body) = call(&app, Request::builder().uri("/health").body(Body::empty())?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));

    let req = Request::builder().uri("/health").header(header::AUTHORIZATION, "Bearer garbage").body(Body::empty())?;
    let (status, body) = call(&app, req).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));
    Ok(())
}

#[tokio::test]
async fn valid_token_echoes_claims() -> Result<()> {
    let idp = provider();
    let session = idp.sign_up("alice@example.com", "correct-horse").await?;
    let token = idp.id_token().await?;
    let (status, body) = call(&app(&idp), whoami(Some(&format!("Bearer {token}")))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uid"], json!(session.uid));
    assert_eq!(body["email"], json!("alice@example.com"));
    assert!(body["auth_time"].as_i64().unwrap_or(0) > 0);
    Ok(())
}

#[tokio::test]
async fn email_is_null_when_absent() -> Result<()> {
    let idp = provider();
    let token = idp.sign(&idp.claims_for("anon-uid", None, 1_700_000_000))?;
    let (status, body) = call(&app(&idp), whoami(Some(&format!("Bearer {token}")))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"uid": "anon-uid", "email": null, "auth_time": 1_700_000_000}));
    Ok(())
}

#[tokio::test]
async fn missing_or_malformed_header_is_no_token() -> Result<()> {
    let idp = provider();
    let app = app(&idp);
    for auth in [None, Some("Bearer "), Some("Token abc"), Some("bearer abc")] {
        let (status, body) = call(&app, whoami(auth)?).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "header {auth:?}");
        assert_eq!(body, json!({"error": "No token provided"}), "header {auth:?}");
    }
    Ok(())
}

#[tokio::test]
async fn expired_token_is_rejected() -> Result<()> {
    let idp = provider();
    let mut claims = idp.claims_for("alice-uid", Some("alice@example.com"), 1_700_000_000);
    claims.iat -= 7200;
    claims.exp = claims.iat + 3600;
    let token = idp.sign(&claims)?;
    let (status, body) = call(&app(&idp), whoami(Some(&format!("Bearer {token}")))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "Invalid or expired token"}));
    Ok(())
}

#[tokio::test]
async fn tampered_or_foreign_tokens_are_rejected() -> Result<()> {
    let idp = provider();
    let app = app(&idp);
    idp.sign_up("alice@example.com", "correct-horse").await?;
    let token = idp.id_token().await?;

    // Flip one character of the payload.
    let mut parts: Vec<String> = token.split('.').map(|s| s.to_string()).collect();
    let payload = parts[1].clone();
    let last = payload.chars().last().unwrap_or('A');
    let swapped = if last == 'A' { 'B' } else { 'A' };
    parts[1] = format!("{}{}", &payload[..payload.len() - 1], swapped);
    let tampered = parts.join(".");

    // Same key id, different signing key.
    let stranger = MemoryIdentityProvider::new(PROJECT, b"some-other-key".to_vec());
    stranger.sign_up("mallory@example.com", "password").await?;
    let forged = stranger.id_token().await?;

    // Right key, wrong project.
    let other_project = MemoryIdentityProvider::new("another-project", b"whoami-test-key".to_vec());
    let wrong_aud = other_project.sign(&other_project.claims_for("alice-uid", None, 1_700_000_000))?;

    for bad in [tampered.as_str(), forged.as_str(), wrong_aud.as_str(), "not-a-jwt"] {
        let (status, body) = call(&app, whoami(Some(&format!("Bearer {bad}")))?).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Invalid or expired token"}));
    }
    Ok(())
}

#[tokio::test]
async fn cors_allows_only_listed_origins_with_credentials() -> Result<()> {
    let idp = provider();
    let app = app(&idp);

    let preflight = |origin: &str| {
        Request::builder()
            .method("OPTIONS")
            .uri("/whoami")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
            .body(Body::empty())
    };

    let resp = app.clone().oneshot(preflight(ORIGIN)?).await?;
    let h = resp.headers();
    assert_eq!(h.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).and_then(|v| v.to_str().ok()), Some(ORIGIN));
    assert_eq!(h.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).and_then(|v| v.to_str().ok()), Some("true"));

    let resp = app.clone().oneshot(preflight("https://evil.example")?).await?;
    assert!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    Ok(())
}
