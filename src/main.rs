//!
//! tally server binary
//! -------------------
//! Starts the token-verifying backend. Configuration comes from the
//! environment (`PORT`, `TALLY_ALLOWED_ORIGINS`, `TALLY_CREDENTIALS_FILE`, ...);
//! `--port N` overrides `PORT`.

use std::env;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tally::config::ServerConfig;

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("tally server\n\nUSAGE:\n  tally [--port N]\n\nOPTIONS:\n  --port N    listen port (env: PORT, default 8080)\n\nENVIRONMENT:\n  TALLY_ALLOWED_ORIGINS    comma-separated CORS origins\n  TALLY_CREDENTIALS_FILE   local service-account key (default serviceAccountKey.json)\n  GOOGLE_APPLICATION_CREDENTIALS, TALLY_PROJECT_ID, GOOGLE_CLOUD_PROJECT   ambient credentials\n");
        return Ok(());
    }

    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(target: "startup", "tally starting: RUST_LOG='{}'", rust_log);

    let cfg = ServerConfig::load(&args);
    tally::server::run(cfg).await
}
