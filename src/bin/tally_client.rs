//!
//! tally terminal client
//! ---------------------
//! Interactive driver for the click counter. With `TALLY_API_KEY` and
//! `TALLY_PROJECT_ID` set it talks to the managed identity provider and
//! document store; otherwise it runs against in-memory stand-ins.

use std::sync::Arc;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::{fmt, EnvFilter};

use tally::client::{BackendClient, ClientEvent, ClientState, Controller, Services};
use tally::config::ClientConfig;
use tally::identity::{FirebaseAuth, IdentityProvider, MemoryIdentityProvider};
use tally::store::{CounterStore, FirestoreCounterStore, MemoryCounterStore};

const HELP: &str = "Commands:\n  signup <email> <password>   create an account and sign in\n  login <email> <password>    sign in\n  logout                      sign out\n  click                       add one to your counter\n  whoami                      ask the backend who you are\n  status                      show current state\n  help                        show this help\n  quit | exit                 leave";

fn print_state(state: &ClientState) {
    match &state.user {
        Some(user) => {
            println!("Welcome back, {}", user.email.as_deref().unwrap_or(&user.uid));
            if state.counter_ready {
                println!("clicks: {}", state.clicks);
            } else {
                println!("clicks: {} (counter unavailable)", state.clicks);
            }
        }
        None => println!("Signed out. Sign in or create an account to start tracking your clicks."),
    }
    if let Some(msg) = &state.backend_message { println!("{msg}"); }
    if let Some(notice) = &state.notice { println!("! {notice}"); }
}

fn build_services(cfg: &ClientConfig) -> Result<Services> {
    let http = reqwest::Client::builder().build().context("while building HTTP client")?;
    let backend = BackendClient::new(&cfg.backend_url, http.clone())?;
    let (identity, store): (Arc<dyn IdentityProvider>, Arc<dyn CounterStore>) = match (&cfg.api_key, &cfg.project_id) {
        (Some(key), Some(project)) => {
            let identity: Arc<dyn IdentityProvider> = Arc::new(FirebaseAuth::new(key.clone(), http.clone()));
            let store: Arc<dyn CounterStore> = Arc::new(FirestoreCounterStore::new(project.clone(), identity.clone(), http));
            (identity, store)
        }
        _ => {
            println!("TALLY_API_KEY/TALLY_PROJECT_ID not set: running offline with in-memory accounts and counters.");
            let identity: Arc<dyn IdentityProvider> =
                Arc::new(MemoryIdentityProvider::new("tally-offline", b"tally-offline-signing-key".to_vec()));
            let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
            (identity, store)
        }
    };
    Ok(Services { identity, store, backend })
}

fn parse_line(line: &str) -> Option<std::result::Result<ClientEvent, &'static str>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let event = match parts.as_slice() {
        ["signup", email, password] => ClientEvent::SignUpRequested { email: email.to_string(), password: password.to_string() },
        ["login", email, password] => ClientEvent::SignInRequested { email: email.to_string(), password: password.to_string() },
        ["signup", ..] | ["login", ..] => return Some(Err("usage: signup|login <email> <password>")),
        ["logout"] => ClientEvent::SignOutRequested,
        ["click"] => ClientEvent::IncrementRequested,
        ["whoami"] => ClientEvent::BackendCallRequested,
        _ => return None,
    };
    Some(Ok(event))
}

/// Lines carrying a password stay out of the editor history.
fn keep_in_history(line: &str) -> bool {
    !matches!(line.split_whitespace().next(), Some("signup" | "login"))
}

fn main() -> Result<()> {
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init();

    let cfg = ClientConfig::load();
    let rt = tokio::runtime::Runtime::new().context("while starting runtime")?;
    let _guard = rt.enter();
    let controller = Controller::spawn(build_services(&cfg)?);

    println!("tally client (backend: {})\n{HELP}", cfg.backend_url);
    let mut rl = DefaultEditor::new()?;
    loop {
        let line = match rl.readline("tally> ") {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() { continue; }
        if keep_in_history(line) {
            let _ = rl.add_history_entry(line);
        }
        match line {
            "quit" | "exit" => break,
            "help" => { println!("{HELP}"); continue; }
            "status" => { print_state(&controller.state()); continue; }
            _ => {}
        }
        match parse_line(line) {
            Some(Ok(event)) => {
                if matches!(event, ClientEvent::IncrementRequested) && !controller.state().can_click() {
                    println!("sign in first");
                    continue;
                }
                let state = rt.block_on(controller.dispatch(event));
                print_state(&state);
            }
            Some(Err(usage)) => println!("{usage}"),
            None => println!("unknown command; type 'help'"),
        }
    }
    controller.shutdown();
    Ok(())
}
