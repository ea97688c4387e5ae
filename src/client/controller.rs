//! Client runtime.
//!
//! One dispatcher task owns the [`ClientState`]. Events arrive from the
//! caller, from command tasks and from the provider's session channel; each
//! is applied through [`update`] in arrival order and the returned commands
//! run on their own tasks, posting their outcome back as events.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::backend::BackendClient;
use super::state::{update, ClientCommand, ClientEvent, ClientState};
use crate::identity::{IdentityProvider, UserSession};
use crate::store::CounterStore;
use crate::tprintln;

/// External collaborators the commands talk to.
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn CounterStore>,
    pub backend: BackendClient,
}

pub struct Controller {
    tx: mpsc::UnboundedSender<ClientEvent>,
    state: watch::Receiver<ClientState>,
    // Events queued or commands running; zero means the controller is idle.
    outstanding: Arc<watch::Sender<usize>>,
    dispatcher: JoinHandle<()>,
}

impl Controller {
    /// Start the dispatcher and subscribe to the provider's session changes.
    /// Must be called inside a tokio runtime.
    pub fn spawn(services: Services) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ClientState::default());
        let outstanding = Arc::new(watch::channel(0usize).0);
        let sessions = services.identity.subscribe();

        let dispatcher = Dispatcher {
            services,
            state: ClientState::default(),
            state_tx,
            tx: tx.clone(),
            outstanding: outstanding.clone(),
        };
        let handle = tokio::spawn(dispatcher.run(rx, sessions));
        Self { tx, state: state_rx, outstanding, dispatcher: handle }
    }

    pub fn send(&self, event: ClientEvent) {
        self.outstanding.send_modify(|n| *n += 1);
        if self.tx.send(event).is_err() {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
            warn!("client dispatcher is gone; event dropped");
        }
    }

    pub fn state(&self) -> ClientState { self.state.borrow().clone() }

    pub fn subscribe(&self) -> watch::Receiver<ClientState> { self.state.clone() }

    /// Wait until every sent event and every command it caused has settled.
    pub async fn idle(&self) {
        let mut rx = self.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Send an event and wait for the resulting state.
    pub async fn dispatch(&self, event: ClientEvent) -> ClientState {
        self.send(event);
        self.idle().await;
        self.state()
    }

    /// Stop the dispatcher, which also drops the session subscription.
    /// Commands already running finish on their own.
    pub fn shutdown(self) {
        self.dispatcher.abort();
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

struct Dispatcher {
    services: Services,
    state: ClientState,
    state_tx: watch::Sender<ClientState>,
    tx: mpsc::UnboundedSender<ClientEvent>,
    outstanding: Arc<watch::Sender<usize>>,
}

impl Dispatcher {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ClientEvent>, mut sessions: watch::Receiver<Option<UserSession>>) {
        let initial = sessions.borrow_and_update().clone();
        if initial.is_some() {
            self.apply(ClientEvent::SessionChanged(initial));
        }
        let mut sessions_open = true;
        loop {
            tokio::select! {
                changed = sessions.changed(), if sessions_open => {
                    if changed.is_err() {
                        debug!("session channel closed");
                        sessions_open = false;
                        continue;
                    }
                    let current = sessions.borrow_and_update().clone();
                    self.apply(ClientEvent::SessionChanged(current));
                }
                event = rx.recv() => {
                    let Some(event) = event else { break; };
                    // A command that changed the session has already published it;
                    // apply that first so callers never observe the old user.
                    if sessions_open && sessions.has_changed().unwrap_or(false) {
                        let current = sessions.borrow_and_update().clone();
                        self.apply(ClientEvent::SessionChanged(current));
                    }
                    self.apply(event);
                    self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
                }
            }
        }
    }

    fn apply(&mut self, event: ClientEvent) {
        tprintln!("client.event {}", event.label());
        let (next, commands) = update(&self.state, event);
        self.state = next;
        self.state_tx.send_replace(self.state.clone());
        for command in commands {
            self.outstanding.send_modify(|n| *n += 1);
            let services = self.services.clone();
            let tx = self.tx.clone();
            let outstanding = self.outstanding.clone();
            tokio::spawn(async move {
                let outcome = execute(&services, command).await;
                if tx.send(outcome).is_err() {
                    outstanding.send_modify(|n| *n = n.saturating_sub(1));
                }
            });
        }
    }
}

async fn execute(services: &Services, command: ClientCommand) -> ClientEvent {
    match command {
        ClientCommand::LoadCounter { uid, generation } => {
            let result = services.store.ensure(&uid).await;
            if let Err(e) = &result { error!(%uid, "loading counter failed: {e}"); }
            ClientEvent::CounterLoaded { uid, generation, result }
        }
        ClientCommand::Increment { uid, generation } => {
            let result = services.store.increment(&uid, 1).await;
            if let Err(e) = &result { error!(%uid, "increment failed: {e}"); }
            ClientEvent::IncrementSettled { uid, generation, result }
        }
        ClientCommand::CallBackend => {
            let result = match services.identity.id_token().await {
                Ok(token) => services.backend.whoami(&token).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result { error!("backend call failed: {e}"); }
            ClientEvent::BackendResponded(result)
        }
        ClientCommand::SignUp { email, password } => {
            let result = services.identity.sign_up(&email, &password).await.map(|_| ());
            if let Err(e) = &result { warn!(%email, "sign-up failed: {e}"); }
            ClientEvent::AuthSettled(result)
        }
        ClientCommand::SignIn { email, password } => {
            let result = services.identity.sign_in(&email, &password).await.map(|_| ());
            if let Err(e) = &result { warn!(%email, "sign-in failed: {e}"); }
            ClientEvent::AuthSettled(result)
        }
        ClientCommand::SignOut => {
            let result = services.identity.sign_out().await;
            if let Err(e) = &result { warn!("sign-out failed: {e}"); }
            ClientEvent::AuthSettled(result)
        }
    }
}
