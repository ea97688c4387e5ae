//! Client reducer.
//!
//! All client state changes happen in [`update`]: it takes the current state
//! and one event and returns the next state plus the commands the controller
//! must run. Command outcomes come back as events. Nothing here does I/O.

use serde::Serialize;

use crate::error::AppError;
use crate::identity::UserSession;

pub const BACKEND_ERROR_MESSAGE: &str = "Error calling backend";

/// The signed-in user as displayed; the token stays with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedInUser {
    pub uid: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientState {
    pub user: Option<SignedInUser>,
    pub clicks: i64,
    /// Set once the counter record is known to exist; gates the click action.
    pub counter_ready: bool,
    /// Last `/whoami` answer, pretty-printed.
    pub backend_message: Option<String>,
    /// Last auth or store failure worth showing.
    pub notice: Option<String>,
    /// Bumped on every session change; store results from an older session are dropped.
    pub generation: u64,
}

impl ClientState {
    pub fn can_click(&self) -> bool { self.user.is_some() && self.counter_ready }

    fn current_uid(&self) -> Option<&str> { self.user.as_ref().map(|u| u.uid.as_str()) }

    fn is_current(&self, uid: &str, generation: u64) -> bool {
        self.generation == generation && self.current_uid() == Some(uid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Provider session appeared, changed user, or went away.
    SessionChanged(Option<UserSession>),
    SignUpRequested { email: String, password: String },
    SignInRequested { email: String, password: String },
    SignOutRequested,
    /// Outcome of any of the three auth requests.
    AuthSettled(Result<(), AppError>),
    CounterLoaded { uid: String, generation: u64, result: Result<i64, AppError> },
    IncrementRequested,
    IncrementSettled { uid: String, generation: u64, result: Result<(), AppError> },
    BackendCallRequested,
    BackendResponded(Result<String, AppError>),
}

impl ClientEvent {
    /// Short name for logs; never includes credentials.
    pub fn label(&self) -> &'static str {
        match self {
            ClientEvent::SessionChanged(Some(_)) => "session_changed(signed_in)",
            ClientEvent::SessionChanged(None) => "session_changed(signed_out)",
            ClientEvent::SignUpRequested { .. } => "sign_up_requested",
            ClientEvent::SignInRequested { .. } => "sign_in_requested",
            ClientEvent::SignOutRequested => "sign_out_requested",
            ClientEvent::AuthSettled(_) => "auth_settled",
            ClientEvent::CounterLoaded { .. } => "counter_loaded",
            ClientEvent::IncrementRequested => "increment_requested",
            ClientEvent::IncrementSettled { .. } => "increment_settled",
            ClientEvent::BackendCallRequested => "backend_call_requested",
            ClientEvent::BackendResponded(_) => "backend_responded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Create the record if missing, then read it.
    LoadCounter { uid: String, generation: u64 },
    Increment { uid: String, generation: u64 },
    CallBackend,
    SignUp { email: String, password: String },
    SignIn { email: String, password: String },
    SignOut,
}

pub fn update(state: &ClientState, event: ClientEvent) -> (ClientState, Vec<ClientCommand>) {
    let mut next = state.clone();
    let commands = match event {
        ClientEvent::SessionChanged(Some(session)) => {
            let same_user = state.current_uid() == Some(session.uid.as_str());
            if !same_user {
                next.clicks = 0;
                next.counter_ready = false;
                next.backend_message = None;
            }
            next.notice = None;
            next.generation = state.generation.wrapping_add(1);
            next.user = Some(SignedInUser { uid: session.uid.clone(), email: session.email });
            vec![ClientCommand::LoadCounter { uid: session.uid, generation: next.generation }]
        }
        ClientEvent::SessionChanged(None) => {
            next = ClientState {
                notice: state.notice.clone(),
                generation: state.generation.wrapping_add(1),
                ..ClientState::default()
            };
            vec![]
        }
        ClientEvent::SignUpRequested { email, password } => vec![ClientCommand::SignUp { email, password }],
        ClientEvent::SignInRequested { email, password } => vec![ClientCommand::SignIn { email, password }],
        ClientEvent::SignOutRequested => vec![ClientCommand::SignOut],
        ClientEvent::AuthSettled(Ok(())) => vec![],
        ClientEvent::AuthSettled(Err(e)) => {
            next.notice = Some(e.to_string());
            vec![]
        }
        ClientEvent::CounterLoaded { uid, generation, result } => {
            if !state.is_current(&uid, generation) { return (next, vec![]); }
            match result {
                Ok(value) => {
                    next.clicks = value;
                    next.counter_ready = true;
                }
                Err(e) => {
                    next.clicks = 0;
                    next.counter_ready = false;
                    next.notice = Some(e.to_string());
                }
            }
            vec![]
        }
        ClientEvent::IncrementRequested => match state.current_uid() {
            Some(uid) if state.counter_ready => {
                vec![ClientCommand::Increment { uid: uid.to_string(), generation: state.generation }]
            }
            _ => vec![],
        },
        ClientEvent::IncrementSettled { uid, generation, result } => {
            if !state.is_current(&uid, generation) { return (next, vec![]); }
            match result {
                // Local display moves only after the store accepted the increment.
                Ok(()) => next.clicks += 1,
                Err(e) => next.notice = Some(e.to_string()),
            }
            vec![]
        }
        ClientEvent::BackendCallRequested => {
            if state.user.is_some() { vec![ClientCommand::CallBackend] } else { vec![] }
        }
        ClientEvent::BackendResponded(result) => {
            if state.user.is_some() {
                next.backend_message = Some(result.unwrap_or_else(|_| BACKEND_ERROR_MESSAGE.to_string()));
            }
            vec![]
        }
    };
    (next, commands)
}
