//! The click-counter client: a pure reducer over [`ClientState`], a
//! controller that runs its commands against the provider, the counter
//! store and the backend, and the backend caller itself.

pub mod state;
mod controller;
mod backend;

pub use state::{update, ClientCommand, ClientEvent, ClientState, SignedInUser, BACKEND_ERROR_MESSAGE};
pub use controller::{Controller, Services};
pub use backend::BackendClient;
