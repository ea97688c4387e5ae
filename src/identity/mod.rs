//! Identity: who the user is on the client, and how the backend checks it.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod memory;
mod verifier;
pub mod credentials;

pub use principal::{UserSession, VerifiedClaims};
pub use session::SessionSlot;
pub use provider::{IdentityProvider, FirebaseAuth, IDENTITY_TOOLKIT_URL, SECURE_TOKEN_URL};
pub use memory::{MemoryIdentityProvider, IssuedClaims, MEMORY_KEY_ID};
pub use verifier::{TokenVerifier, JwksVerifier, GOOGLE_JWKS_URL, ISSUER_PREFIX};
pub use credentials::{Credentials, CredentialKind, CredentialSource};
