use serde::{Deserialize, Serialize};

/// Signed-in user as seen by the client. Lives for as long as the provider keeps it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSession {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Short-lived bearer token; refresh through the provider rather than reading this directly.
    pub id_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Claims extracted from a verified bearer token, scoped to one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifiedClaims {
    pub uid: String,
    pub email: Option<String>,
    /// Seconds since the epoch at which the user authenticated.
    pub auth_time: i64,
}
