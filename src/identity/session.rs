use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;

use super::principal::UserSession;
use crate::tprintln;

/// The provider's current session plus its change notifications.
///
/// Every sign-in, refresh and sign-out goes through here so subscribers see
/// one notification per change.
pub struct SessionSlot {
    tx: watch::Sender<Option<UserSession>>,
    expires_at: Mutex<Option<Instant>>,
}

impl Default for SessionSlot {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx, expires_at: Mutex::new(None) }
    }
}

impl SessionSlot {
    pub fn current(&self) -> Option<UserSession> { self.tx.borrow().clone() }

    pub fn subscribe(&self) -> watch::Receiver<Option<UserSession>> { self.tx.subscribe() }

    pub fn set(&self, session: UserSession, ttl: Duration) {
        tprintln!("session.set uid={} ttl_secs={}", session.uid, ttl.as_secs());
        *self.expires_at.lock() = Some(Instant::now() + ttl);
        self.tx.send_replace(Some(session));
    }

    /// Swap in a refreshed token without emitting a session change.
    pub fn refresh_token(&self, id_token: String, refresh_token: Option<String>, ttl: Duration) {
        *self.expires_at.lock() = Some(Instant::now() + ttl);
        self.tx.send_if_modified(|s| {
            if let Some(s) = s.as_mut() {
                s.id_token = id_token;
                if refresh_token.is_some() { s.refresh_token = refresh_token; }
            }
            false
        });
    }

    pub fn clear(&self) {
        *self.expires_at.lock() = None;
        self.tx.send_if_modified(|s| s.take().is_some());
    }

    /// True when the token will lapse within `margin`.
    pub fn expires_within(&self, margin: Duration) -> bool {
        match *self.expires_at.lock() {
            Some(at) => Instant::now() + margin >= at,
            None => true,
        }
    }
}
