//! Per-user counter records.
//!
//! One record per uid in the `users` collection, holding a single integer
//! field `clicks`. Records are created at 0 on first login and never
//! deleted. The only mutation is a store-side atomic increment.

use async_trait::async_trait;

use crate::error::AppResult;

mod memory;
mod firestore;

pub use memory::MemoryCounterStore;
pub use firestore::{FirestoreCounterStore, FIRESTORE_URL};

pub const USERS_COLLECTION: &str = "users";
pub const CLICKS_FIELD: &str = "clicks";

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Create the record at 0 if it does not exist and return the stored
    /// value. An existing record is never overwritten.
    async fn ensure(&self, uid: &str) -> AppResult<i64>;

    async fn get(&self, uid: &str) -> AppResult<Option<i64>>;

    /// Add `by` to the stored counter using the store's own atomic increment.
    /// Fails if the record does not exist.
    async fn increment(&self, uid: &str, by: i64) -> AppResult<()>;
}
