use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::CounterStore;
use crate::error::{AppError, AppResult};

/// In-memory counter store. Each operation runs under one lock acquisition,
/// so increments serialize and none are lost.
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    map: Arc<RwLock<HashMap<String, i64>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.map.read().len() }
    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn ensure(&self, uid: &str) -> AppResult<i64> {
        if let Some(v) = self.map.read().get(uid) { return Ok(*v); }
        let mut map = self.map.write();
        Ok(*map.entry(uid.to_string()).or_insert(0))
    }

    async fn get(&self, uid: &str) -> AppResult<Option<i64>> {
        Ok(self.map.read().get(uid).copied())
    }

    async fn increment(&self, uid: &str, by: i64) -> AppResult<()> {
        let mut map = self.map.write();
        let Some(v) = map.get_mut(uid) else {
            return Err(AppError::internal(format!("no counter record for {uid}")));
        };
        *v += by;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_creates_at_zero_and_never_clobbers() -> anyhow::Result<()> {
        let store = MemoryCounterStore::new();
        assert_eq!(store.get("u1").await?, None);
        assert_eq!(store.ensure("u1").await?, 0);
        store.increment("u1", 1).await?;
        store.increment("u1", 1).await?;
        assert_eq!(store.ensure("u1").await?, 2);
        assert_eq!(store.get("u1").await?, Some(2));
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn increment_requires_a_record() {
        let store = MemoryCounterStore::new();
        assert!(store.increment("ghost", 1).await.is_err());
        assert!(store.is_empty());
    }
}
