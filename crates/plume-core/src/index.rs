//! Index store abstraction for persisted catalog metadata.
//!
//! The index store is an external, sorted key-value substrate. The catalog
//! writes one record per tracked feed under a namespace prefix and replays
//! the namespace at startup to recreate its registry.
//!
//! Only the contract lives here, plus an in-memory reference implementation
//! for tests. Values pass through a [`Codec`](crate::codec::Codec) before
//! storage and after retrieval; the store itself treats them as opaque
//! bytes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

/// A single stored entry returned by [`IndexStore::list`].
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// The full storage key of the entry.
    pub id: String,
    /// The stored bytes.
    pub value: Bytes,
}

/// The persistent key-value substrate backing catalog metadata.
#[async_trait]
pub trait IndexStore: Send + Sync + 'static {
    /// Lists all entries whose key starts with `prefix`, in key order.
    ///
    /// Returns an empty vec if no entries match.
    async fn list(&self, prefix: &str) -> Result<Vec<IndexEntry>>;

    /// Reads an entry.
    ///
    /// Returns `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Writes an entry, replacing any previous value.
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Deletes an entry.
    ///
    /// Succeeds even if the key is absent (idempotent).
    async fn delete(&self, key: &str) -> Result<()>;

    /// Closes the store. Subsequent operations fail with [`Error::Closed`].
    async fn close(&self) -> Result<()>;
}

/// In-memory index store for testing.
///
/// Backed by a `BTreeMap` so listings come back sorted, matching the
/// trie-backed substrates used in production. Not durable.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    entries: RwLock<BTreeMap<String, Bytes>>,
    closed: AtomicBool,
}

/// Converts a lock poison error to a store error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::store("lock poisoned")
}

impl MemoryIndexStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the closed flag while keeping entries, simulating a process
    /// restart over the same underlying storage.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Returns the number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn entry_count(&self) -> Result<usize> {
        let count = {
            let entries = self.entries.read().map_err(poison_err)?;
            entries.len()
        };
        Ok(count)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed("index store".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn list(&self, prefix: &str) -> Result<Vec<IndexEntry>> {
        self.ensure_open()?;
        let entries = self.entries.read().map_err(poison_err)?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| IndexEntry {
                id: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        let entries = self.entries.read().map_err(poison_err)?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.ensure_open()?;
        let mut entries = self.entries.write().map_err(poison_err)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        let mut entries = self.entries.write().map_err(poison_err)?;
        entries.remove(key);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryIndexStore::new();
        store.put("feed/a", Bytes::from_static(b"1")).await.unwrap();

        assert_eq!(
            store.get("feed/a").await.unwrap(),
            Some(Bytes::from_static(b"1"))
        );

        store.delete("feed/a").await.unwrap();
        assert_eq!(store.get("feed/a").await.unwrap(), None);

        // Idempotent delete
        store.delete("feed/a").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped_and_sorted() {
        let store = MemoryIndexStore::new();
        store.put("feed/b", Bytes::from_static(b"2")).await.unwrap();
        store.put("feed/a", Bytes::from_static(b"1")).await.unwrap();
        store.put("other/x", Bytes::from_static(b"9")).await.unwrap();

        let entries = store.list("feed/").await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["feed/a", "feed/b"]);
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let store = MemoryIndexStore::new();
        store.close().await.unwrap();

        assert!(matches!(
            store.get("feed/a").await,
            Err(Error::Closed(_))
        ));
        assert!(matches!(
            store.put("feed/a", Bytes::new()).await,
            Err(Error::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_reopen_restores_access_and_entries() {
        let store = MemoryIndexStore::new();
        store.put("feed/a", Bytes::from_static(b"1")).await.unwrap();
        store.close().await.unwrap();

        store.reopen();
        assert_eq!(
            store.get("feed/a").await.unwrap(),
            Some(Bytes::from_static(b"1"))
        );
    }
}
