//! Log resource abstraction: the append-only log consumed by the catalog.
//!
//! The log engine itself (content storage, signing, replication) is an
//! external collaborator. This module defines the contract the catalog
//! programs against:
//!
//! - [`LogEngine`]: constructs unopened resource handles from a
//!   [`LogConfig`] (construction is synchronous; opening is not)
//! - [`LogResource`]: one append-only log with open/close/append/read/
//!   destroy operations, synchronously queryable open state, and an event
//!   channel for append/download notifications
//!
//! An in-memory reference engine ships here for tests. Its "disk" outlives
//! individual handles, so a handle created later over the same slot and key
//! observes previously appended records — enough to exercise catalog
//! recreation across restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::codec::ValueEncoding;
use crate::error::{Error, Result};
use crate::keys::{PublicKey, SecretKey};

/// Capacity of a log resource's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// An event raised by a log resource.
#[derive(Debug, Clone)]
pub enum LogEvent {
    /// A record was appended; `length` is the new log length.
    Append {
        /// The log length after the append.
        length: u64,
    },
    /// A record was received from a remote peer.
    Download {
        /// The sequence number of the downloaded record.
        seq: u64,
    },
}

/// Configuration for constructing a log resource handle.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Storage location for the resource's underlying bytes.
    pub slot: String,
    /// The feed's public identity.
    pub public_key: PublicKey,
    /// The feed's write capability, when the feed is writable.
    pub secret_key: Option<SecretKey>,
    /// The resolved payload encoding.
    pub encoding: ValueEncoding,
}

/// Constructs log resource handles.
///
/// Construction must be cheap and synchronous; the returned handle is not
/// yet open.
pub trait LogEngine: Send + Sync + 'static {
    /// Creates an unopened handle for the configured feed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if the handle cannot be constructed.
    fn create(&self, config: &LogConfig) -> Result<Arc<dyn LogResource>>;
}

/// One append-only log instance.
///
/// All state-changing operations are asynchronous and fallible. Open state
/// must be queryable synchronously so callers can take fast paths without
/// suspending.
#[async_trait]
pub trait LogResource: Send + Sync + 'static {
    /// Returns the feed's public identity.
    fn key(&self) -> PublicKey;

    /// Returns whether this handle holds write capability.
    fn is_writable(&self) -> bool;

    /// Returns whether the resource is currently open.
    fn is_opened(&self) -> bool;

    /// Returns whether the resource has been closed.
    fn is_closed(&self) -> bool;

    /// Returns the number of records in the log.
    fn len(&self) -> u64;

    /// Returns whether the log holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes to append/download events.
    fn subscribe(&self) -> broadcast::Receiver<LogEvent>;

    /// Opens the resource. Idempotent while not closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the resource was closed, or
    /// [`Error::Resource`] on an engine failure.
    async fn open(&self) -> Result<()>;

    /// Closes the resource. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Appends a record, returning its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resource`] if the resource is not open or not
    /// writable.
    async fn append(&self, data: Bytes) -> Result<u64>;

    /// Reads the record at `seq`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `seq` is past the end of the log.
    async fn get(&self, seq: u64) -> Result<Bytes>;

    /// Reads the most recently appended record, if any.
    async fn head(&self) -> Result<Option<Bytes>>;

    /// Removes the resource's underlying byte storage.
    ///
    /// Succeeds even if no bytes were ever written (idempotent). Does not
    /// require the resource to be open.
    async fn destroy_storage(&self) -> Result<()>;
}

/// Shared "disk" for the in-memory engine: slot key → records.
type Disk = Arc<RwLock<HashMap<String, Vec<Bytes>>>>;

/// Converts a lock poison error to a resource error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::resource("lock poisoned")
}

/// In-memory log engine for testing.
///
/// Handles created from the same engine share a disk map, so bytes written
/// through one handle remain visible to handles created later for the same
/// slot and key.
#[derive(Debug, Default)]
pub struct MemoryLogEngine {
    disk: Disk,
}

impl MemoryLogEngine {
    /// Creates an engine with an empty disk.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot keys currently holding bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn slots(&self) -> Result<Vec<String>> {
        let disk = self.disk.read().map_err(poison_err)?;
        Ok(disk.keys().cloned().collect())
    }

    fn slot_key(config: &LogConfig) -> String {
        format!("{}/{}", config.slot, config.public_key.to_hex())
    }
}

impl LogEngine for MemoryLogEngine {
    fn create(&self, config: &LogConfig) -> Result<Arc<dyn LogResource>> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Arc::new(MemoryLog {
            key: config.public_key,
            writable: config.secret_key.is_some(),
            slot_key: Self::slot_key(config),
            disk: Arc::clone(&self.disk),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events,
        }))
    }
}

/// In-memory log resource created by [`MemoryLogEngine`].
#[derive(Debug)]
pub struct MemoryLog {
    key: PublicKey,
    writable: bool,
    slot_key: String,
    disk: Disk,
    opened: AtomicBool,
    closed: AtomicBool,
    events: broadcast::Sender<LogEvent>,
}

#[async_trait]
impl LogResource for MemoryLog {
    fn key(&self) -> PublicKey {
        self.key
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn len(&self) -> u64 {
        self.disk
            .read()
            .map(|disk| disk.get(&self.slot_key).map_or(0, |records| records.len() as u64))
            .unwrap_or(0)
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    async fn open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed(format!("log {}", self.key)));
        }
        {
            let mut disk = self.disk.write().map_err(poison_err)?;
            disk.entry(self.slot_key.clone()).or_default();
        }
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.opened.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn append(&self, data: Bytes) -> Result<u64> {
        if !self.is_opened() {
            return Err(Error::resource(format!("log {} is not open", self.key)));
        }
        if !self.writable {
            return Err(Error::resource(format!("log {} is not writable", self.key)));
        }

        let length = {
            let mut disk = self.disk.write().map_err(poison_err)?;
            let records = disk.entry(self.slot_key.clone()).or_default();
            records.push(data);
            records.len() as u64
        };

        let _ = self.events.send(LogEvent::Append { length });
        Ok(length - 1)
    }

    async fn get(&self, seq: u64) -> Result<Bytes> {
        let disk = self.disk.read().map_err(poison_err)?;
        disk.get(&self.slot_key)
            .and_then(|records| records.get(usize::try_from(seq).ok()?))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("log {} seq {seq}", self.key)))
    }

    async fn head(&self) -> Result<Option<Bytes>> {
        let disk = self.disk.read().map_err(poison_err)?;
        Ok(disk
            .get(&self.slot_key)
            .and_then(|records| records.last())
            .cloned())
    }

    async fn destroy_storage(&self) -> Result<()> {
        let mut disk = self.disk.write().map_err(poison_err)?;
        disk.remove(&self.slot_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keypair;

    fn config(keypair: &Keypair, writable: bool) -> LogConfig {
        LogConfig {
            slot: "feeds".to_string(),
            public_key: keypair.public,
            secret_key: writable.then(|| keypair.secret.clone()),
            encoding: ValueEncoding::default(),
        }
    }

    #[tokio::test]
    async fn test_append_and_head() {
        let engine = MemoryLogEngine::new();
        let keypair = Keypair::generate();
        let log = engine.create(&config(&keypair, true)).unwrap();

        log.open().await.unwrap();
        assert!(log.is_opened());
        assert!(log.is_empty());

        let seq = log.append(Bytes::from_static(b"alice")).await.unwrap();
        assert_eq!(seq, 0);
        assert_eq!(log.len(), 1);
        assert_eq!(log.head().await.unwrap(), Some(Bytes::from_static(b"alice")));
        assert_eq!(log.get(0).await.unwrap(), Bytes::from_static(b"alice"));
    }

    #[tokio::test]
    async fn test_append_requires_open_and_write_capability() {
        let engine = MemoryLogEngine::new();
        let keypair = Keypair::generate();

        let unopened = engine.create(&config(&keypair, true)).unwrap();
        assert!(unopened.append(Bytes::new()).await.is_err());

        let readonly = engine.create(&config(&keypair, false)).unwrap();
        readonly.open().await.unwrap();
        assert!(matches!(
            readonly.append(Bytes::new()).await,
            Err(Error::Resource { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_after_close_fails() {
        let engine = MemoryLogEngine::new();
        let keypair = Keypair::generate();
        let log = engine.create(&config(&keypair, true)).unwrap();

        log.open().await.unwrap();
        log.close().await.unwrap();
        assert!(log.is_closed());
        assert!(!log.is_opened());

        assert!(matches!(log.open().await, Err(Error::Closed(_))));
    }

    #[tokio::test]
    async fn test_disk_outlives_handles() {
        let engine = MemoryLogEngine::new();
        let keypair = Keypair::generate();
        let cfg = config(&keypair, true);

        let first = engine.create(&cfg).unwrap();
        first.open().await.unwrap();
        first.append(Bytes::from_static(b"persisted")).await.unwrap();
        first.close().await.unwrap();

        let second = engine.create(&cfg).unwrap();
        second.open().await.unwrap();
        assert_eq!(
            second.head().await.unwrap(),
            Some(Bytes::from_static(b"persisted"))
        );
    }

    #[tokio::test]
    async fn test_destroy_storage_removes_slot() {
        let engine = MemoryLogEngine::new();
        let keypair = Keypair::generate();
        let log = engine.create(&config(&keypair, true)).unwrap();

        log.open().await.unwrap();
        log.append(Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(engine.slots().unwrap().len(), 1);

        log.destroy_storage().await.unwrap();
        assert!(engine.slots().unwrap().is_empty());

        // Idempotent
        log.destroy_storage().await.unwrap();
    }

    #[tokio::test]
    async fn test_append_emits_event() {
        let engine = MemoryLogEngine::new();
        let keypair = Keypair::generate();
        let log = engine.create(&config(&keypair, true)).unwrap();

        log.open().await.unwrap();
        let mut events = log.subscribe();
        log.append(Bytes::from_static(b"x")).await.unwrap();

        match events.recv().await.unwrap() {
            LogEvent::Append { length } => assert_eq!(length, 1),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
