//! The feed catalog: registry, persistence, and aggregation.
//!
//! A [`FeedCatalog`] tracks many feeds by path and by identity, persists
//! enough metadata to recreate its registry after a restart, and aggregates
//! events and read access across every open feed.
//!
//! ## Registry
//!
//! Two unique indices — path → descriptor and discovery key → descriptor —
//! are maintained together under one synchronous lock, mutated only in
//! short critical sections that never span a suspension point.
//!
//! ## Startup
//!
//! Construction is two-phase: [`FeedCatalog::new`] builds the instance and
//! [`FeedCatalog::initialize`] replays the persisted namespace, recreating
//! one idle descriptor per record. Recreation never opens resources — open
//! is always caller-driven and lazy. Every registry-facing operation awaits
//! readiness first. [`FeedCatalog::create`] combines both phases.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use plume_core::codec::{Codec, CodecRegistry, JsonCodec};
use plume_core::index::IndexStore;
use plume_core::keys::{DiscoveryKey, PublicKey, SecretKey};
use plume_core::resource::{LogEngine, LogEvent, LogResource};

use crate::descriptor::{DescriptorOptions, FeedDescriptor};
use crate::error::{CatalogError, Result};
use crate::events::{CatalogEvent, EventOrigin};
use crate::record::DescriptorRecord;
use crate::stream::{spawn_feed_pump, ReadStreamOptions, RecordStream};

/// Capacity of a merged read stream's record channel.
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Configuration for a [`FeedCatalog`].
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    /// Namespace prefix for persisted records.
    pub namespace: String,
    /// Default storage location for feed bytes, overridable per feed.
    pub storage_dir: String,
    /// Default payload encoding name applied when a feed requests none.
    pub value_encoding: Option<String>,
    /// Named codecs available to feeds of this catalog.
    pub codecs: CodecRegistry,
    /// Optional duration bound for feed open and close.
    pub timeout: Option<Duration>,
    /// Capacity of the catalog's event broadcast channel.
    pub event_capacity: usize,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            namespace: "feed".to_string(),
            storage_dir: "feeds".to_string(),
            value_encoding: None,
            codecs: CodecRegistry::new(),
            timeout: None,
            event_capacity: 256,
        }
    }
}

/// Options for [`FeedCatalog::open_or_create`].
#[derive(Debug, Default)]
pub struct OpenOptions {
    /// The feed's public identity. Generated when absent.
    pub key: Option<PublicKey>,
    /// The feed's write capability. Requires `key`.
    pub secret_key: Option<SecretKey>,
    /// Payload encoding name, resolved against the catalog's codecs.
    pub value_encoding: Option<String>,
    /// Opaque caller-defined payload, persisted verbatim.
    pub metadata: Option<serde_json::Value>,
    /// Storage location override for this feed.
    pub storage_dir: Option<String>,
    /// Open/close duration bound override for this feed.
    pub timeout: Option<Duration>,
}

/// The two unique registry indices, always mutated together.
#[derive(Default)]
struct Registry {
    by_path: HashMap<String, FeedDescriptor>,
    by_discovery: HashMap<String, FeedDescriptor>,
}

/// Management of multiple feeds: create, open, find, and delete feeds over
/// a persistent metadata store.
pub struct FeedCatalog {
    engine: Arc<dyn LogEngine>,
    index: Arc<dyn IndexStore>,
    namespace: String,
    storage_dir: String,
    default_encoding: Option<String>,
    codecs: CodecRegistry,
    record_codec: Arc<dyn Codec>,
    timeout: Option<Duration>,
    registry: RwLock<Registry>,
    events: broadcast::Sender<CatalogEvent>,
    subscriptions: StdMutex<HashMap<String, JoinHandle<()>>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl std::fmt::Debug for FeedCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedCatalog")
            .field("namespace", &self.namespace)
            .field("storage_dir", &self.storage_dir)
            .finish_non_exhaustive()
    }
}

impl FeedCatalog {
    /// Creates a catalog without initializing it.
    ///
    /// Call [`FeedCatalog::initialize`] once before use, or use
    /// [`FeedCatalog::create`].
    #[must_use]
    pub fn new(
        engine: Arc<dyn LogEngine>,
        index: Arc<dyn IndexStore>,
        options: CatalogOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity);
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            engine,
            index,
            namespace: options.namespace,
            storage_dir: options.storage_dir,
            default_encoding: options.value_encoding,
            codecs: options.codecs,
            record_codec: Arc::new(JsonCodec),
            timeout: options.timeout,
            registry: RwLock::new(Registry::default()),
            events,
            subscriptions: StdMutex::new(HashMap::new()),
            ready_tx,
            ready_rx,
        }
    }

    /// Creates and initializes a catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] if the persisted namespace cannot be
    /// replayed.
    pub async fn create(
        engine: Arc<dyn LogEngine>,
        index: Arc<dyn IndexStore>,
        options: CatalogOptions,
    ) -> Result<Self> {
        let catalog = Self::new(engine, index, options);
        catalog.initialize().await?;
        Ok(catalog)
    }

    /// Replays the persisted namespace, recreating one idle descriptor per
    /// record, then marks the catalog ready.
    ///
    /// Call once after construction. Recreation never opens resources.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] on an index store or record decoding
    /// failure, or [`CatalogError::Conflict`] if the persisted set violates
    /// path or key uniqueness.
    pub async fn initialize(&self) -> Result<()> {
        if *self.ready_rx.borrow() {
            return Ok(());
        }

        let prefix = format!("{}/", self.namespace);
        let entries = self
            .index
            .list(&prefix)
            .await
            .map_err(|e| CatalogError::store_from(&e))?;
        let count = entries.len();

        for entry in entries {
            let record = DescriptorRecord::decode(self.record_codec.as_ref(), &entry.value)
                .map_err(|e| CatalogError::store_from(&e))?;
            let descriptor = self.descriptor_from_record(record)?;
            self.register(&descriptor)?;
        }

        let _ = self.ready_tx.send(true);
        info!(feeds = count, namespace = %self.namespace, "catalog initialized");
        Ok(())
    }

    /// Waits until startup recreation has completed.
    pub async fn ready(&self) {
        if *self.ready_rx.borrow() {
            return;
        }
        let mut rx = self.ready_rx.clone();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Subscribes to catalog-wide events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }

    /// Opens an existing feed or creates a new one.
    ///
    /// If the feed is already registered but not open, it is opened instead
    /// of created. After a successful open the descriptor's metadata is
    /// persisted (when changed) and its events are wired catalog-wide.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Conflict`] if `path` is registered with a
    /// different key or the requested key belongs to a different path;
    /// otherwise propagates descriptor open and persistence errors.
    pub async fn open_or_create(
        &self,
        path: &str,
        options: OpenOptions,
    ) -> Result<Arc<dyn LogResource>> {
        if path.is_empty() {
            return Err(CatalogError::validation("the path is required"));
        }
        self.ready().await;

        let descriptor = self.find_or_create_descriptor(path, &options)?;

        // Fast return without need to lock the descriptor.
        if descriptor.is_opened() {
            if let Some(handle) = descriptor.handle() {
                return Ok(handle);
            }
        }

        let handle = descriptor.open().await?;
        self.after_open(&descriptor, &handle).await?;
        Ok(handle)
    }

    /// Opens every registered feed matching the filter and returns their
    /// handles.
    ///
    /// Used to lazily reopen descriptors recreated at startup.
    ///
    /// # Errors
    ///
    /// Propagates the first open or persistence failure; every matching
    /// feed is attempted.
    pub async fn load<F>(&self, filter: F) -> Result<Vec<Arc<dyn LogResource>>>
    where
        F: Fn(&FeedDescriptor) -> bool,
    {
        self.ready().await;

        let matching: Vec<_> = self
            .descriptors()
            .into_iter()
            .filter(|descriptor| filter(descriptor))
            .collect();

        let results = join_all(matching.iter().map(|descriptor| async {
            let handle = descriptor.open().await?;
            self.after_open(descriptor, &handle).await?;
            Ok::<_, CatalogError>(handle)
        }))
        .await;

        results.into_iter().collect()
    }

    /// Closes the feed registered at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] if no feed is registered at
    /// `path`; otherwise propagates the descriptor close outcome.
    pub async fn close_feed(&self, path: &str) -> Result<()> {
        self.ready().await;
        let descriptor = self
            .descriptor_by_path(path)
            .ok_or_else(|| CatalogError::not_found("feed", path))?;
        descriptor.close().await
    }

    /// Closes every open feed, then the index store.
    ///
    /// All feed closes run concurrently and are awaited before any error is
    /// surfaced; the first failure (in descriptor order) is then returned
    /// and the index store is left open so the close can be retried.
    ///
    /// # Errors
    ///
    /// Returns the first feed close failure, or [`CatalogError::Store`] if
    /// the index store failed to close.
    pub async fn close(&self) -> Result<()> {
        self.ready().await;

        let open = self.open_descriptors();
        let results = join_all(open.iter().map(FeedDescriptor::close)).await;

        for (_, task) in lock_or_recover(&self.subscriptions).drain() {
            task.abort();
        }

        if let Some(err) = results.into_iter().find_map(std::result::Result::err) {
            return Err(err);
        }

        self.index
            .close()
            .await
            .map_err(|e| CatalogError::store_from(&e))?;
        Ok(())
    }

    /// Removes the descriptor at `path` from the catalog and deletes its
    /// persisted record.
    ///
    /// Does **not** close the underlying resource: stopping tracking and
    /// releasing the resource are deliberately separate. The whole removal
    /// happens under the descriptor's lock.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] if no feed is registered at
    /// `path`, or [`CatalogError::Store`] if the record deletion failed (the
    /// lock is still released).
    pub async fn delete_descriptor(&self, path: &str) -> Result<()> {
        self.ready().await;
        let descriptor = self
            .descriptor_by_path(path)
            .ok_or_else(|| CatalogError::not_found("feed", path))?;

        let _guard = descriptor.lock().await;

        let record_key = DescriptorRecord::storage_key(&self.namespace, &descriptor.key());
        self.index
            .delete(&record_key)
            .await
            .map_err(|e| CatalogError::store_from(&e))?;

        let discovery_hex = descriptor.discovery_key().to_hex();
        {
            let mut registry = self.write_registry();
            registry.by_path.remove(descriptor.path());
            registry.by_discovery.remove(&discovery_hex);
        }

        if let Some(task) = lock_or_recover(&self.subscriptions).remove(&discovery_hex) {
            task.abort();
        }

        let _ = self.events.send(CatalogEvent::DescriptorRemoved {
            path: descriptor.path().to_string(),
            key: descriptor.key(),
        });
        debug!(path, "descriptor removed");
        Ok(())
    }

    /// Returns every registered descriptor, in no particular order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<FeedDescriptor> {
        self.read_registry().by_path.values().cloned().collect()
    }

    /// Returns every descriptor whose resource is currently open.
    #[must_use]
    pub fn open_descriptors(&self) -> Vec<FeedDescriptor> {
        self.descriptors()
            .into_iter()
            .filter(FeedDescriptor::is_opened)
            .collect()
    }

    /// Looks up a descriptor by path.
    #[must_use]
    pub fn descriptor_by_path(&self, path: &str) -> Option<FeedDescriptor> {
        self.read_registry().by_path.get(path).cloned()
    }

    /// Looks up a descriptor by public key.
    #[must_use]
    pub fn descriptor_by_key(&self, key: &PublicKey) -> Option<FeedDescriptor> {
        let discovery_hex = DiscoveryKey::derive(key).to_hex();
        self.read_registry().by_discovery.get(&discovery_hex).cloned()
    }

    /// Returns the handles of every currently-open feed.
    #[must_use]
    pub fn open_feeds(&self) -> Vec<Arc<dyn LogResource>> {
        self.open_descriptors()
            .iter()
            .filter_map(FeedDescriptor::handle)
            .collect()
    }

    /// Finds the first open feed whose descriptor matches the filter.
    #[must_use]
    pub fn find_feed<F>(&self, filter: F) -> Option<Arc<dyn LogResource>>
    where
        F: Fn(&FeedDescriptor) -> bool,
    {
        self.open_descriptors()
            .iter()
            .find(|descriptor| filter(descriptor))
            .and_then(FeedDescriptor::handle)
    }

    /// Returns the handles of every open feed whose descriptor matches the
    /// filter.
    #[must_use]
    pub fn filter_feeds<F>(&self, filter: F) -> Vec<Arc<dyn LogResource>>
    where
        F: Fn(&FeedDescriptor) -> bool,
    {
        self.open_descriptors()
            .iter()
            .filter(|descriptor| filter(descriptor))
            .filter_map(FeedDescriptor::handle)
            .collect()
    }

    /// Creates a merged live read stream over every open feed.
    ///
    /// Equivalent to [`FeedCatalog::create_read_stream_by_filter`] with a
    /// filter that matches everything.
    #[must_use]
    pub fn create_read_stream(&self, options: ReadStreamOptions) -> RecordStream {
        self.create_read_stream_by_filter(|_| true, options)
    }

    /// Creates a merged live read stream over every open feed matching the
    /// filter.
    ///
    /// Feeds that become available while the stream is alive and match the
    /// filter are absorbed into it; the event subscription is released when
    /// the stream is dropped.
    #[must_use]
    pub fn create_read_stream_by_filter<F>(
        &self,
        filter: F,
        options: ReadStreamOptions,
    ) -> RecordStream
    where
        F: Fn(&FeedDescriptor) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let mut pumped: HashSet<String> = HashSet::new();

        // Subscribe before snapshotting membership so a feed opening in
        // between is seen exactly once (the set deduplicates).
        let mut events = self.events.subscribe();

        for descriptor in self.open_descriptors() {
            if !filter(&descriptor) {
                continue;
            }
            let Some(handle) = descriptor.handle() else {
                continue;
            };
            pumped.insert(descriptor.discovery_key().to_hex());
            spawn_feed_pump(tx.clone(), descriptor, handle, options);
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    event = events.recv() => match event {
                        Ok(CatalogEvent::FeedAvailable { origin }) => {
                            let discovery_hex = origin.descriptor.discovery_key().to_hex();
                            if !pumped.contains(&discovery_hex) && filter(&origin.descriptor) {
                                pumped.insert(discovery_hex);
                                spawn_feed_pump(
                                    tx.clone(),
                                    origin.descriptor,
                                    origin.resource,
                                    options,
                                );
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        RecordStream::new(rx)
    }

    /// Finds the descriptor at `path`, creating and registering one when
    /// absent. One synchronous critical section covers the conflict checks
    /// and both index insertions.
    fn find_or_create_descriptor(
        &self,
        path: &str,
        options: &OpenOptions,
    ) -> Result<FeedDescriptor> {
        let mut registry = self.write_registry();

        if let Some(existing) = registry.by_path.get(path) {
            if let Some(key) = &options.key {
                if *key != existing.key() {
                    return Err(CatalogError::conflict(format!(
                        "feed '{path}' is registered with a different public key"
                    )));
                }
            }
            return Ok(existing.clone());
        }

        if let Some(key) = &options.key {
            let discovery_hex = DiscoveryKey::derive(key).to_hex();
            if let Some(owner) = registry.by_discovery.get(&discovery_hex) {
                return Err(CatalogError::conflict(format!(
                    "public key {key} is already registered at '{}'",
                    owner.path()
                )));
            }
        }

        let encoding_name = options
            .value_encoding
            .clone()
            .or_else(|| self.default_encoding.clone())
            .unwrap_or_else(|| "binary".to_string());

        let descriptor = FeedDescriptor::new(
            path,
            Arc::clone(&self.engine),
            DescriptorOptions {
                key: options.key,
                secret_key: options.secret_key.clone(),
                encoding: self.codecs.resolve(&encoding_name),
                metadata: options.metadata.clone(),
                slot: options
                    .storage_dir
                    .clone()
                    .unwrap_or_else(|| self.storage_dir.clone()),
                timeout: options.timeout.or(self.timeout),
            },
        )?;

        registry
            .by_path
            .insert(path.to_string(), descriptor.clone());
        registry
            .by_discovery
            .insert(descriptor.discovery_key().to_hex(), descriptor.clone());
        Ok(descriptor)
    }

    /// Rebuilds a descriptor from its persisted record.
    fn descriptor_from_record(&self, record: DescriptorRecord) -> Result<FeedDescriptor> {
        FeedDescriptor::new(
            record.path.clone(),
            Arc::clone(&self.engine),
            DescriptorOptions {
                key: Some(record.key),
                secret_key: record.secret_key,
                encoding: self.codecs.resolve(&record.value_encoding),
                metadata: record.metadata,
                slot: self.storage_dir.clone(),
                timeout: self.timeout,
            },
        )
    }

    /// Registers a recreated descriptor, enforcing both unique indices.
    fn register(&self, descriptor: &FeedDescriptor) -> Result<()> {
        let mut registry = self.write_registry();

        if registry.by_path.contains_key(descriptor.path()) {
            return Err(CatalogError::conflict(format!(
                "path '{}' is already registered",
                descriptor.path()
            )));
        }
        let discovery_hex = descriptor.discovery_key().to_hex();
        if registry.by_discovery.contains_key(&discovery_hex) {
            return Err(CatalogError::conflict(format!(
                "public key {} is already registered",
                descriptor.key()
            )));
        }

        registry
            .by_path
            .insert(descriptor.path().to_string(), descriptor.clone());
        registry.by_discovery.insert(discovery_hex, descriptor.clone());
        Ok(())
    }

    /// Persists metadata and wires events after a successful open, under
    /// the descriptor's lock.
    async fn after_open(
        &self,
        descriptor: &FeedDescriptor,
        handle: &Arc<dyn LogResource>,
    ) -> Result<()> {
        let _guard = descriptor.lock().await;
        self.persist_descriptor(descriptor).await?;
        self.wire_events(descriptor, handle);
        Ok(())
    }

    /// Writes the descriptor's record, skipping the write when the stored
    /// bytes already match.
    async fn persist_descriptor(&self, descriptor: &FeedDescriptor) -> Result<()> {
        let record = descriptor.to_record();
        let encoded = record
            .encode(self.record_codec.as_ref())
            .map_err(|e| CatalogError::store_from(&e))?;
        let record_key = DescriptorRecord::storage_key(&self.namespace, &descriptor.key());

        let existing = self
            .index
            .get(&record_key)
            .await
            .map_err(|e| CatalogError::store_from(&e))?;
        if existing.as_ref() == Some(&encoded) {
            return Ok(());
        }

        self.index
            .put(&record_key, encoded)
            .await
            .map_err(|e| CatalogError::store_from(&e))?;
        debug!(path = %descriptor.path(), "persisted descriptor record");
        Ok(())
    }

    /// Starts event forwarding for a newly opened feed and announces it.
    ///
    /// The `FeedAvailable` notification fires exactly once per descriptor.
    fn wire_events(&self, descriptor: &FeedDescriptor, handle: &Arc<dyn LogResource>) {
        if descriptor.mark_announced() {
            return;
        }

        let origin = EventOrigin {
            path: descriptor.path().to_string(),
            key: descriptor.key(),
            resource: Arc::clone(handle),
            descriptor: descriptor.clone(),
        };

        let mut resource_events = handle.subscribe();
        let catalog_events = self.events.clone();
        let task_origin = origin.clone();
        let task = tokio::spawn(async move {
            loop {
                match resource_events.recv().await {
                    Ok(LogEvent::Append { length }) => {
                        let _ = catalog_events.send(CatalogEvent::Append {
                            origin: task_origin.clone(),
                            length,
                        });
                    }
                    Ok(LogEvent::Download { seq }) => {
                        let _ = catalog_events.send(CatalogEvent::Download {
                            origin: task_origin.clone(),
                            seq,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        lock_or_recover(&self.subscriptions)
            .insert(descriptor.discovery_key().to_hex(), task);

        let _ = self.events.send(CatalogEvent::FeedAvailable { origin });
        debug!(path = %descriptor.path(), "feed available");
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock_or_recover<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use plume_core::codec::JsonCodec;
    use plume_core::error::Error as CoreError;
    use plume_core::index::MemoryIndexStore;
    use plume_core::keys::Keypair;
    use plume_core::resource::{LogConfig, MemoryLogEngine};

    async fn memory_catalog() -> (FeedCatalog, Arc<MemoryLogEngine>, Arc<MemoryIndexStore>) {
        let engine = Arc::new(MemoryLogEngine::new());
        let index = Arc::new(MemoryIndexStore::new());
        let catalog = FeedCatalog::create(
            engine.clone(),
            index.clone(),
            CatalogOptions::default(),
        )
        .await
        .expect("catalog");
        (catalog, engine, index)
    }

    #[tokio::test]
    async fn test_open_or_create_collapses_concurrent_calls() {
        let (catalog, _, _) = memory_catalog().await;

        let (first, second) = tokio::join!(
            catalog.open_or_create("/users", OpenOptions::default()),
            catalog.open_or_create("/users", OpenOptions::default()),
        );
        let first = first.unwrap();
        let second = second.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(catalog.descriptors().len(), 1);
    }

    #[tokio::test]
    async fn test_path_with_different_key_conflicts() {
        let (catalog, _, _) = memory_catalog().await;
        catalog
            .open_or_create("/books", OpenOptions::default())
            .await
            .unwrap();

        let other = Keypair::generate();
        let err = catalog
            .open_or_create(
                "/books",
                OpenOptions {
                    key: Some(other.public),
                    ..OpenOptions::default()
                },
            )
            .await
            .err().unwrap();
        assert!(matches!(err, CatalogError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_key_owned_by_other_path_conflicts() {
        let (catalog, _, _) = memory_catalog().await;
        catalog
            .open_or_create("/books", OpenOptions::default())
            .await
            .unwrap();
        let books_key = catalog.descriptor_by_path("/books").unwrap().key();

        let err = catalog
            .open_or_create(
                "/other",
                OpenOptions {
                    key: Some(books_key),
                    ..OpenOptions::default()
                },
            )
            .await
            .err().unwrap();
        assert!(matches!(err, CatalogError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_close_feed_requires_registration() {
        let (catalog, _, _) = memory_catalog().await;
        let err = catalog.close_feed("/missing").await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_close_feed_closes_resource() {
        let (catalog, _, _) = memory_catalog().await;
        let handle = catalog
            .open_or_create("/groups", OpenOptions::default())
            .await
            .unwrap();

        catalog.close_feed("/groups").await.unwrap();
        assert!(handle.is_closed());
        assert!(catalog.open_descriptors().is_empty());
        // Still registered; only closed.
        assert_eq!(catalog.descriptors().len(), 1);
    }

    #[tokio::test]
    async fn test_open_persists_record() {
        let (catalog, _, index) = memory_catalog().await;
        catalog
            .open_or_create("/books", OpenOptions::default())
            .await
            .unwrap();

        let descriptor = catalog.descriptor_by_path("/books").unwrap();
        let record_key = DescriptorRecord::storage_key("feed", &descriptor.key());
        let stored = index.get(&record_key).await.unwrap().expect("record");

        let record = DescriptorRecord::decode(&JsonCodec, &stored).unwrap();
        assert_eq!(record.path, "/books");
        assert_eq!(record.key, descriptor.key());
        assert!(record.secret_key.is_some());
    }

    #[tokio::test]
    async fn test_delete_descriptor_does_not_close_feed() {
        let (catalog, _, index) = memory_catalog().await;
        let handle = catalog
            .open_or_create("/books", OpenOptions::default())
            .await
            .unwrap();
        handle.append(Bytes::from_static(b"Foundation")).await.unwrap();

        let key = catalog.descriptor_by_path("/books").unwrap().key();
        catalog.delete_descriptor("/books").await.unwrap();

        assert!(catalog.descriptors().is_empty());
        assert!(catalog.descriptor_by_key(&key).is_none());
        let record_key = DescriptorRecord::storage_key("feed", &key);
        assert_eq!(index.get(&record_key).await.unwrap(), None);

        // The handle stays open and readable.
        assert!(handle.is_opened());
        assert_eq!(
            handle.head().await.unwrap(),
            Some(Bytes::from_static(b"Foundation"))
        );
    }

    #[tokio::test]
    async fn test_feed_available_fires_once_per_descriptor() {
        let (catalog, _, _) = memory_catalog().await;
        let mut events = catalog.subscribe();

        catalog
            .open_or_create("/books", OpenOptions::default())
            .await
            .unwrap();
        catalog
            .open_or_create("/books", OpenOptions::default())
            .await
            .unwrap();

        let mut available = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, CatalogEvent::FeedAvailable { .. }) {
                available += 1;
            }
        }
        assert_eq!(available, 1);
    }

    #[tokio::test]
    async fn test_append_events_bubble_with_origin() {
        let (catalog, _, _) = memory_catalog().await;
        let mut events = catalog.subscribe();

        let handle = catalog
            .open_or_create("/books", OpenOptions::default())
            .await
            .unwrap();
        handle.append(Bytes::from_static(b"x")).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match events.recv().await {
                    Ok(CatalogEvent::Append { origin, length }) => break (origin, length),
                    Ok(_) => {}
                    Err(err) => panic!("event channel closed: {err}"),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(event.0.path, "/books");
        assert_eq!(event.1, 1);
    }

    #[tokio::test]
    async fn test_catalog_close_closes_feeds_and_store() {
        let (catalog, _, _) = memory_catalog().await;
        let books = catalog
            .open_or_create("/books", OpenOptions::default())
            .await
            .unwrap();
        let users = catalog
            .open_or_create("/users", OpenOptions::default())
            .await
            .unwrap();

        catalog.close().await.unwrap();

        assert!(books.is_closed());
        assert!(users.is_closed());
        assert!(catalog.open_descriptors().is_empty());

        // The index store is closed: further registry writes fail.
        let err = catalog
            .open_or_create("/late", OpenOptions::default())
            .await
            .err().unwrap();
        assert!(matches!(err, CatalogError::Store { .. }));
    }

    /// Engine whose resources always fail to close, for pinning the
    /// whole-catalog close policy.
    #[derive(Default)]
    struct FailingCloseEngine {
        closes: Arc<AtomicU32>,
    }

    struct FailingCloseLog {
        key: plume_core::keys::PublicKey,
        opened: AtomicBool,
        closes: Arc<AtomicU32>,
        events: broadcast::Sender<LogEvent>,
    }

    impl LogEngine for FailingCloseEngine {
        fn create(&self, config: &LogConfig) -> plume_core::Result<Arc<dyn LogResource>> {
            let (events, _) = broadcast::channel(16);
            Ok(Arc::new(FailingCloseLog {
                key: config.public_key,
                opened: AtomicBool::new(false),
                closes: Arc::clone(&self.closes),
                events,
            }))
        }
    }

    #[async_trait]
    impl LogResource for FailingCloseLog {
        fn key(&self) -> plume_core::keys::PublicKey {
            self.key
        }
        fn is_writable(&self) -> bool {
            true
        }
        fn is_opened(&self) -> bool {
            self.opened.load(Ordering::SeqCst)
        }
        fn is_closed(&self) -> bool {
            false
        }
        fn len(&self) -> u64 {
            0
        }
        fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
            self.events.subscribe()
        }
        async fn open(&self) -> plume_core::Result<()> {
            self.opened.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn close(&self) -> plume_core::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::resource("close always fails"))
        }
        async fn append(&self, _data: Bytes) -> plume_core::Result<u64> {
            Ok(0)
        }
        async fn get(&self, seq: u64) -> plume_core::Result<Bytes> {
            Err(CoreError::not_found(format!("seq {seq}")))
        }
        async fn head(&self) -> plume_core::Result<Option<Bytes>> {
            Ok(None)
        }
        async fn destroy_storage(&self) -> plume_core::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_close_surfaces_first_error_after_all_closes() {
        let engine = Arc::new(FailingCloseEngine::default());
        let closes = Arc::clone(&engine.closes);
        let index = Arc::new(MemoryIndexStore::new());
        let catalog = FeedCatalog::create(engine, index.clone(), CatalogOptions::default())
            .await
            .unwrap();

        catalog
            .open_or_create("/a", OpenOptions::default())
            .await
            .unwrap();
        catalog
            .open_or_create("/b", OpenOptions::default())
            .await
            .unwrap();

        let err = catalog.close().await.unwrap_err();
        assert!(matches!(err, CatalogError::Resource { .. }));

        // Every close was attempted before the error surfaced, and the
        // index store stays open for a retry.
        assert_eq!(closes.load(Ordering::SeqCst), 2);
        assert!(index.get("feed/whatever").await.is_ok());
    }

    #[tokio::test]
    async fn test_codec_resolution_and_default_encoding() {
        let engine = Arc::new(MemoryLogEngine::new());
        let index = Arc::new(MemoryIndexStore::new());
        let options = CatalogOptions {
            value_encoding: Some("utf-8".to_string()),
            codecs: CodecRegistry::new().with("json", Arc::new(JsonCodec)),
            ..CatalogOptions::default()
        };
        let catalog = FeedCatalog::create(engine, index, options).await.unwrap();

        catalog
            .open_or_create(
                "/structured",
                OpenOptions {
                    value_encoding: Some("json".to_string()),
                    ..OpenOptions::default()
                },
            )
            .await
            .unwrap();
        let structured = catalog.descriptor_by_path("/structured").unwrap();
        assert_eq!(structured.encoding().name(), "json");
        assert!(structured.encoding().codec().is_some());

        // No explicit encoding: the catalog default applies, and an
        // unregistered name passes through as a raw label.
        catalog
            .open_or_create("/plain", OpenOptions::default())
            .await
            .unwrap();
        let plain = catalog.descriptor_by_path("/plain").unwrap();
        assert_eq!(plain.encoding().name(), "utf-8");
        assert!(plain.encoding().codec().is_none());
    }

    #[tokio::test]
    async fn test_lookup_surfaces() {
        let (catalog, _, _) = memory_catalog().await;
        let books = catalog
            .open_or_create("/books", OpenOptions::default())
            .await
            .unwrap();
        catalog
            .open_or_create("/users", OpenOptions::default())
            .await
            .unwrap();
        catalog.close_feed("/users").await.unwrap();

        assert_eq!(catalog.descriptors().len(), 2);
        assert_eq!(catalog.open_descriptors().len(), 1);
        assert_eq!(catalog.open_feeds().len(), 1);

        let found = catalog
            .find_feed(|descriptor| descriptor.path() == "/books")
            .expect("books feed");
        assert!(Arc::ptr_eq(&found, &books));

        assert_eq!(
            catalog
                .filter_feeds(|descriptor| descriptor.path() == "/users")
                .len(),
            0
        );
    }

    #[tokio::test]
    async fn test_load_opens_matching_descriptors() {
        let (catalog, _, _) = memory_catalog().await;
        catalog
            .open_or_create("/books", OpenOptions::default())
            .await
            .unwrap();
        catalog
            .open_or_create("/users", OpenOptions::default())
            .await
            .unwrap();

        // Loading an already-open feed returns its existing handle.
        let handles = catalog
            .load(|descriptor| descriptor.path() == "/books")
            .await
            .unwrap();
        assert_eq!(handles.len(), 1);
        assert!(handles[0].is_opened());
        assert_eq!(catalog.open_descriptors().len(), 2);
    }
}
