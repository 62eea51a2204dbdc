//! Feed descriptors: per-resource lifecycle state machines.
//!
//! A [`FeedDescriptor`] owns one feed's identity, configuration, lazily
//! created resource handle, and exclusive-access lock. Every state-changing
//! operation serializes through the lock; concurrent calls to the same
//! operation collapse to a single underlying action whose outcome is shared
//! by every waiter.
//!
//! ## Locking discipline
//!
//! The lock is a `tokio::sync::Mutex` over the lifecycle state: waiters
//! queue FIFO, exactly one holder mutates state, and RAII guards release on
//! every exit path including errors. The underlying open/close runs in a
//! spawned task wrapped in a shared future, so the critical section stays
//! short: callers observe the outcome *outside* the lock. A caller that
//! times out abandons its wait, not the work — the in-flight operation stays
//! registered and is settled by whichever operation next inspects the
//! descriptor, preserving at-most-once open semantics.
//!
//! ## Handle ownership
//!
//! The resource handle is created at most once and never replaced. A closed
//! or destroyed descriptor is not reopened; callers wanting a fresh handle
//! create a new descriptor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use plume_core::codec::ValueEncoding;
use plume_core::keys::{DiscoveryKey, Keypair, PublicKey, SecretKey};
use plume_core::resource::{LogConfig, LogEngine, LogEvent, LogResource};

use crate::error::{CatalogError, Result};
use crate::record::DescriptorRecord;

/// A registered append-event listener.
///
/// Invoked with the event, the originating handle, and the descriptor.
pub type WatchCallback =
    Arc<dyn Fn(&LogEvent, &Arc<dyn LogResource>, &FeedDescriptor) + Send + Sync>;

/// The lifecycle state of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorState {
    /// Created, resource not yet opened.
    Idle,
    /// An underlying open is in flight.
    Opening,
    /// The resource is open.
    Open,
    /// An underlying close is in flight.
    Closing,
    /// The resource was closed. A closed descriptor is not reopened.
    Closed,
    /// A destroy is in progress.
    Destroying,
    /// Storage was removed. Terminal.
    Destroyed,
}

impl DescriptorState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        if matches!(target, Self::Destroying) {
            return !matches!(self, Self::Destroying | Self::Destroyed);
        }
        match self {
            Self::Idle => matches!(target, Self::Opening),
            Self::Opening => matches!(target, Self::Open | Self::Idle),
            Self::Open => matches!(target, Self::Closing),
            Self::Closing => matches!(target, Self::Closed),
            Self::Destroying => matches!(target, Self::Destroyed | Self::Closed),
            Self::Closed | Self::Destroyed => false,
        }
    }
}

/// Outcome shared by every waiter of a collapsed operation.
type SharedOutcome = std::result::Result<(), CatalogError>;

/// An in-flight operation, awaitable by any number of callers.
type SharedOp = Shared<BoxFuture<'static, SharedOutcome>>;

/// Which operation is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlightKind {
    Open,
    Close,
}

/// Lock-guarded lifecycle state.
///
/// Invariant: `in_flight` is `Some` exactly while `state` is `Opening` or
/// `Closing`; both fields change together in one critical section.
struct Lifecycle {
    state: DescriptorState,
    in_flight: Option<(InFlightKind, SharedOp)>,
}

impl Lifecycle {
    fn transition(&mut self, target: DescriptorState) {
        debug_assert!(
            self.state.can_transition_to(target),
            "invalid transition {:?} -> {target:?}",
            self.state,
        );
        self.state = target;
    }

    fn current_op(&self, path: &str) -> Result<(InFlightKind, SharedOp)> {
        self.in_flight.clone().ok_or_else(|| CatalogError::Resource {
            message: format!("feed '{path}' lifecycle state out of sync"),
        })
    }
}

/// Options for constructing a [`FeedDescriptor`].
#[derive(Debug)]
pub struct DescriptorOptions {
    /// The feed's public identity. Generated when absent.
    pub key: Option<PublicKey>,
    /// The feed's write capability. Requires `key`.
    pub secret_key: Option<SecretKey>,
    /// The resolved payload encoding.
    pub encoding: ValueEncoding,
    /// Opaque caller-defined payload, persisted verbatim.
    pub metadata: Option<serde_json::Value>,
    /// Storage location for the feed's underlying bytes.
    pub slot: String,
    /// Optional duration bound for open and close.
    pub timeout: Option<Duration>,
}

impl Default for DescriptorOptions {
    fn default() -> Self {
        Self {
            key: None,
            secret_key: None,
            encoding: ValueEncoding::default(),
            metadata: None,
            slot: "feeds".to_string(),
            timeout: None,
        }
    }
}

struct Inner {
    path: String,
    key: PublicKey,
    secret_key: Option<SecretKey>,
    discovery_key: DiscoveryKey,
    encoding: ValueEncoding,
    metadata: Option<serde_json::Value>,
    slot: String,
    timeout: Option<Duration>,
    engine: Arc<dyn LogEngine>,
    handle: std::sync::OnceLock<Arc<dyn LogResource>>,
    lifecycle: Mutex<Lifecycle>,
    watcher: StdMutex<Option<WatchCallback>>,
    watch_pump: StdMutex<Option<JoinHandle<()>>>,
    announced: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.watch_pump.lock() {
            if let Some(task) = pump.take() {
                task.abort();
            }
        }
    }
}

/// The lifecycle-managing handle for one feed.
///
/// Cheap to clone; clones share the same lifecycle state and lock.
#[derive(Clone)]
pub struct FeedDescriptor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FeedDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedDescriptor")
            .field("path", &self.inner.path)
            .field("key", &self.inner.key)
            .finish_non_exhaustive()
    }
}

/// RAII guard over a descriptor's exclusive-access lock.
///
/// Held by the catalog while persisting or deleting descriptor metadata so
/// those steps cannot interleave with lifecycle transitions.
pub struct DescriptorGuard<'a> {
    guard: tokio::sync::MutexGuard<'a, Lifecycle>,
}

impl DescriptorGuard<'_> {
    /// Returns the state observed while holding the lock.
    #[must_use]
    pub fn state(&self) -> DescriptorState {
        self.guard.state
    }
}

impl FeedDescriptor {
    /// Creates a new descriptor.
    ///
    /// Validation happens synchronously, before any asynchronous work or
    /// lock acquisition. A fresh key pair is generated when no key is
    /// supplied.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Validation`] if the path is empty or a secret
    /// key is supplied without its public key.
    pub fn new(
        path: impl Into<String>,
        engine: Arc<dyn LogEngine>,
        options: DescriptorOptions,
    ) -> Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(CatalogError::validation("the path is required"));
        }
        if options.secret_key.is_some() && options.key.is_none() {
            return Err(CatalogError::validation(
                "a secret key requires its public key",
            ));
        }

        let (key, secret_key) = match options.key {
            Some(key) => (key, options.secret_key),
            None => {
                let keypair = Keypair::generate();
                (keypair.public, Some(keypair.secret))
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                discovery_key: DiscoveryKey::derive(&key),
                path,
                key,
                secret_key,
                encoding: options.encoding,
                metadata: options.metadata,
                slot: options.slot,
                timeout: options.timeout,
                engine,
                handle: std::sync::OnceLock::new(),
                lifecycle: Mutex::new(Lifecycle {
                    state: DescriptorState::Idle,
                    in_flight: None,
                }),
                watcher: StdMutex::new(None),
                watch_pump: StdMutex::new(None),
                announced: AtomicBool::new(false),
            }),
        })
    }

    /// Returns the feed's logical path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Returns the feed's public identity.
    #[must_use]
    pub fn key(&self) -> PublicKey {
        self.inner.key
    }

    /// Returns the feed's write capability, if tracked.
    #[must_use]
    pub fn secret_key(&self) -> Option<&SecretKey> {
        self.inner.secret_key.as_ref()
    }

    /// Returns the catalog lookup key derived from the public key.
    #[must_use]
    pub fn discovery_key(&self) -> DiscoveryKey {
        self.inner.discovery_key
    }

    /// Returns the resolved payload encoding.
    #[must_use]
    pub fn encoding(&self) -> &ValueEncoding {
        &self.inner.encoding
    }

    /// Returns the caller-defined metadata payload.
    #[must_use]
    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.inner.metadata.as_ref()
    }

    /// Returns the resource handle, if one was ever created.
    #[must_use]
    pub fn handle(&self) -> Option<Arc<dyn LogResource>> {
        self.inner.handle.get().cloned()
    }

    /// Returns whether the resource is currently open.
    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.inner.handle.get().is_some_and(|h| h.is_opened())
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> DescriptorState {
        self.inner.lifecycle.lock().await.state
    }

    /// Acquires the descriptor's exclusive-access lock.
    ///
    /// Waiters queue FIFO behind any in-progress lifecycle transition.
    pub async fn lock(&self) -> DescriptorGuard<'_> {
        DescriptorGuard {
            guard: self.inner.lifecycle.lock().await,
        }
    }

    /// Opens the underlying resource, creating the handle on first use.
    ///
    /// Concurrent callers collapse to a single underlying open and share its
    /// outcome. If the handle already reports itself open the call returns
    /// without touching the lock.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Validation`] if the descriptor is closed or
    /// destroyed, [`CatalogError::Timeout`] if the configured duration
    /// elapsed, or [`CatalogError::Resource`] if the underlying open failed.
    pub async fn open(&self) -> Result<Arc<dyn LogResource>> {
        // Fast return without need to lock the descriptor.
        if let Some(handle) = self.inner.handle.get() {
            if handle.is_opened() {
                return Ok(Arc::clone(handle));
            }
        }

        loop {
            let (kind, shared) = {
                let mut lifecycle = self.inner.lifecycle.lock().await;
                match lifecycle.state {
                    DescriptorState::Open => {
                        return self.opened_handle();
                    }
                    DescriptorState::Closed => {
                        return Err(CatalogError::validation(format!(
                            "feed '{}' is closed; create a new descriptor to reopen it",
                            self.inner.path
                        )));
                    }
                    DescriptorState::Destroying | DescriptorState::Destroyed => {
                        return Err(CatalogError::validation(format!(
                            "feed '{}' is destroyed",
                            self.inner.path
                        )));
                    }
                    DescriptorState::Opening | DescriptorState::Closing => {
                        lifecycle.current_op(&self.inner.path)?
                    }
                    DescriptorState::Idle => self.start_open(&mut lifecycle)?,
                }
            };

            let outcome = self.await_shared(shared, "open").await?;
            match kind {
                InFlightKind::Open => {
                    outcome?;
                    return self.opened_handle();
                }
                // A close settled; re-evaluate from the resulting state.
                InFlightKind::Close => {}
            }
        }
    }

    /// Closes the underlying resource.
    ///
    /// A no-op unless the resource is open. The underlying close is invoked
    /// exactly once; concurrent callers share its outcome. On failure the
    /// error propagates but the descriptor is no longer treated as open.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Timeout`] if the configured duration elapsed,
    /// or [`CatalogError::Resource`] if the underlying close failed.
    pub async fn close(&self) -> Result<()> {
        loop {
            let (kind, shared) = {
                let mut lifecycle = self.inner.lifecycle.lock().await;
                match lifecycle.state {
                    DescriptorState::Idle
                    | DescriptorState::Closed
                    | DescriptorState::Destroying
                    | DescriptorState::Destroyed => return Ok(()),
                    DescriptorState::Opening | DescriptorState::Closing => {
                        lifecycle.current_op(&self.inner.path)?
                    }
                    DescriptorState::Open => self.start_close(&mut lifecycle)?,
                }
            };

            let outcome = self.await_shared(shared, "close").await?;
            match kind {
                InFlightKind::Close => return outcome,
                // An open settled; re-evaluate. A failed open leaves the
                // descriptor idle, which closes as a no-op.
                InFlightKind::Open => {}
            }
        }
    }

    /// Destroys the feed: ensures the resource is closed, then removes its
    /// underlying byte storage.
    ///
    /// Idempotent — every call after the first success is a no-op. Succeeds
    /// on a never-opened feed (the close step is skipped and a handle is
    /// instantiated solely for storage removal).
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Resource`] if storage removal failed; the
    /// descriptor is left closed so the destroy can be retried.
    pub async fn destroy(&self) -> Result<()> {
        loop {
            // Settle any in-flight open or close before destroying; the
            // shared outcome is awaited outside the lock.
            let pending = {
                let lifecycle = self.inner.lifecycle.lock().await;
                match lifecycle.state {
                    DescriptorState::Destroyed => return Ok(()),
                    DescriptorState::Opening | DescriptorState::Closing => {
                        lifecycle.in_flight.clone()
                    }
                    _ => None,
                }
            };
            if let Some((_, shared)) = pending {
                let _ = shared.await;
                continue;
            }

            let mut lifecycle = self.inner.lifecycle.lock().await;
            match lifecycle.state {
                DescriptorState::Destroyed => return Ok(()),
                DescriptorState::Opening
                | DescriptorState::Closing
                | DescriptorState::Destroying => continue,
                state => {
                    let was_open = state == DescriptorState::Open;
                    lifecycle.transition(DescriptorState::Destroying);

                    if was_open {
                        if let Some(handle) = self.inner.handle.get() {
                            if let Err(err) = handle.close().await {
                                debug!(path = %self.inner.path, %err,
                                    "ignoring close failure during destroy");
                            }
                        }
                    }

                    let handle = match self.inner.handle.get() {
                        Some(handle) => Arc::clone(handle),
                        None => match self.inner.engine.create(&self.log_config()) {
                            Ok(created) => {
                                let _ = self.inner.handle.set(Arc::clone(&created));
                                created
                            }
                            Err(err) => {
                                lifecycle.transition(DescriptorState::Closed);
                                return Err(err.into());
                            }
                        },
                    };

                    if let Err(err) = handle.destroy_storage().await {
                        lifecycle.transition(DescriptorState::Closed);
                        return Err(err.into());
                    }

                    lifecycle.transition(DescriptorState::Destroyed);
                    drop(lifecycle);
                    self.abort_watch_pump();
                    debug!(path = %self.inner.path, "destroyed feed");
                    return Ok(());
                }
            }
        }
    }

    /// Registers, replaces, or clears (with `None`) the single append-event
    /// listener for this descriptor.
    ///
    /// Observation only — not lock-guarded. The listener runs on the
    /// descriptor's event pump task.
    pub fn watch(&self, listener: Option<WatchCallback>) {
        *lock_or_recover(&self.inner.watcher) = listener;
    }

    /// Returns the persisted form of this descriptor.
    #[must_use]
    pub fn to_record(&self) -> DescriptorRecord {
        DescriptorRecord {
            path: self.inner.path.clone(),
            key: self.inner.key,
            secret_key: self.inner.secret_key.clone(),
            value_encoding: self.inner.encoding.name().to_string(),
            metadata: self.inner.metadata.clone(),
        }
    }

    /// Marks the descriptor as announced catalog-wide.
    ///
    /// Returns the previous value, so the first caller wins.
    pub(crate) fn mark_announced(&self) -> bool {
        self.inner.announced.swap(true, Ordering::SeqCst)
    }

    fn log_config(&self) -> LogConfig {
        LogConfig {
            slot: self.inner.slot.clone(),
            public_key: self.inner.key,
            secret_key: self.inner.secret_key.clone(),
            encoding: self.inner.encoding.clone(),
        }
    }

    fn opened_handle(&self) -> Result<Arc<dyn LogResource>> {
        self.inner
            .handle
            .get()
            .cloned()
            .ok_or_else(|| CatalogError::Resource {
                message: format!("feed '{}' has no handle after open", self.inner.path),
            })
    }

    /// Starts the single underlying open. Called with the lock held, in
    /// state `Idle`.
    fn start_open(&self, lifecycle: &mut Lifecycle) -> Result<(InFlightKind, SharedOp)> {
        let handle = match self.inner.handle.get() {
            Some(handle) => Arc::clone(handle),
            None => {
                let created = self.inner.engine.create(&self.log_config())?;
                let _ = self.inner.handle.set(Arc::clone(&created));
                created
            }
        };

        lifecycle.transition(DescriptorState::Opening);
        debug!(path = %self.inner.path, "opening feed");

        let open_handle = Arc::clone(&handle);
        let task = tokio::spawn(async move { open_handle.open().await });

        let this = self.clone();
        let shared: SharedOp = async move {
            let result = match task.await {
                Ok(result) => result.map_err(CatalogError::from),
                Err(join_err) => Err(CatalogError::resource(format!(
                    "open task failed: {join_err}"
                ))),
            };

            let mut lifecycle = this.inner.lifecycle.lock().await;
            lifecycle.in_flight = None;
            match &result {
                Ok(()) => {
                    lifecycle.transition(DescriptorState::Open);
                    this.spawn_watch_pump(&handle);
                }
                Err(_) => lifecycle.transition(DescriptorState::Idle),
            }
            result
        }
        .boxed()
        .shared();

        lifecycle.in_flight = Some((InFlightKind::Open, shared.clone()));
        Ok((InFlightKind::Open, shared))
    }

    /// Starts the single underlying close. Called with the lock held, in
    /// state `Open`.
    fn start_close(&self, lifecycle: &mut Lifecycle) -> Result<(InFlightKind, SharedOp)> {
        let handle = self.opened_handle()?;

        lifecycle.transition(DescriptorState::Closing);
        debug!(path = %self.inner.path, "closing feed");

        let task = tokio::spawn(async move { handle.close().await });

        let this = self.clone();
        let shared: SharedOp = async move {
            let result = match task.await {
                Ok(result) => result.map_err(CatalogError::from),
                Err(join_err) => Err(CatalogError::resource(format!(
                    "close task failed: {join_err}"
                ))),
            };

            let mut lifecycle = this.inner.lifecycle.lock().await;
            lifecycle.in_flight = None;
            // A failed close still leaves the descriptor no longer open.
            lifecycle.transition(DescriptorState::Closed);
            result
        }
        .boxed()
        .shared();

        lifecycle.in_flight = Some((InFlightKind::Close, shared.clone()));
        Ok((InFlightKind::Close, shared))
    }

    /// Awaits a shared operation outcome, bounded by the configured timeout.
    async fn await_shared(
        &self,
        shared: SharedOp,
        operation: &'static str,
    ) -> Result<SharedOutcome> {
        match self.inner.timeout {
            Some(duration) => tokio::time::timeout(duration, shared)
                .await
                .map_err(|_| CatalogError::Timeout {
                    operation,
                    path: self.inner.path.clone(),
                }),
            None => Ok(shared.await),
        }
    }

    /// Spawns the append-event pump on first successful open.
    fn spawn_watch_pump(&self, handle: &Arc<dyn LogResource>) {
        let mut pump = lock_or_recover(&self.inner.watch_pump);
        if pump.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let handle = Arc::clone(handle);
        let mut events = handle.subscribe();
        *pump = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(descriptor) = Weak::upgrade(&weak).map(|inner| FeedDescriptor { inner })
                        else {
                            break;
                        };
                        descriptor.notify_watcher(&event, &handle);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    fn notify_watcher(&self, event: &LogEvent, handle: &Arc<dyn LogResource>) {
        let watcher = lock_or_recover(&self.inner.watcher).clone();
        if let Some(watcher) = watcher {
            watcher(event, handle, self);
        }
    }

    fn abort_watch_pump(&self) {
        if let Some(task) = lock_or_recover(&self.inner.watch_pump).take() {
            task.abort();
        }
    }
}

fn lock_or_recover<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
