//! Catalog-wide events.
//!
//! Once a feed's resource is opened for the first time, the catalog
//! subscribes to its append/download events and re-emits them catalog-wide,
//! tagged with the originating handle and descriptor. Observers react to
//! feed activity without knowing about individual resources.
//!
//! Subscriptions are held explicitly by the catalog, keyed by descriptor
//! identity, and torn down when a descriptor is removed or the catalog
//! closes.

use std::fmt;
use std::sync::Arc;

use plume_core::keys::PublicKey;
use plume_core::resource::LogResource;

use crate::descriptor::FeedDescriptor;

/// The source of a bubbled event: the handle and descriptor it came from.
#[derive(Clone)]
pub struct EventOrigin {
    /// The originating feed's path.
    pub path: String,
    /// The originating feed's public identity.
    pub key: PublicKey,
    /// The open resource handle.
    pub resource: Arc<dyn LogResource>,
    /// The feed's descriptor.
    pub descriptor: FeedDescriptor,
}

impl fmt::Debug for EventOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventOrigin")
            .field("path", &self.path)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// An event emitted on the catalog's broadcast channel.
#[derive(Debug, Clone)]
pub enum CatalogEvent {
    /// A feed's resource became available (first successful open).
    ///
    /// Fired exactly once per descriptor.
    FeedAvailable {
        /// The newly available feed.
        origin: EventOrigin,
    },

    /// A record was appended to an open feed.
    Append {
        /// The feed the record was appended to.
        origin: EventOrigin,
        /// The feed's length after the append.
        length: u64,
    },

    /// A record was downloaded from a remote peer.
    Download {
        /// The feed the record arrived on.
        origin: EventOrigin,
        /// The sequence number of the downloaded record.
        seq: u64,
    },

    /// A descriptor was removed from the catalog.
    ///
    /// The underlying resource is not closed by removal.
    DescriptorRemoved {
        /// The removed feed's path.
        path: String,
        /// The removed feed's public identity.
        key: PublicKey,
    },
}
