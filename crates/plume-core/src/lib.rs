//! # plume-core
//!
//! Core contracts for the plume feed catalog.
//!
//! This crate provides the foundational types and traits used across all
//! plume components:
//!
//! - **Key Material**: Feed identity key pairs and derived discovery keys
//! - **Log Resource Contract**: The abstract append-only log consumed by the
//!   catalog, with an in-memory reference engine for tests
//! - **Index Store Contract**: The abstract key-value substrate backing
//!   catalog metadata
//! - **Codecs**: Pluggable encode/decode strategies and the codec registry
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `plume-core` is the **only** crate allowed to define shared primitives.
//! The catalog layer (`plume-catalog`) consumes the contracts defined here
//! and never reaches around them to a concrete backend.
//!
//! ## Example
//!
//! ```rust
//! use plume_core::prelude::*;
//!
//! // Generate a feed identity
//! let keypair = Keypair::generate();
//! let discovery = DiscoveryKey::derive(&keypair.public);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod codec;
pub mod error;
pub mod index;
pub mod keys;
pub mod observability;
pub mod resource;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use plume_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::codec::{Codec, CodecRegistry, JsonCodec, ValueEncoding};
    pub use crate::error::{Error, Result};
    pub use crate::index::{IndexEntry, IndexStore, MemoryIndexStore};
    pub use crate::keys::{DiscoveryKey, Keypair, PublicKey, SecretKey};
    pub use crate::resource::{
        LogConfig, LogEngine, LogEvent, LogResource, MemoryLog, MemoryLogEngine,
    };
}

// Re-export key types at crate root for ergonomics
pub use codec::{Codec, CodecRegistry, JsonCodec, ValueEncoding};
pub use error::{Error, Result};
pub use index::{IndexEntry, IndexStore, MemoryIndexStore};
pub use keys::{DiscoveryKey, Keypair, PublicKey, SecretKey};
pub use observability::{init_logging, LogFormat};
pub use resource::{LogConfig, LogEngine, LogEvent, LogResource, MemoryLog, MemoryLogEngine};
