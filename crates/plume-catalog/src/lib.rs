//! # plume-catalog
//!
//! A catalog of named, independently-lifecycled append-only log resources
//! ("feeds"), each identified by a key pair and a logical path.
//!
//! This crate implements the catalog domain, providing:
//!
//! - **Descriptors**: per-feed lifecycle state machines with an
//!   exclusive-access lock that makes concurrent open/close/destroy calls
//!   safe and idempotent
//! - **Registry**: two unique indices (path and identity) over all tracked
//!   feeds, with conflict detection
//! - **Persistence**: one record per feed in an external index store, the
//!   source of truth for recreating the catalog after a restart
//! - **Aggregation**: catalog-wide event bubbling and merged live read
//!   streams across every open feed
//!
//! ## Concurrency model
//!
//! Single-runtime cooperative concurrency: many logical operations are in
//! flight at once and serialize through per-descriptor locks. Operations on
//! different descriptors are unordered relative to each other; operations
//! on the same descriptor are totally ordered by lock acquisition (FIFO).
//! Concurrent calls to the same operation collapse to one underlying action
//! and share its outcome.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use plume_catalog::{CatalogOptions, FeedCatalog, OpenOptions};
//! use plume_core::prelude::*;
//!
//! let engine = Arc::new(MemoryLogEngine::new());
//! let index = Arc::new(MemoryIndexStore::new());
//! let catalog = FeedCatalog::create(engine, index, CatalogOptions::default()).await?;
//!
//! let books = catalog.open_or_create("/books", OpenOptions::default()).await?;
//! books.append("Foundation and Empire".into()).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod record;
pub mod stream;

pub use catalog::{CatalogOptions, FeedCatalog, OpenOptions};
pub use descriptor::{
    DescriptorGuard, DescriptorOptions, DescriptorState, FeedDescriptor, WatchCallback,
};
pub use error::{CatalogError, Result};
pub use events::{CatalogEvent, EventOrigin};
pub use record::DescriptorRecord;
pub use stream::{ReadStreamOptions, RecordStream, StreamRecord};
