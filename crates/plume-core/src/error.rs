//! Error types and result aliases shared across plume components.
//!
//! Errors are structured for programmatic handling and include context for
//! debugging. Backend failures carry their underlying cause as a `source`.

use std::fmt;

/// The result type used throughout the core contracts.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the core contracts and their reference backends.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key material was missing, malformed, or inconsistent.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of what made the key invalid.
        message: String,
    },

    /// A codec failed to encode or decode a message.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// An index store operation failed.
    #[error("store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A log resource operation failed.
    #[error("resource error: {message}")]
    Resource {
        /// Description of the resource failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The requested entry or sequence number was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend has been closed and no longer accepts operations.
    #[error("closed: {0}")]
    Closed(String),
}

impl Error {
    /// Creates a new invalid-key error with the given message.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates a new codec error with the given message.
    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a new store error with the given message.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new store error with a source cause.
    #[must_use]
    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new resource error with the given message.
    #[must_use]
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new resource error with a source cause.
    #[must_use]
    pub fn resource_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Resource {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new not-found error for the given subject.
    #[must_use]
    pub fn not_found(subject: impl fmt::Display) -> Self {
        Self::NotFound(subject.to_string())
    }
}
