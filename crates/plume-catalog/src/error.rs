//! Error types for catalog operations.
//!
//! Every lock-guarded operation guarantees lock release on all exit paths —
//! RAII mutex guards make this structural — so these errors never leave a
//! descriptor deadlocked. Errors are `Clone` because a collapsed concurrent
//! operation delivers its single outcome to every waiter.

use thiserror::Error;

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors that can occur during catalog operations.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// Invalid input at descriptor construction, or an operation on a
    /// descriptor in a terminal state.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// A path is registered with a different key, or a key is already
    /// claimed by a different path.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting registration.
        message: String,
    },

    /// The operation addressed a path with no matching descriptor.
    #[error("not found: {resource_type} '{id}'")]
    NotFound {
        /// The type of resource that was not found.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The underlying log resource failed.
    #[error("resource error: {message}")]
    Resource {
        /// Description of the resource failure.
        message: String,
    },

    /// The index store failed during list/get/put/delete.
    #[error("store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
    },

    /// An open or close exceeded its configured duration.
    ///
    /// The underlying operation may still complete in the background; its
    /// eventual outcome is observed by the next operation on the descriptor.
    #[error("timeout: {operation} exceeded the configured duration for feed '{path}'")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The path of the affected feed.
        path: String,
    },
}

impl CatalogError {
    /// Creates a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new not-found error.
    #[must_use]
    pub fn not_found(resource_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type,
            id: id.into(),
        }
    }

    /// Creates a new resource error.
    #[must_use]
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Wraps a core error raised by the index store or record codec.
    #[must_use]
    pub fn store_from(err: &plume_core::Error) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }
}

impl From<plume_core::Error> for CatalogError {
    /// Maps a core error raised by a log resource or its engine.
    ///
    /// Index store failures are mapped explicitly via
    /// [`CatalogError::store_from`] at their call sites, since `Closed` and
    /// `NotFound` mean different things depending on which collaborator
    /// raised them.
    fn from(err: plume_core::Error) -> Self {
        use plume_core::Error as E;
        match &err {
            E::InvalidKey { .. } => Self::Validation {
                message: err.to_string(),
            },
            E::Store { .. } | E::Codec { .. } => Self::Store {
                message: err.to_string(),
            },
            E::Resource { .. } | E::NotFound(_) | E::Closed(_) => Self::Resource {
                message: err.to_string(),
            },
        }
    }
}
