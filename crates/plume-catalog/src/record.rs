//! The persisted form of a feed descriptor.
//!
//! One record per tracked feed, keyed by `<namespace>/<hex(public key)>` in
//! the index store. The persisted set is the source of truth for recreating
//! the catalog after a restart. `secretKey` is present only for writable
//! feeds — a read-only feed's record omits it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use plume_core::codec::Codec;
use plume_core::error::{Error, Result};
use plume_core::keys::{PublicKey, SecretKey};

/// The serialized metadata of one feed descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorRecord {
    /// The feed's logical path, unique within a catalog.
    pub path: String,

    /// The feed's public identity.
    pub key: PublicKey,

    /// The feed's write capability, when tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<SecretKey>,

    /// The name of the feed's payload encoding.
    pub value_encoding: String,

    /// Opaque caller-defined payload, persisted verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl DescriptorRecord {
    /// Returns the index store key for this record under `namespace`.
    #[must_use]
    pub fn storage_key(namespace: &str, key: &PublicKey) -> String {
        format!("{namespace}/{}", key.to_hex())
    }

    /// Encodes the record through the given codec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the record cannot be encoded.
    pub fn encode(&self, codec: &dyn Codec) -> Result<Bytes> {
        let value = serde_json::to_value(self)
            .map_err(|e| Error::codec(format!("serialize descriptor record: {e}")))?;
        codec.encode(&value)
    }

    /// Decodes a record from stored bytes through the given codec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the bytes are not a valid record.
    pub fn decode(codec: &dyn Codec, bytes: &[u8]) -> Result<Self> {
        let value = codec.decode(bytes)?;
        serde_json::from_value(value)
            .map_err(|e| Error::codec(format!("deserialize descriptor record: {e}")))
    }
}
