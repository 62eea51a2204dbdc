//! Pluggable codecs for feed payloads and persisted catalog records.
//!
//! Codecs are registered by name in a [`CodecRegistry`] that is passed to
//! the catalog at construction. Registration is explicit and per-registry —
//! there is no process-wide codec table — so catalog instances stay
//! independent and testable in isolation.
//!
//! At descriptor-creation time a requested encoding name is resolved against
//! the registry into a [`ValueEncoding`]: a registered codec when the name
//! is known, or a pass-through raw label understood by the log resource
//! itself otherwise.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};

/// An encode/decode strategy for structured messages.
///
/// Messages are modeled as [`serde_json::Value`] so callers can persist
/// arbitrary metadata payloads verbatim.
pub trait Codec: Send + Sync + 'static {
    /// Encodes a message into bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the message cannot be encoded.
    fn encode(&self, value: &serde_json::Value) -> Result<Bytes>;

    /// Decodes bytes into a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the bytes are not a valid encoding.
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value>;
}

/// The default codec: compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &serde_json::Value) -> Result<Bytes> {
        let encoded = serde_json::to_vec(value)
            .map_err(|e| Error::codec(format!("encode json: {e}")))?;
        Ok(Bytes::from(encoded))
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value> {
        serde_json::from_slice(bytes).map_err(|e| Error::codec(format!("decode json: {e}")))
    }
}

/// An explicit name → codec mapping.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use plume_core::codec::{CodecRegistry, JsonCodec};
///
/// let mut codecs = CodecRegistry::new();
/// codecs.register("json", Arc::new(JsonCodec));
/// assert!(codecs.get("json").is_some());
/// ```
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a codec under a name, replacing any previous registration.
    pub fn register(&mut self, name: impl Into<String>, codec: Arc<dyn Codec>) {
        self.codecs.insert(name.into(), codec);
    }

    /// Builder-style registration for construction sites.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, codec: Arc<dyn Codec>) -> Self {
        self.register(name, codec);
        self
    }

    /// Looks up a codec by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Codec>> {
        self.codecs.get(name).cloned()
    }

    /// Resolves an encoding name against the registry.
    ///
    /// Unrecognized names resolve to [`ValueEncoding::Raw`] — a pass-through
    /// label the log resource interprets on its own.
    #[must_use]
    pub fn resolve(&self, name: &str) -> ValueEncoding {
        match self.get(name) {
            Some(codec) => ValueEncoding::Registered {
                name: name.to_string(),
                codec,
            },
            None => ValueEncoding::Raw(name.to_string()),
        }
    }

    /// Returns the number of registered codecs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("names", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The resolution of a requested encoding name.
#[derive(Clone)]
pub enum ValueEncoding {
    /// The name matched a registered codec.
    Registered {
        /// The registered name, preserved for persistence.
        name: String,
        /// The resolved codec.
        codec: Arc<dyn Codec>,
    },
    /// The name did not match; it is passed through to the log resource.
    Raw(String),
}

impl ValueEncoding {
    /// Returns the encoding name (the persisted form).
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Registered { name, .. } | Self::Raw(name) => name,
        }
    }

    /// Returns the resolved codec, if the name was registered.
    #[must_use]
    pub fn codec(&self) -> Option<&Arc<dyn Codec>> {
        match self {
            Self::Registered { codec, .. } => Some(codec),
            Self::Raw(_) => None,
        }
    }
}

impl Default for ValueEncoding {
    fn default() -> Self {
        Self::Raw("binary".to_string())
    }
}

impl fmt::Debug for ValueEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered { name, .. } => write!(f, "ValueEncoding::Registered({name})"),
            Self::Raw(name) => write!(f, "ValueEncoding::Raw({name})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_codec_round_trip() {
        let codec = JsonCodec;
        let value = json!({"title": "Foundation and Empire", "seq": 1});
        let encoded = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let codec = JsonCodec;
        assert!(matches!(codec.decode(b"not json"), Err(Error::Codec { .. })));
    }

    #[test]
    fn test_registry_resolves_registered_name() {
        let codecs = CodecRegistry::new().with("json", Arc::new(JsonCodec));
        let encoding = codecs.resolve("json");
        assert_eq!(encoding.name(), "json");
        assert!(encoding.codec().is_some());
    }

    #[test]
    fn test_registry_falls_back_to_raw_label() {
        let codecs = CodecRegistry::new();
        let encoding = codecs.resolve("utf-8");
        assert_eq!(encoding.name(), "utf-8");
        assert!(encoding.codec().is_none());
    }

    #[test]
    fn test_default_encoding_is_binary() {
        assert_eq!(ValueEncoding::default().name(), "binary");
    }
}
