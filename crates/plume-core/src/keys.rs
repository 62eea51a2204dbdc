//! Feed identity key material.
//!
//! Every feed is identified by an Ed25519 key pair:
//!
//! - The **public key** is the feed's stable identity.
//! - The **secret key** grants write capability; a feed tracked without one
//!   is read-only.
//! - The **discovery key** is derived deterministically from the public key
//!   and serves as the catalog's stable lookup index without revealing the
//!   public key itself.
//!
//! All key types round-trip through lowercase hex and serialize as hex
//! strings for JSON interoperability. `SecretKey` redacts its bytes in
//! `Debug` output but does serialize — persisted catalog records for
//! writable feeds must carry it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Domain-separation prefix for discovery key derivation.
const DISCOVERY_CONTEXT: &[u8] = b"plume-discovery";

/// An Ed25519 public key (32 bytes): the feed's identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

/// An Ed25519 secret key seed (32 bytes): the feed's write capability.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; 32]);

/// A key derived deterministically from a [`PublicKey`].
///
/// One discovery key per public key; key rotation is not supported.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveryKey([u8; 32]);

/// A full feed identity: public key plus write capability.
#[derive(Clone)]
pub struct Keypair {
    /// The feed's public identity.
    pub public: PublicKey,
    /// The feed's write capability.
    pub secret: SecretKey,
}

impl Keypair {
    /// Generates a fresh random key pair from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let signing = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        Self {
            public: PublicKey(signing.verifying_key().to_bytes()),
            secret: SecretKey(signing.to_bytes()),
        }
    }
}

impl PublicKey {
    /// Creates a public key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Renders the key as a lowercase hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }

    /// Parses a key from a 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the input is not valid hex of the
    /// expected length.
    pub fn from_hex(hex: &str) -> Result<Self> {
        decode_hex(hex).map(Self)
    }
}

impl SecretKey {
    /// Creates a secret key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Renders the key as a lowercase hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }

    /// Parses a key from a 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the input is not valid hex of the
    /// expected length.
    pub fn from_hex(hex: &str) -> Result<Self> {
        decode_hex(hex).map(Self)
    }
}

impl DiscoveryKey {
    /// Derives the discovery key for a public key.
    ///
    /// The derivation is a SHA-256 digest over a fixed domain-separation
    /// prefix and the public key bytes, so it is stable across processes.
    #[must_use]
    pub fn derive(key: &PublicKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DISCOVERY_CONTEXT);
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Renders the key as a lowercase hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}…)", &self.to_hex()[..8])
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(redacted)")
    }
}

impl fmt::Display for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiscoveryKey({}…)", &self.to_hex()[..8])
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

impl Serialize for SecretKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex(hex: &str) -> Result<[u8; 32]> {
    let hex = hex.trim();
    if !hex.is_ascii() || hex.len() != 64 {
        return Err(Error::InvalidKey {
            message: format!("key hex must be 64 ascii chars, got {}", hex.len()),
        });
    }

    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        let pair = &hex[i * 2..i * 2 + 2];
        *byte = u8::from_str_radix(pair, 16).map_err(|_| Error::InvalidKey {
            message: format!("invalid hex pair '{pair}' at offset {}", i * 2),
        })?;
    }
    Ok(out)
}
