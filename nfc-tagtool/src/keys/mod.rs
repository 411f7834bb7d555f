//! Mifare Classic authentication keys
//!
//! A key is 6 bytes, written canonically as 12 uppercase hex characters
//! with no separators.

mod store;

pub use store::KeyStore;

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a key in bytes
pub const KEY_LEN: usize = 6;

/// Factory default transport key
pub const FACTORY_KEY: MifareKey = MifareKey([0xFF; KEY_LEN]);

/// Keys seeded into a fresh key database
pub const DEFAULT_KEYS: [&str; 5] = [
    "FFFFFFFFFFFF", // factory default
    "A0A1A2A3A4A5", // MAD
    "D3F7D3F7D3F7", // NDEF
    "000000000000",
    "B0B1B2B3B4B5",
];

/// Errors reported by the key database
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid key format: {0:?} (expected 12 hex characters)")]
    InvalidFormat(String),

    #[error("key already present: {0}")]
    Duplicate(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key file error: {0}")]
    Storage(String),
}

impl From<KeyError> for crate::error::TagError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Storage(msg) => crate::error::TagError::FileError(msg),
            other => crate::error::TagError::InvalidData(other.to_string()),
        }
    }
}

/// Canonical form of a key string: uppercase with all whitespace removed
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Check if a string is exactly 12 hex characters
pub fn is_valid_hex_key(key: &str) -> bool {
    key.len() == KEY_LEN * 2 && key.chars().all(|c| c.is_ascii_hexdigit())
}

/// Convert a key string to bytes, normalizing first
pub fn key_to_bytes(key: &str) -> Option<[u8; KEY_LEN]> {
    let normalized = normalize_key(key);
    if !is_valid_hex_key(&normalized) {
        return None;
    }
    let mut out = [0u8; KEY_LEN];
    hex::decode_to_slice(&normalized, &mut out).ok()?;
    Some(out)
}

/// Convert key bytes to the canonical string
pub fn bytes_to_key(bytes: &[u8; KEY_LEN]) -> String {
    hex::encode_upper(bytes)
}

/// A 48 bit Mifare Classic key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MifareKey(pub [u8; KEY_LEN]);

impl MifareKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Display for MifareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bytes_to_key(&self.0))
    }
}

impl FromStr for MifareKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        key_to_bytes(s)
            .map(MifareKey)
            .ok_or_else(|| KeyError::InvalidFormat(s.to_string()))
    }
}

impl From<[u8; KEY_LEN]> for MifareKey {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        MifareKey(bytes)
    }
}
