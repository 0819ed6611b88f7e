//! External Encoding of 32-byte Values
//!
//! Every committed value (roots, token hashes, vote hashes, nullifiers) leaves
//! the process as `0x` followed by exactly 64 lowercase hex characters.

use thiserror::Error;

/// Length of the hex body (without prefix) for a 32-byte value.
pub const HEX32_LEN: usize = 64;

/// Errors raised while parsing externally encoded values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// Value did not start with `0x`.
    #[error("missing 0x prefix")]
    MissingPrefix,

    /// Hex body had the wrong number of characters.
    #[error("expected {HEX32_LEN} hex characters, got {0}")]
    BadLength(usize),

    /// Hex body contained a non-hex character.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Value is not a canonical element of the proving field.
    #[error("value is not below the field modulus")]
    NonCanonical,

    /// Decimal literal was empty or had a non-digit.
    #[error("invalid decimal literal: {0}")]
    InvalidDecimal(String),
}

/// Encode 32 bytes as `0x` + 64 hex characters.
pub fn encode_hex32(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode `0x` + 64 hex characters into 32 bytes.
pub fn decode_hex32(s: &str) -> Result<[u8; 32], EncodingError> {
    let body = s.strip_prefix("0x").ok_or(EncodingError::MissingPrefix)?;
    if body.len() != HEX32_LEN {
        return Err(EncodingError::BadLength(body.len()));
    }

    let mut out = [0u8; 32];
    hex::decode_to_slice(body, &mut out)
        .map_err(|e| EncodingError::InvalidHex(e.to_string()))?;
    Ok(out)
}

/// Serde adapter for variable-length byte strings as `0x`-prefixed hex.
///
/// Used for encrypted ballots, whose length is chosen by the client.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as `0x` + hex.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    /// Deserialize `0x` + hex into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let body = s
            .strip_prefix("0x")
            .ok_or_else(|| serde::de::Error::custom(super::EncodingError::MissingPrefix))?;
        hex::decode(body).map_err(serde::de::Error::custom)
    }
}
