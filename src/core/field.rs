//! Proving-Field Elements
//!
//! Elements of the BN254 scalar field, the field the eligibility circuit is
//! expressed over. Zero doubles as the "no sibling" sentinel in inclusion
//! paths.

use std::fmt;
use std::str::FromStr;

use ark_bn254::Fr;
use ark_ff::{AdditiveGroup, BigInteger, PrimeField};
use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

use super::encoding::{decode_hex32, encode_hex32, EncodingError};

/// Domain separator for deriving voter leaves from national identifiers.
const VOTER_LEAF_DOMAIN: &[u8] = b"ZK_BALLOT_VOTER_LEAF_V1";

/// Domain separator for deriving voter secrets from raw key material.
const VOTER_SECRET_DOMAIN: &[u8] = b"ZK_BALLOT_VOTER_SECRET_V1";

/// Element of the proving field.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldElement(Fr);

impl FieldElement {
    /// Additive identity; the carry sentinel in inclusion paths.
    pub const ZERO: Self = Self(Fr::ZERO);

    /// Create from big-endian bytes, rejecting values >= the modulus.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, EncodingError> {
        let value = Self(Fr::from_be_bytes_mod_order(&bytes));
        if value.to_bytes() != bytes {
            return Err(EncodingError::NonCanonical);
        }
        Ok(value)
    }

    /// Embed a u64 (always canonical).
    pub fn from_u64(value: u64) -> Self {
        Self(Fr::from(value))
    }

    /// Parse `0x` + 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, EncodingError> {
        Self::from_bytes(decode_hex32(s)?)
    }

    /// Parse a decimal literal, as printed by snarkjs in `public.json`.
    ///
    /// `Fr::from_str` reduces modulo r; values that needed reducing are
    /// rejected as non-canonical.
    pub fn from_decimal(s: &str) -> Result<Self, EncodingError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EncodingError::InvalidDecimal(s.to_string()));
        }
        let value = Fr::from_str(s).map_err(|_| EncodingError::InvalidDecimal(s.to_string()))?;

        let digits = s.trim_start_matches('0');
        let expected = if digits.is_empty() { "0" } else { digits };
        if value.into_bigint().to_string() != expected {
            return Err(EncodingError::NonCanonical);
        }
        Ok(Self(value))
    }

    /// Encode as `0x` + 64 hex characters.
    pub fn to_hex(&self) -> String {
        encode_hex32(&self.to_bytes())
    }

    /// Canonical decimal form.
    pub fn to_decimal(&self) -> String {
        self.0.into_bigint().to_string()
    }

    /// Canonical big-endian bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0.into_bigint().to_bytes_be());
        out
    }

    /// The value as a u64, if it fits.
    pub fn to_u64(&self) -> Option<u64> {
        let limbs = self.0.into_bigint().0;
        limbs[1..].iter().all(|l| *l == 0).then_some(limbs[0])
    }

    /// Underlying arkworks element.
    pub fn into_inner(self) -> Fr {
        self.0
    }

    /// Is this the additive identity?
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == Fr::ZERO
    }
}

impl From<Fr> for FieldElement {
    fn from(value: Fr) -> Self {
        Self(value)
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self.to_hex())
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for FieldElement {
    type Error = EncodingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<FieldElement> for String {
    fn from(value: FieldElement) -> Self {
        value.to_hex()
    }
}

/// Hash arbitrary data into the proving field with domain separation.
///
/// SHA-256 output reduced modulo r.
pub fn hash_to_field(domain: &[u8], data: &[u8]) -> FieldElement {
    let digest = Sha256::new().chain_update(domain).chain_update(data).finalize();
    FieldElement(Fr::from_be_bytes_mod_order(&digest))
}

/// Derive a voter leaf from a national identifier.
pub fn voter_leaf(national_id: &str) -> FieldElement {
    hash_to_field(VOTER_LEAF_DOMAIN, national_id.as_bytes())
}

/// Derive a voter secret from raw key material held by the voter.
pub fn voter_secret(material: &[u8]) -> FieldElement {
    hash_to_field(VOTER_SECRET_DOMAIN, material)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modulus_bytes() -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&Fr::MODULUS.to_bytes_be());
        out
    }

    #[test]
    fn test_modulus_is_rejected() {
        assert_eq!(FieldElement::from_bytes(modulus_bytes()), Err(EncodingError::NonCanonical));
        assert_eq!(FieldElement::from_bytes([0xff; 32]), Err(EncodingError::NonCanonical));

        let mut below = modulus_bytes();
        below[31] -= 1;
        assert!(FieldElement::from_bytes(below).is_ok());
    }

    #[test]
    fn test_hash_to_field_is_canonical() {
        for i in 0..64u32 {
            let f = hash_to_field(b"test", &i.to_le_bytes());
            assert_eq!(FieldElement::from_bytes(f.to_bytes()), Ok(f));
        }
    }

    #[test]
    fn test_voter_leaf_deterministic_and_domain_separated() {
        assert_eq!(voter_leaf("ID-001"), voter_leaf("ID-001"));
        assert_ne!(voter_leaf("ID-001"), voter_leaf("ID-002"));
        assert_ne!(voter_leaf("ID-001"), voter_secret(b"ID-001"));
    }

    #[test]
    fn test_hex_and_decimal_agree() {
        let f = FieldElement::from_u64(0x0102);
        assert_eq!(FieldElement::from_hex(&f.to_hex()).unwrap(), f);
        assert_eq!(FieldElement::from_decimal("258").unwrap(), f);
        assert_eq!(FieldElement::from_decimal("000258").unwrap(), f);
        assert_eq!(f.to_decimal(), "258");
        assert_eq!(FieldElement::from_decimal("0").unwrap(), FieldElement::ZERO);
    }

    #[test]
    fn test_decimal_rejects_malformed_and_unreduced() {
        assert!(matches!(FieldElement::from_decimal(""), Err(EncodingError::InvalidDecimal(_))));
        assert!(matches!(FieldElement::from_decimal("12a"), Err(EncodingError::InvalidDecimal(_))));
        assert!(matches!(FieldElement::from_decimal("-1"), Err(EncodingError::InvalidDecimal(_))));

        let modulus = Fr::MODULUS.to_string();
        assert_eq!(FieldElement::from_decimal(&modulus), Err(EncodingError::NonCanonical));
    }

    #[test]
    fn test_to_u64() {
        assert_eq!(FieldElement::from_u64(u64::MAX).to_u64(), Some(u64::MAX));
        assert_eq!(voter_leaf("x").to_u64().is_some(), voter_leaf("x").to_bytes()[..24] == [0; 24]);
    }

    #[test]
    fn test_serde_uses_hex_string() {
        let f = FieldElement::from_u64(7);
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(json, format!("\"{}\"", f.to_hex()));

        let parsed: FieldElement = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, f);

        let bad = format!("\"0x{}\"", "ff".repeat(32));
        assert!(serde_json::from_str::<FieldElement>(&bad).is_err());
    }

    #[test]
    fn test_zero() {
        assert!(FieldElement::ZERO.is_zero());
        assert!(!FieldElement::from_u64(1).is_zero());
        assert_eq!(FieldElement::default(), FieldElement::ZERO);
    }
}
