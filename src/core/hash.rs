//! Hashing for Commitments
//!
//! Provides:
//! - `Hash32` digests for token hashes, vote hashes and aggregate roots
//! - `DigestBuilder` for order-sensitive, domain-separated hashing
//! - the `NodeHasher` capability used by the membership index and circuit

use std::fmt;

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher};
use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

use super::encoding::{decode_hex32, encode_hex32, EncodingError};
use super::field::{hash_to_field, FieldElement};

/// Domain separator for Merkle internal nodes.
const MERKLE_NODE_DOMAIN: &[u8] = b"ZK_BALLOT_MERKLE_NODE_V1";

/// 256-bit SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// All-zero digest, used for "absent" fields in read results.
    pub const ZERO: Self = Self([0; 32]);

    /// Parse `0x` + 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, EncodingError> {
        decode_hex32(s).map(Self)
    }

    /// Encode as `0x` + 64 hex characters.
    pub fn to_hex(&self) -> String {
        encode_hex32(&self.0)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Hash32 {
    type Error = EncodingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Hash32> for String {
    fn from(value: Hash32) -> Self {
        value.to_hex()
    }
}

/// Deterministic, domain-separated SHA-256 builder.
///
/// Order of updates is part of the digest.
pub struct DigestBuilder {
    hasher: Sha256,
}

impl DigestBuilder {
    /// Create a new builder with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a length-prefixed byte string, so adjacent variable-length
    /// fields cannot be shifted into one another.
    #[inline]
    pub fn update_prefixed(&mut self, bytes: &[u8]) {
        self.update_u64(bytes.len() as u64);
        self.hasher.update(bytes);
    }

    /// Update with a u64 value (big-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_be_bytes());
    }

    /// Update with a digest.
    #[inline]
    pub fn update_hash(&mut self, hash: &Hash32) {
        self.hasher.update(hash.0);
    }

    /// Update with a field element.
    #[inline]
    pub fn update_field(&mut self, value: &FieldElement) {
        self.hasher.update(value.to_bytes());
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> Hash32 {
        Hash32(self.hasher.finalize().into())
    }
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Hash32 {
    let mut builder = DigestBuilder::new(domain);
    builder.update_bytes(data);
    builder.finalize()
}

// =============================================================================
// NODE HASHER CAPABILITY
// =============================================================================

/// Two-to-one hash over the proving field.
///
/// Passed explicitly to the membership index and the circuit evaluator so the
/// two always agree and tests can substitute a transparent mock.
pub trait NodeHasher: Send + Sync {
    /// Hash an ordered pair of field elements.
    fn hash_pair(&self, left: &FieldElement, right: &FieldElement) -> FieldElement;

    /// Hash three field elements. Defaults to `hash_pair(hash_pair(a, b), c)`.
    fn hash3(&self, a: &FieldElement, b: &FieldElement, c: &FieldElement) -> FieldElement {
        self.hash_pair(&self.hash_pair(a, b), c)
    }
}

/// Circom-compatible Poseidon over BN254, matching the circuit's hash.
#[derive(Clone, Copy, Debug, Default)]
pub struct PoseidonNodeHasher;

impl PoseidonNodeHasher {
    fn hash_fields(inputs: &[FieldElement]) -> FieldElement {
        let inputs: Vec<Fr> = inputs.iter().map(|f| f.into_inner()).collect();
        // Widths 2 and 3 are always supported by the circom parameter set.
        let mut poseidon = Poseidon::<Fr>::new_circom(inputs.len()).expect("poseidon width is supported");
        poseidon
            .hash(&inputs)
            .map(FieldElement::from)
            .expect("input count matches poseidon width")
    }
}

impl NodeHasher for PoseidonNodeHasher {
    fn hash_pair(&self, left: &FieldElement, right: &FieldElement) -> FieldElement {
        Self::hash_fields(&[*left, *right])
    }

    fn hash3(&self, a: &FieldElement, b: &FieldElement, c: &FieldElement) -> FieldElement {
        Self::hash_fields(&[*a, *b, *c])
    }
}

/// SHA-256 node hasher with domain separation, reduced into the field.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256NodeHasher;

impl NodeHasher for Sha256NodeHasher {
    fn hash_pair(&self, left: &FieldElement, right: &FieldElement) -> FieldElement {
        let mut data = [0u8; 64];
        data[..32].copy_from_slice(&left.to_bytes());
        data[32..].copy_from_slice(&right.to_bytes());
        hash_to_field(MERKLE_NODE_DOMAIN, &data)
    }
}

impl<H: NodeHasher + ?Sized> NodeHasher for std::sync::Arc<H> {
    fn hash_pair(&self, left: &FieldElement, right: &FieldElement) -> FieldElement {
        (**self).hash_pair(left, right)
    }

    fn hash3(&self, a: &FieldElement, b: &FieldElement, c: &FieldElement) -> FieldElement {
        (**self).hash3(a, b, c)
    }
}

// =============================================================================
// TESTS
// =============================================================================
