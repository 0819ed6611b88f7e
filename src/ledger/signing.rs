//! Vote Co-signing
//!
//! Accepted votes can be co-signed by an external signing capability over
//! `(vote_hash, election_id)`. The ledger does not inspect signature schemes;
//! it only enforces that a signature accompanies a vote when policy requires it.

use std::future::Future;
use std::str::FromStr;

use futures_util::future::BoxFuture;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::encoding::hex_bytes;
use crate::core::hash::{hash_with_domain, DigestBuilder, Hash32};
use crate::ledger::types::ElectionId;

/// Domain separator for keyed vote digests.
const VOTE_SIGNATURE_DOMAIN: &[u8] = b"ZK_BALLOT_VOTE_SIGNATURE_V1";

/// Domain separator for deriving a signing key from configured material.
const SIGNING_KEY_DOMAIN: &[u8] = b"ZK_BALLOT_SIGNING_KEY_V1";

/// Signature attached to a vote receipt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSignature {
    /// Identifier of the signer.
    pub signer: String,
    /// Scheme-specific signature bytes.
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

/// Signing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// The signer could not be reached or refused to sign.
    #[error("signer unavailable: {0}")]
    Unavailable(String),

    /// Unknown policy name.
    #[error("unknown signing policy: {0}")]
    UnknownPolicy(String),
}

/// When accepted votes must be co-signed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningPolicy {
    /// Never sign.
    #[default]
    Disabled,
    /// Sign when possible; a failure is logged and the vote still counts.
    Optional,
    /// A signing failure rejects the vote before any state changes.
    Required,
}

impl FromStr for SigningPolicy {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(Self::Disabled),
            "optional" => Ok(Self::Optional),
            "required" => Ok(Self::Required),
            other => Err(SigningError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Signing capability.
///
/// Signing may reach a remote service; the ledger calls it without holding
/// its lock.
pub trait VoteSigner: Send + Sync {
    /// Sign an accepted vote.
    fn sign(
        &self,
        election_id: ElectionId,
        vote_hash: &Hash32,
    ) -> impl Future<Output = Result<VoteSignature, SigningError>> + Send;
}

/// Object-safe form of `VoteSigner`, so a service can hold any signer.
pub(crate) trait DynVoteSigner: Send + Sync {
    fn sign_boxed<'a>(
        &'a self,
        election_id: ElectionId,
        vote_hash: &'a Hash32,
    ) -> BoxFuture<'a, Result<VoteSignature, SigningError>>;
}

impl<S: VoteSigner> DynVoteSigner for S {
    fn sign_boxed<'a>(
        &'a self,
        election_id: ElectionId,
        vote_hash: &'a Hash32,
    ) -> BoxFuture<'a, Result<VoteSignature, SigningError>> {
        Box::pin(self.sign(election_id, vote_hash))
    }
}

/// Keyed-digest signer used when no external signing service is wired in.
///
/// Produces `SHA-256(domain || key || election_id || vote_hash)`. Anyone with
/// the key can verify (and forge) signatures.
#[derive(Clone)]
pub struct KeyedDigestSigner {
    signer: String,
    key: Hash32,
}

impl KeyedDigestSigner {
    /// Create a signer from key material.
    pub fn new(signer: impl Into<String>, key_material: &[u8]) -> Self {
        Self {
            signer: signer.into(),
            key: hash_with_domain(SIGNING_KEY_DOMAIN, key_material),
        }
    }

    fn digest(&self, election_id: ElectionId, vote_hash: &Hash32) -> Hash32 {
        let mut builder = DigestBuilder::new(VOTE_SIGNATURE_DOMAIN);
        builder.update_hash(&self.key);
        builder.update_u64(election_id);
        builder.update_hash(vote_hash);
        builder.finalize()
    }

    /// Check a signature produced by this signer.
    pub fn verify(&self, election_id: ElectionId, vote_hash: &Hash32, signature: &VoteSignature) -> bool {
        signature.signer == self.signer
            && signature.bytes.as_slice() == self.digest(election_id, vote_hash).0.as_slice()
    }
}

impl VoteSigner for KeyedDigestSigner {
    async fn sign(&self, election_id: ElectionId, vote_hash: &Hash32) -> Result<VoteSignature, SigningError> {
        Ok(VoteSignature {
            signer: self.signer.clone(),
            bytes: self.digest(election_id, vote_hash).0.to_vec(),
        })
    }
}
