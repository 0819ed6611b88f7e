//! Proving Backends
//!
//! The arithmetic prover is an external capability. `ProvingBackend` is the
//! port; `TranscriptBackend` is an in-process reference implementation and
//! `CommandBackend` (see `external.rs`) drives a snarkjs-compatible CLI.

use std::future::Future;
use std::time::Duration;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::{DigestBuilder, Hash32, NodeHasher, PoseidonNodeHasher};
use crate::proof::circuit::{evaluate, EligibilityWitness, PublicSignals, CIRCUIT_ID};

/// Domain separator for transcript proofs.
const TRANSCRIPT_PROOF_DOMAIN: &[u8] = b"ZK_BALLOT_TRANSCRIPT_PROOF_V1";

/// Domain separator for transcript verification keys.
const TRANSCRIPT_VK_DOMAIN: &[u8] = b"ZK_BALLOT_TRANSCRIPT_VK_V1";

/// Opaque proof produced by a backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Circuit the proof was produced for.
    pub circuit_id: String,
    /// Backend-specific proof encoding.
    pub data: Vec<u8>,
}

/// Verification key for one circuit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKey {
    /// Circuit the key belongs to.
    pub circuit_id: String,
    /// Backend-specific key encoding.
    pub data: Vec<u8>,
}

/// Errors reported by a proving backend.
#[derive(Debug, Error)]
pub enum ProverError {
    /// The circuit rejected the witness.
    #[error("witness rejected by circuit: {0}")]
    WitnessRejected(String),

    /// The prover ran but failed.
    #[error("proof generation failed: {0}")]
    ProofGeneration(String),

    /// The verifier could not run to completion.
    #[error("verifier failed to run: {0}")]
    Verifier(String),

    /// Prover output could not be parsed.
    #[error("malformed prover output: {0}")]
    MalformedOutput(String),

    /// Proof was produced for another circuit.
    #[error("circuit mismatch: expected {expected}, got {got}")]
    CircuitMismatch {
        /// Circuit the caller asked for.
        expected: String,
        /// Circuit the artifact names.
        got: String,
    },

    /// The prover did not answer in time.
    #[error("prover timed out after {0:?}")]
    Timeout(Duration),

    /// IO error talking to the prover.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProverError {
    /// Whether the failure may clear up on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProverError::ProofGeneration(_) | ProverError::Timeout(_) | ProverError::Io(_)
        )
    }
}

/// External proving capability.
///
/// `prove(circuit, witness) -> (proof, public signals)` and
/// `verify(vk, public signals, proof) -> bool`.
pub trait ProvingBackend: Send + Sync {
    /// Generate a proof for the eligibility circuit.
    fn prove(
        &self,
        witness: &EligibilityWitness,
    ) -> impl Future<Output = Result<(Proof, PublicSignals), ProverError>> + Send;

    /// Verify a proof against public signals.
    fn verify(
        &self,
        vk: &VerificationKey,
        signals: &PublicSignals,
        proof: &Proof,
    ) -> impl Future<Output = Result<bool, ProverError>> + Send;
}

/// In-process reference backend.
///
/// Evaluates the constraint system directly and emits a digest binding the
/// setup key to the public signals. It is NOT zero-knowledge or sound against
/// a party holding the setup seed; it exists for tests, demos and local runs.
#[derive(Clone, Debug)]
pub struct TranscriptBackend<H = PoseidonNodeHasher> {
    hasher: H,
    setup_key: Hash32,
}

impl TranscriptBackend<PoseidonNodeHasher> {
    /// Create a backend and its verification key from a setup seed.
    pub fn setup(seed: &[u8]) -> (Self, VerificationKey) {
        Self::setup_with_hasher(seed, PoseidonNodeHasher)
    }
}

impl<H: NodeHasher> TranscriptBackend<H> {
    /// Create a backend over a specific node hasher.
    pub fn setup_with_hasher(seed: &[u8], hasher: H) -> (Self, VerificationKey) {
        let mut builder = DigestBuilder::new(TRANSCRIPT_VK_DOMAIN);
        builder.update_prefixed(CIRCUIT_ID.as_bytes());
        builder.update_prefixed(seed);
        let setup_key = builder.finalize();

        let vk = VerificationKey {
            circuit_id: CIRCUIT_ID.to_string(),
            data: setup_key.0.to_vec(),
        };

        (Self { hasher, setup_key }, vk)
    }

    fn transcript(key: &[u8], signals: &PublicSignals) -> Hash32 {
        let mut builder = DigestBuilder::new(TRANSCRIPT_PROOF_DOMAIN);
        builder.update_prefixed(key);
        for field in signals.to_fields().iter() {
            builder.update_field(field);
        }
        builder.finalize()
    }
}

impl<H: NodeHasher> ProvingBackend for TranscriptBackend<H> {
    async fn prove(
        &self,
        witness: &EligibilityWitness,
    ) -> Result<(Proof, PublicSignals), ProverError> {
        let signals = evaluate(&self.hasher, witness)
            .map_err(|e| ProverError::WitnessRejected(e.to_string()))?;

        let proof = Proof {
            circuit_id: CIRCUIT_ID.to_string(),
            data: Self::transcript(&self.setup_key.0, &signals).0.to_vec(),
        };

        Ok((proof, signals))
    }

    async fn verify(
        &self,
        vk: &VerificationKey,
        signals: &PublicSignals,
        proof: &Proof,
    ) -> Result<bool, ProverError> {
        if vk.circuit_id != proof.circuit_id {
            return Err(ProverError::CircuitMismatch {
                expected: vk.circuit_id.clone(),
                got: proof.circuit_id.clone(),
            });
        }

        Ok(Self::transcript(&vk.data, signals).0.as_slice() == proof.data.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::{voter_secret, FieldElement};
    use crate::proof::merkle::MembershipIndex;

    fn witness() -> EligibilityWitness {
        let index = MembershipIndex::from_national_ids(&["a", "b", "c"]).unwrap();
        EligibilityWitness::new(
            index.leaf(1).unwrap(),
            voter_secret(b"k"),
            &index.path(1).unwrap(),
            index.root(),
            9,
        )
    }

    #[tokio::test]
    async fn test_transcript_prove_verify() {
        let (backend, vk) = TranscriptBackend::setup(b"seed");
        let (proof, signals) = backend.prove(&witness()).await.unwrap();

        assert_eq!(proof.circuit_id, CIRCUIT_ID);
        assert!(backend.verify(&vk, &signals, &proof).await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_signals_fail() {
        let (backend, vk) = TranscriptBackend::setup(b"seed");
        let (proof, mut signals) = backend.prove(&witness()).await.unwrap();

        signals.election_id += 1;
        assert!(!backend.verify(&vk, &signals, &proof).await.unwrap());
    }

    #[tokio::test]
    async fn test_other_setup_key_fails() {
        let (backend, _) = TranscriptBackend::setup(b"seed");
        let (_, other_vk) = TranscriptBackend::setup(b"other");
        let (proof, signals) = backend.prove(&witness()).await.unwrap();

        assert!(!backend.verify(&other_vk, &signals, &proof).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_witness_rejected() {
        let (backend, _) = TranscriptBackend::setup(b"seed");
        let mut w = witness();
        w.merkle_root = FieldElement::from_u64(1);
        assert!(matches!(backend.prove(&w).await, Err(ProverError::WitnessRejected(_))));
    }
}
