//! Proof Orchestrator
//!
//! Builds the eligibility witness from a membership index, checks it locally
//! and hands it to a proving backend.
//!
//! ```text
//! index.path(i) ──► fold_path == root? ──► backend.prove ──► bundle
//!                        │ no                   │ transient error
//!                        ▼                      ▼
//!              WitnessInconsistency      retry with backoff
//! ```

use std::time::Duration;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info, warn, error, instrument};

use crate::core::field::FieldElement;
use crate::core::hash::NodeHasher;
use crate::proof::backend::{Proof, ProverError, ProvingBackend, VerificationKey};
use crate::proof::circuit::{EligibilityWitness, PublicSignals};
use crate::proof::diagnostics::diagnose_nullifier;
use crate::proof::merkle::{fold_path, IndexError, MembershipIndex};

// =============================================================================
// Configuration
// =============================================================================

/// Retry, timeout and diagnostics settings for proof generation.
#[derive(Clone, Debug)]
pub struct ProverConfig {
    /// Total prove attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between retries.
    pub max_backoff: Duration,
    /// Deadline for a single prove attempt.
    pub timeout: Duration,
    /// Re-derive and compare nullifiers after proving.
    pub diagnostics: bool,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            timeout: Duration::from_secs(120),
            diagnostics: false,
        }
    }
}

impl ProverConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors from proof orchestration.
#[derive(Debug, Error)]
pub enum ProofError {
    /// The voter leaf is not part of the index.
    #[error("voter is not in the membership index")]
    VoterNotInIndex,

    /// Index lookup failed.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// The local fold does not reach the expected root.
    #[error("witness inconsistency: root is {expected}, path folds to {computed}")]
    WitnessInconsistency {
        /// Root the proof is being made against.
        expected: FieldElement,
        /// Root obtained by folding the path.
        computed: FieldElement,
    },

    /// The backend failed to produce a proof.
    #[error("proving failed after {attempts} attempt(s): {source}")]
    ProvingFailed {
        /// Attempts made.
        attempts: u32,
        /// Last backend error.
        #[source]
        source: ProverError,
    },

    /// Public signals returned by the prover do not match the witness.
    #[error("prover returned public signals for a different statement")]
    SignalMismatch,

    /// The proof did not verify.
    #[error("proof verification failed")]
    VerificationFailed,
}

impl ProofError {
    /// Whether a caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProofError::ProvingFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// A generated eligibility proof ready for submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityProofBundle {
    /// Backend proof.
    pub proof: Proof,
    /// Public signals `[merkle_root, election_id, nullifier]`.
    pub public_signals: PublicSignals,
    /// Nullifier output.
    pub nullifier: FieldElement,
}

/// Drives witness construction and the proving backend.
#[derive(Clone, Debug)]
pub struct ProofOrchestrator<B> {
    backend: B,
    config: ProverConfig,
}

impl<B: ProvingBackend> ProofOrchestrator<B> {
    /// Create an orchestrator over a backend.
    pub fn new(backend: B, config: ProverConfig) -> Self {
        Self { backend, config }
    }

    /// Backend in use.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Active configuration.
    pub fn config(&self) -> &ProverConfig {
        &self.config
    }

    /// Prove eligibility of the voter at `leaf_index` against the index root.
    pub async fn generate_eligibility_proof<H: NodeHasher>(
        &self,
        index: &MembershipIndex<H>,
        leaf_index: usize,
        secret: &FieldElement,
        election_id: u64,
    ) -> Result<EligibilityProofBundle, ProofError> {
        self.generate_against_root(index, leaf_index, secret, election_id, index.root())
            .await
    }

    /// Prove eligibility of a voter looked up by leaf value.
    pub async fn prove_voter<H: NodeHasher>(
        &self,
        index: &MembershipIndex<H>,
        leaf: &FieldElement,
        secret: &FieldElement,
        election_id: u64,
    ) -> Result<EligibilityProofBundle, ProofError> {
        let leaf_index = index.position_of(leaf).ok_or(ProofError::VoterNotInIndex)?;
        self.generate_eligibility_proof(index, leaf_index, secret, election_id)
            .await
    }

    /// Prove eligibility against an externally published root.
    ///
    /// Fails with `WitnessInconsistency` before calling the backend when the
    /// path does not fold to `published_root` (stale or corrupted index).
    #[instrument(skip(self, index, secret, published_root), fields(leaf_count = index.leaf_count()))]
    pub async fn generate_against_root<H: NodeHasher>(
        &self,
        index: &MembershipIndex<H>,
        leaf_index: usize,
        secret: &FieldElement,
        election_id: u64,
        published_root: FieldElement,
    ) -> Result<EligibilityProofBundle, ProofError> {
        let path = index.path(leaf_index)?;
        let leaf = index.leaf(leaf_index).ok_or(ProofError::VoterNotInIndex)?;

        let computed = fold_path(index.hasher(), &leaf, &path);
        if computed != published_root {
            warn!("Witness does not fold to the published root");
            return Err(ProofError::WitnessInconsistency {
                expected: published_root,
                computed,
            });
        }

        let witness = EligibilityWitness::new(leaf, *secret, &path, published_root, election_id);
        let (proof, signals) = self.prove_with_retry(&witness).await?;

        if signals.merkle_root != published_root || signals.election_id != election_id {
            error!("Prover answered for root {} election {}", signals.merkle_root, signals.election_id);
            return Err(ProofError::SignalMismatch);
        }

        if self.config.diagnostics {
            let diagnosis = diagnose_nullifier(index.hasher(), &leaf, secret, &signals);
            if !diagnosis.matches() {
                warn!(
                    expected = %diagnosis.expected,
                    observed = %diagnosis.observed,
                    "Nullifier diverges from local derivation"
                );
            }
        }

        info!("Eligibility proof generated for election {}", election_id);
        Ok(EligibilityProofBundle {
            proof,
            nullifier: signals.nullifier,
            public_signals: signals,
        })
    }

    async fn prove_with_retry(
        &self,
        witness: &EligibilityWitness,
    ) -> Result<(Proof, PublicSignals), ProofError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(self.config.timeout, self.backend.prove(witness)).await {
                Ok(result) => result,
                Err(_) => Err(ProverError::Timeout(self.config.timeout)),
            };

            match result {
                Ok(output) => return Ok(output),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.config.backoff(attempt);
                    debug!("Prove attempt {} failed ({}), retrying in {:?}", attempt, e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!("Proving failed after {} attempt(s): {}", attempt, e);
                    return Err(ProofError::ProvingFailed { attempts: attempt, source: e });
                }
            }
        }
    }

    /// Optional pre-submission check. Never fails; problems are logged and
    /// reported as `false`.
    pub async fn verify_proof_locally(
        &self,
        proof: &Proof,
        signals: &PublicSignals,
        vk: &VerificationKey,
    ) -> bool {
        match self.backend.verify(vk, signals, proof).await {
            Ok(true) => true,
            Ok(false) => {
                warn!("Local verification rejected proof for election {}", signals.election_id);
                false
            }
            Err(e) => {
                warn!("Local verification could not run: {}", e);
                false
            }
        }
    }

    /// Verify a bundle, failing with `VerificationFailed` if it does not hold.
    pub async fn require_valid(
        &self,
        bundle: &EligibilityProofBundle,
        vk: &VerificationKey,
    ) -> Result<(), ProofError> {
        if self.verify_proof_locally(&bundle.proof, &bundle.public_signals, vk).await {
            Ok(())
        } else {
            Err(ProofError::VerificationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::core::field::{voter_leaf, voter_secret};
    use crate::core::hash::PoseidonNodeHasher;
    use crate::proof::backend::TranscriptBackend;
    use crate::proof::circuit::derive_nullifier;

    fn fast_config() -> ProverConfig {
        ProverConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            timeout: Duration::from_secs(5),
            diagnostics: true,
        }
    }

    fn index() -> MembershipIndex {
        MembershipIndex::from_national_ids(&["ID-0", "ID-1", "ID-2"]).unwrap()
    }

    /// Fails the first `failures` prove calls, then delegates.
    struct FlakyBackend {
        inner: TranscriptBackend,
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl ProvingBackend for FlakyBackend {
        async fn prove(
            &self,
            witness: &EligibilityWitness,
        ) -> Result<(Proof, PublicSignals), ProverError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ProverError::ProofGeneration("out of memory".into()));
            }
            self.inner.prove(witness).await
        }

        async fn verify(
            &self,
            vk: &VerificationKey,
            signals: &PublicSignals,
            proof: &Proof,
        ) -> Result<bool, ProverError> {
            self.inner.verify(vk, signals, proof).await
        }
    }

    struct SlowBackend;

    impl ProvingBackend for SlowBackend {
        async fn prove(
            &self,
            _witness: &EligibilityWitness,
        ) -> Result<(Proof, PublicSignals), ProverError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(ProverError::ProofGeneration("unreachable".into()))
        }

        async fn verify(
            &self,
            _vk: &VerificationKey,
            _signals: &PublicSignals,
            _proof: &Proof,
        ) -> Result<bool, ProverError> {
            Err(ProverError::Verifier("no verifier".into()))
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let config = ProverConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..Default::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(350));
        assert_eq!(config.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_generate_and_verify() {
        let (backend, vk) = TranscriptBackend::setup(b"seed");
        let orchestrator = ProofOrchestrator::new(backend, fast_config());
        let index = index();
        let secret = voter_secret(b"k1");

        let bundle = orchestrator
            .generate_eligibility_proof(&index, 1, &secret, 42)
            .await
            .unwrap();

        assert_eq!(bundle.public_signals.merkle_root, index.root());
        assert_eq!(bundle.public_signals.election_id, 42);
        assert_eq!(
            bundle.nullifier,
            derive_nullifier(&PoseidonNodeHasher, &voter_leaf("ID-1"), &secret, 42)
        );
        assert!(orchestrator.verify_proof_locally(&bundle.proof, &bundle.public_signals, &vk).await);
        orchestrator.require_valid(&bundle, &vk).await.unwrap();
    }

    #[tokio::test]
    async fn test_voter_not_in_index() {
        let (backend, _) = TranscriptBackend::setup(b"seed");
        let orchestrator = ProofOrchestrator::new(backend, fast_config());

        let result = orchestrator
            .prove_voter(&index(), &voter_leaf("ID-9"), &voter_secret(b"k"), 1)
            .await;
        assert!(matches!(result, Err(ProofError::VoterNotInIndex)));
    }

    #[tokio::test]
    async fn test_index_out_of_range() {
        let (backend, _) = TranscriptBackend::setup(b"seed");
        let orchestrator = ProofOrchestrator::new(backend, fast_config());

        let result = orchestrator
            .generate_eligibility_proof(&index(), 3, &voter_secret(b"k"), 1)
            .await;
        assert!(matches!(result, Err(ProofError::Index(IndexError::IndexOutOfRange { .. }))));
    }

    #[tokio::test]
    async fn test_stale_root_fails_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let backend = FlakyBackend {
            inner: TranscriptBackend::setup(b"seed").0,
            failures: 0,
            calls: calls.clone(),
        };
        let orchestrator = ProofOrchestrator::new(backend, fast_config());
        let stale = MembershipIndex::from_national_ids(&["ID-0", "ID-1"]).unwrap().root();

        let result = orchestrator
            .generate_against_root(&index(), 0, &voter_secret(b"k"), 1, stale)
            .await;

        assert!(matches!(result, Err(ProofError::WitnessInconsistency { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let backend = FlakyBackend {
            inner: TranscriptBackend::setup(b"seed").0,
            failures: 2,
            calls: calls.clone(),
        };
        let orchestrator = ProofOrchestrator::new(backend, fast_config());

        let bundle = orchestrator
            .generate_eligibility_proof(&index(), 2, &voter_secret(b"k"), 5)
            .await;

        assert!(bundle.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let backend = FlakyBackend {
            inner: TranscriptBackend::setup(b"seed").0,
            failures: 10,
            calls: calls.clone(),
        };
        let orchestrator = ProofOrchestrator::new(backend, fast_config());

        let err = orchestrator
            .generate_eligibility_proof(&index(), 0, &voter_secret(b"k"), 5)
            .await
            .unwrap_err();

        assert!(matches!(err, ProofError::ProvingFailed { attempts: 3, .. }));
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let config = ProverConfig {
            max_attempts: 1,
            timeout: Duration::from_millis(10),
            ..fast_config()
        };
        let orchestrator = ProofOrchestrator::new(SlowBackend, config);

        let err = orchestrator
            .generate_eligibility_proof(&index(), 0, &voter_secret(b"k"), 5)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProofError::ProvingFailed { attempts: 1, source: ProverError::Timeout(_) }
        ));
    }

    #[tokio::test]
    async fn test_local_verification_is_not_fatal() {
        let orchestrator = ProofOrchestrator::new(SlowBackend, fast_config());
        let (_, vk) = TranscriptBackend::setup(b"seed");
        let proof = Proof { circuit_id: vk.circuit_id.clone(), data: vec![0; 32] };
        let signals = PublicSignals {
            merkle_root: FieldElement::from_u64(1),
            election_id: 1,
            nullifier: FieldElement::from_u64(2),
        };

        assert!(!orchestrator.verify_proof_locally(&proof, &signals, &vk).await);
    }

    #[tokio::test]
    async fn test_tampered_bundle_fails_verification() {
        let (backend, vk) = TranscriptBackend::setup(b"seed");
        let orchestrator = ProofOrchestrator::new(backend, fast_config());

        let mut bundle = orchestrator
            .generate_eligibility_proof(&index(), 0, &voter_secret(b"k"), 8)
            .await
            .unwrap();
        bundle.public_signals.nullifier = FieldElement::from_u64(77);

        let err = orchestrator.require_valid(&bundle, &vk).await.unwrap_err();
        assert!(matches!(err, ProofError::VerificationFailed));
        assert!(!err.is_retryable());
    }
}
