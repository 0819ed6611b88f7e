//! Eligibility Proof System
//!
//! Voters prove membership in the registered-voter index without revealing
//! which leaf they are, and bind the proof to an election through a nullifier.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PROOF SYSTEM                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  merkle.rs       - Fixed-depth membership index (carry rule)│
//! │  circuit.rs      - Witness, public signals, nullifier       │
//! │  backend.rs      - Proving port + in-process backend        │
//! │  external.rs     - snarkjs-compatible command backend       │
//! │  orchestrator.rs - Witness checks, retry, local verify      │
//! │  diagnostics.rs  - Nullifier re-derivation (debug only)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod merkle;
pub mod circuit;
pub mod backend;
pub mod external;
pub mod orchestrator;
pub mod diagnostics;

// Re-export key types
pub use merkle::{
    fold_path, verify_path, IndexError, InclusionPath, MembershipIndex, MAX_LEAVES, TREE_DEPTH,
};
pub use circuit::{
    derive_nullifier, evaluate, voter_token_hash, ConstraintViolation, EligibilityWitness,
    PublicSignals, CIRCUIT_ID,
};
pub use backend::{Proof, ProverError, ProvingBackend, TranscriptBackend, VerificationKey};
pub use external::{CommandBackend, CommandBackendConfig};
pub use orchestrator::{EligibilityProofBundle, ProofError, ProofOrchestrator, ProverConfig};
pub use diagnostics::{diagnose_nullifier, NullifierDiagnosis};
