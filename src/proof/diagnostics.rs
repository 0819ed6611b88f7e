//! Nullifier diagnostics.
//!
//! Re-derives the nullifier from witness material and compares it to a
//! prover's public output. Debug aid only: it needs the voter secret, so it is
//! gated behind `ProverConfig::diagnostics` and never runs on the verification
//! path.

use serde::{Serialize, Deserialize};

use crate::core::field::FieldElement;
use crate::core::hash::NodeHasher;
use crate::proof::circuit::{derive_nullifier, PublicSignals};

/// Outcome of a nullifier re-derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullifierDiagnosis {
    /// Nullifier derived locally.
    pub expected: FieldElement,
    /// Nullifier reported by the prover.
    pub observed: FieldElement,
}

impl NullifierDiagnosis {
    /// Whether both derivations agree.
    pub fn matches(&self) -> bool {
        self.expected == self.observed
    }
}

/// Compare the prover's nullifier with a local derivation.
pub fn diagnose_nullifier<H: NodeHasher + ?Sized>(
    hasher: &H,
    voter_national_id: &FieldElement,
    voter_secret: &FieldElement,
    signals: &PublicSignals,
) -> NullifierDiagnosis {
    NullifierDiagnosis {
        expected: derive_nullifier(hasher, voter_national_id, voter_secret, signals.election_id),
        observed: signals.nullifier,
    }
}
