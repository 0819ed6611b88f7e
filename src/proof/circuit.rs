//! Eligibility Circuit
//!
//! Constraint system an external prover enforces:
//!
//! ```text
//! private: voter_national_id, voter_secret, path_elements[20], path_indices[20]
//! public:  merkle_root, election_id
//! output:  nullifier
//!
//! (1) fold_path(voter_national_id, path) == merkle_root      (carry rule)
//! (2) nullifier == H3(voter_national_id, voter_secret, election_id)
//! ```
//!
//! `evaluate` is the reference evaluation of these constraints. The in-process
//! transcript backend proves with it, and tests use it to check witnesses.

use std::fmt;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::field::FieldElement;
use crate::core::hash::{DigestBuilder, Hash32, NodeHasher};
use crate::proof::merkle::{fold_path, InclusionPath, TREE_DEPTH};

/// Identifier of the compiled eligibility circuit.
pub const CIRCUIT_ID: &str = "voter_eligibility_v1";

/// Number of public signals: merkle_root, election_id, nullifier.
pub const PUBLIC_SIGNAL_COUNT: usize = 3;

/// Domain separator for anonymous token derivation.
const VOTER_TOKEN_DOMAIN: &[u8] = b"ZK_BALLOT_VOTER_TOKEN_V1";

/// Election id as a field element.
pub fn election_field(election_id: u64) -> FieldElement {
    FieldElement::from_u64(election_id)
}

/// Derive the nullifier for `(voter, secret, election)`.
pub fn derive_nullifier<H: NodeHasher + ?Sized>(
    hasher: &H,
    voter_national_id: &FieldElement,
    voter_secret: &FieldElement,
    election_id: u64,
) -> FieldElement {
    hasher.hash3(voter_national_id, voter_secret, &election_field(election_id))
}

/// Anonymous token hash a voter registers with the authority.
///
/// Bound to the election and the nullifier, so a second proof for the same
/// (voter, election) maps onto the same, already consumed, token.
pub fn voter_token_hash(election_id: u64, nullifier: &FieldElement) -> Hash32 {
    let mut builder = DigestBuilder::new(VOTER_TOKEN_DOMAIN);
    builder.update_u64(election_id);
    builder.update_field(nullifier);
    builder.finalize()
}

/// Full circuit input for one proof attempt.
///
/// Holds the voter's secret; never persisted and redacted from `Debug`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityWitness {
    /// Private: the voter leaf.
    pub voter_national_id: FieldElement,
    /// Private: the voter's secret.
    pub voter_secret: FieldElement,
    /// Private: path siblings (zero = carry).
    pub merkle_path_elements: [FieldElement; TREE_DEPTH],
    /// Private: path direction bits.
    pub merkle_path_indices: [u8; TREE_DEPTH],
    /// Public: membership root.
    pub merkle_root: FieldElement,
    /// Public: election identifier.
    pub election_id: u64,
}

impl EligibilityWitness {
    /// Assemble a witness from its parts.
    pub fn new(
        voter_national_id: FieldElement,
        voter_secret: FieldElement,
        path: &InclusionPath,
        merkle_root: FieldElement,
        election_id: u64,
    ) -> Self {
        Self {
            voter_national_id,
            voter_secret,
            merkle_path_elements: path.elements,
            merkle_path_indices: path.indices,
            merkle_root,
            election_id,
        }
    }

    /// Inclusion path view of the private path inputs.
    pub fn path(&self) -> InclusionPath {
        InclusionPath {
            elements: self.merkle_path_elements,
            indices: self.merkle_path_indices,
        }
    }
}

impl fmt::Debug for EligibilityWitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EligibilityWitness")
            .field("voter_national_id", &"<redacted>")
            .field("voter_secret", &"<redacted>")
            .field("merkle_root", &self.merkle_root)
            .field("election_id", &self.election_id)
            .finish()
    }
}

/// Public signals in circuit order `[merkle_root, election_id, nullifier]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSignals {
    /// Membership root the proof was made against.
    pub merkle_root: FieldElement,
    /// Election identifier.
    pub election_id: u64,
    /// Nullifier output.
    pub nullifier: FieldElement,
}

impl PublicSignals {
    /// Signals as field elements in circuit order.
    pub fn to_fields(&self) -> [FieldElement; PUBLIC_SIGNAL_COUNT] {
        [self.merkle_root, election_field(self.election_id), self.nullifier]
    }

    /// Rebuild from field elements in circuit order.
    pub fn from_fields(fields: &[FieldElement]) -> Result<Self, ConstraintViolation> {
        let [merkle_root, election, nullifier] = fields else {
            return Err(ConstraintViolation::SignalCount(fields.len()));
        };

        let election_id = election.to_u64().ok_or(ConstraintViolation::ElectionIdRange)?;

        Ok(Self {
            merkle_root: *merkle_root,
            election_id,
            nullifier: *nullifier,
        })
    }
}

/// A constraint the witness does not satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintViolation {
    /// Constraint (1): the path does not fold to the claimed root.
    #[error("membership constraint failed: path folds to {computed}, root is {expected}")]
    Membership {
        /// Root claimed by the witness.
        expected: FieldElement,
        /// Root obtained by folding.
        computed: FieldElement,
    },

    /// A path bit outside {0, 1}.
    #[error("path bit at level {0} is not boolean")]
    NonBooleanBit(usize),

    /// Wrong number of public signals.
    #[error("expected {PUBLIC_SIGNAL_COUNT} public signals, got {0}")]
    SignalCount(usize),

    /// Election id signal does not fit in u64.
    #[error("election id signal out of range")]
    ElectionIdRange,
}

/// Evaluate the constraint system, returning the public signals on success.
pub fn evaluate<H: NodeHasher + ?Sized>(
    hasher: &H,
    witness: &EligibilityWitness,
) -> Result<PublicSignals, ConstraintViolation> {
    if let Some(level) = witness.merkle_path_indices.iter().position(|b| *b > 1) {
        return Err(ConstraintViolation::NonBooleanBit(level));
    }

    let computed = fold_path(hasher, &witness.voter_national_id, &witness.path());
    if computed != witness.merkle_root {
        return Err(ConstraintViolation::Membership {
            expected: witness.merkle_root,
            computed,
        });
    }

    Ok(PublicSignals {
        merkle_root: witness.merkle_root,
        election_id: witness.election_id,
        nullifier: derive_nullifier(
            hasher,
            &witness.voter_national_id,
            &witness.voter_secret,
            witness.election_id,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::{voter_leaf, voter_secret};
    use crate::core::hash::PoseidonNodeHasher;
    use crate::proof::merkle::MembershipIndex;

    fn witness_for(index: &MembershipIndex, i: usize, election_id: u64) -> EligibilityWitness {
        EligibilityWitness::new(
            index.leaf(i).unwrap(),
            voter_secret(b"secret"),
            &index.path(i).unwrap(),
            index.root(),
            election_id,
        )
    }

    #[test]
    fn test_nullifier_determinism() {
        let h = PoseidonNodeHasher;
        let id = voter_leaf("ID-1");
        let secret = voter_secret(b"s");

        let n1 = derive_nullifier(&h, &id, &secret, 7);
        let n2 = derive_nullifier(&h, &id, &secret, 7);
        assert_eq!(n1, n2);

        assert_ne!(n1, derive_nullifier(&h, &id, &secret, 8));
        assert_ne!(n1, derive_nullifier(&h, &id, &voter_secret(b"t"), 7));
    }

    #[test]
    fn test_evaluate_valid_witness() {
        let index = MembershipIndex::from_national_ids(&["a", "b", "c", "d", "e"]).unwrap();
        for i in 0..5 {
            let witness = witness_for(&index, i, 3);
            let signals = evaluate(&PoseidonNodeHasher, &witness).unwrap();
            assert_eq!(signals.merkle_root, index.root());
            assert_eq!(signals.election_id, 3);
            assert_eq!(
                signals.nullifier,
                derive_nullifier(&PoseidonNodeHasher, &witness.voter_national_id, &witness.voter_secret, 3)
            );
        }
    }

    #[test]
    fn test_evaluate_rejects_foreign_leaf() {
        let index = MembershipIndex::from_national_ids(&["a", "b", "c"]).unwrap();
        let mut witness = witness_for(&index, 0, 1);
        witness.voter_national_id = voter_leaf("mallory");

        assert!(matches!(
            evaluate(&PoseidonNodeHasher, &witness),
            Err(ConstraintViolation::Membership { .. })
        ));
    }

    #[test]
    fn test_evaluate_rejects_non_boolean_bit() {
        let index = MembershipIndex::from_national_ids(&["a", "b"]).unwrap();
        let mut witness = witness_for(&index, 0, 1);
        witness.merkle_path_indices[3] = 2;
        assert_eq!(evaluate(&PoseidonNodeHasher, &witness), Err(ConstraintViolation::NonBooleanBit(3)));
    }

    #[test]
    fn test_public_signal_order() {
        let signals = PublicSignals {
            merkle_root: FieldElement::from_u64(11),
            election_id: 5,
            nullifier: FieldElement::from_u64(99),
        };
        let fields = signals.to_fields();
        assert_eq!(fields[1], FieldElement::from_u64(5));
        assert_eq!(PublicSignals::from_fields(&fields).unwrap(), signals);

        assert_eq!(
            PublicSignals::from_fields(&fields[..2]),
            Err(ConstraintViolation::SignalCount(2))
        );
        let wide = [fields[0], FieldElement::from_hex(&format!("0x01{}", "00".repeat(31))).unwrap(), fields[2]];
        assert_eq!(PublicSignals::from_fields(&wide), Err(ConstraintViolation::ElectionIdRange));
    }

    #[test]
    fn test_witness_debug_redacts_secret() {
        let index = MembershipIndex::from_national_ids(&["a"]).unwrap();
        let witness = witness_for(&index, 0, 1);
        let printed = format!("{:?}", witness);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains(&witness.voter_secret.to_hex()));
    }

    #[test]
    fn test_voter_token_hash_binds_election() {
        let n = FieldElement::from_u64(1234);
        assert_eq!(voter_token_hash(1, &n), voter_token_hash(1, &n));
        assert_ne!(voter_token_hash(1, &n), voter_token_hash(2, &n));
    }
}
