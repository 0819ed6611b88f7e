//! Voter Membership Index
//!
//! Fixed-depth (20) binary Merkle tree over voter leaves, bit-exact with the
//! eligibility circuit. An unpaired node is carried to the next level
//! unchanged; it is never hashed with an implicit zero sibling. Paths mark a
//! missing sibling with the zero element, and `fold_path` skips those levels.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::field::{voter_leaf, FieldElement};
use crate::core::hash::{NodeHasher, PoseidonNodeHasher};

/// Number of levels between a leaf and the root.
pub const TREE_DEPTH: usize = 20;

/// Maximum number of voters in one index (2^20).
pub const MAX_LEAVES: usize = 1 << TREE_DEPTH;

/// Errors from building or querying the index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// No leaves supplied.
    #[error("cannot build an index with no leaves")]
    EmptyIndex,

    /// Leaf index outside `0..leaf_count`.
    #[error("leaf index {index} out of range (leaf count {leaf_count})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of leaves in the index.
        leaf_count: usize,
    },

    /// More leaves than a depth-20 tree holds.
    #[error("{leaf_count} leaves exceed tree capacity {MAX_LEAVES}")]
    CapacityExceeded {
        /// Number of leaves supplied.
        leaf_count: usize,
    },

    /// A leaf equal to zero would be read as the carry sentinel.
    #[error("leaf {index} is the zero element")]
    ZeroLeaf {
        /// Position of the offending leaf.
        index: usize,
    },

    /// A path direction bit was neither 0 nor 1.
    #[error("path bit at level {level} is {value}, expected 0 or 1")]
    InvalidPathBit {
        /// Level of the offending bit.
        level: usize,
        /// Value found.
        value: u8,
    },
}

/// Inclusion path from one leaf to the root.
///
/// `elements[i] == 0` means "no sibling at level i, carry".
/// `indices[i] == 1` means the running node is the right child at level i.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionPath {
    /// Sibling per level (zero when absent).
    pub elements: [FieldElement; TREE_DEPTH],
    /// Direction bit per level.
    pub indices: [u8; TREE_DEPTH],
}

impl InclusionPath {
    /// Create a path, validating that every direction bit is 0 or 1.
    pub fn new(
        elements: [FieldElement; TREE_DEPTH],
        indices: [u8; TREE_DEPTH],
    ) -> Result<Self, IndexError> {
        if let Some((level, &value)) = indices.iter().enumerate().find(|(_, b)| **b > 1) {
            return Err(IndexError::InvalidPathBit { level, value });
        }
        Ok(Self { elements, indices })
    }

    /// Number of levels that carry a real sibling.
    pub fn sibling_count(&self) -> usize {
        self.elements.iter().filter(|e| !e.is_zero()).count()
    }
}

/// Fold a leaf up an inclusion path.
///
/// This is the single definition of the carry rule. The index verifier, the
/// orchestrator's pre-check and the reference circuit evaluator all call it.
pub fn fold_path<H: NodeHasher + ?Sized>(
    hasher: &H,
    leaf: &FieldElement,
    path: &InclusionPath,
) -> FieldElement {
    let mut current = *leaf;

    for (sibling, bit) in path.elements.iter().zip(path.indices.iter()) {
        if sibling.is_zero() {
            continue;
        }
        current = if *bit == 0 {
            hasher.hash_pair(&current, sibling)
        } else {
            hasher.hash_pair(sibling, &current)
        };
    }

    current
}

/// Verify an inclusion path against a root.
pub fn verify_path<H: NodeHasher + ?Sized>(
    hasher: &H,
    leaf: &FieldElement,
    path: &InclusionPath,
    root: &FieldElement,
) -> bool {
    if path.indices.iter().any(|b| *b > 1) {
        return false;
    }
    fold_path(hasher, leaf, path) == *root
}

/// Membership index for one election snapshot.
///
/// Built once and never mutated; rebuilding yields an independent value.
#[derive(Clone, Debug)]
pub struct MembershipIndex<H = PoseidonNodeHasher> {
    /// `levels[0]` are the leaves, `levels[TREE_DEPTH]` holds only the root.
    levels: Vec<Vec<FieldElement>>,
    hasher: H,
}

impl MembershipIndex<PoseidonNodeHasher> {
    /// Build an index from national identifiers with the Poseidon hasher.
    pub fn from_national_ids<S: AsRef<str>>(ids: &[S]) -> Result<Self, IndexError> {
        let leaves = ids.iter().map(|id| voter_leaf(id.as_ref())).collect();
        Self::build(leaves, PoseidonNodeHasher)
    }
}

impl<H: NodeHasher> MembershipIndex<H> {
    /// Build the index over an ordered list of leaves.
    pub fn build(leaves: Vec<FieldElement>, hasher: H) -> Result<Self, IndexError> {
        if leaves.is_empty() {
            return Err(IndexError::EmptyIndex);
        }
        if leaves.len() > MAX_LEAVES {
            return Err(IndexError::CapacityExceeded { leaf_count: leaves.len() });
        }
        if let Some(index) = leaves.iter().position(FieldElement::is_zero) {
            return Err(IndexError::ZeroLeaf { index });
        }

        let mut levels = Vec::with_capacity(TREE_DEPTH + 1);
        levels.push(leaves);

        for depth in 1..=TREE_DEPTH {
            let below = &levels[depth - 1];
            let mut next = Vec::with_capacity(below.len().div_ceil(2));

            for chunk in below.chunks(2) {
                match chunk {
                    [left, right] => next.push(hasher.hash_pair(left, right)),
                    [single] => next.push(*single),
                    _ => {}
                }
            }

            levels.push(next);
        }

        Ok(Self { levels, hasher })
    }

    /// Root at level `TREE_DEPTH`.
    pub fn root(&self) -> FieldElement {
        self.levels[TREE_DEPTH][0]
    }

    /// Number of voter leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Leaf at `index`, if any.
    pub fn leaf(&self, index: usize) -> Option<FieldElement> {
        self.levels[0].get(index).copied()
    }

    /// Position of a leaf, if registered.
    pub fn position_of(&self, leaf: &FieldElement) -> Option<usize> {
        self.levels[0].iter().position(|l| l == leaf)
    }

    /// All levels, leaves first.
    pub fn levels(&self) -> &[Vec<FieldElement>] {
        &self.levels
    }

    /// The hasher this index was built with.
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Inclusion path for the leaf at `leaf_index`.
    pub fn path(&self, leaf_index: usize) -> Result<InclusionPath, IndexError> {
        if leaf_index >= self.leaf_count() {
            return Err(IndexError::IndexOutOfRange {
                index: leaf_index,
                leaf_count: self.leaf_count(),
            });
        }

        let mut elements = [FieldElement::ZERO; TREE_DEPTH];
        let mut indices = [0u8; TREE_DEPTH];
        let mut current = leaf_index;

        for (depth, level) in self.levels[..TREE_DEPTH].iter().enumerate() {
            let sibling = current ^ 1;
            if let Some(node) = level.get(sibling) {
                elements[depth] = *node;
                indices[depth] = (current & 1) as u8;
            }
            current /= 2;
        }

        Ok(InclusionPath { elements, indices })
    }

    /// Verify a path against `root` using this index's hasher.
    pub fn verify_path(&self, leaf: &FieldElement, path: &InclusionPath, root: &FieldElement) -> bool {
        verify_path(&self.hasher, leaf, path, root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::Sha256NodeHasher;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Transparent hasher: the low 64 bits of the output encode the inputs.
    #[derive(Clone, Copy, Debug, Default)]
    struct MockHasher;

    fn low(f: &FieldElement) -> u64 {
        f.to_u64().unwrap()
    }

    impl NodeHasher for MockHasher {
        fn hash_pair(&self, left: &FieldElement, right: &FieldElement) -> FieldElement {
            FieldElement::from_u64(low(left).wrapping_mul(1_000).wrapping_add(low(right)).wrapping_add(1))
        }
    }

    fn leaves(values: &[u64]) -> Vec<FieldElement> {
        values.iter().map(|v| FieldElement::from_u64(*v)).collect()
    }

    #[test]
    fn test_empty_index() {
        assert_eq!(
            MembershipIndex::build(vec![], MockHasher).unwrap_err(),
            IndexError::EmptyIndex
        );
    }

    #[test]
    fn test_zero_leaf_rejected() {
        let err = MembershipIndex::build(leaves(&[1, 0, 3]), MockHasher).unwrap_err();
        assert_eq!(err, IndexError::ZeroLeaf { index: 1 });
    }

    #[test]
    fn test_odd_level_carries_unpaired_node() {
        let h = MockHasher;
        let (a, b, c) = (FieldElement::from_u64(1), FieldElement::from_u64(2), FieldElement::from_u64(3));
        let index = MembershipIndex::build(vec![a, b, c], h).unwrap();

        assert_eq!(index.levels()[1], vec![h.hash_pair(&a, &b), c]);
        assert_ne!(index.levels()[1][1], h.hash_pair(&c, &FieldElement::ZERO));

        let top = h.hash_pair(&h.hash_pair(&a, &b), &c);
        assert_eq!(index.levels()[2], vec![top]);
        // Everything above the real height carries the single node
        assert_eq!(index.root(), top);
    }

    #[test]
    fn test_level_lengths() {
        let index = MembershipIndex::build(leaves(&(1..=11).collect::<Vec<_>>()), MockHasher).unwrap();
        assert_eq!(index.levels().len(), TREE_DEPTH + 1);
        for d in 1..=TREE_DEPTH {
            assert_eq!(index.levels()[d].len(), index.levels()[d - 1].len().div_ceil(2));
        }
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let index = MembershipIndex::build(leaves(&[42]), MockHasher).unwrap();
        assert_eq!(index.root(), FieldElement::from_u64(42));

        let path = index.path(0).unwrap();
        assert_eq!(path.sibling_count(), 0);
        assert!(index.verify_path(&FieldElement::from_u64(42), &path, &index.root()));
    }

    #[test]
    fn test_three_leaf_scenario() {
        let ids = ["L0", "L1", "L2"];
        let index = MembershipIndex::from_national_ids(&ids).unwrap();
        let again = MembershipIndex::from_national_ids(&ids).unwrap();
        assert_eq!(index.root(), again.root());

        let path = index.path(0).unwrap();
        assert_eq!(path.elements.len(), TREE_DEPTH);
        assert_eq!(path.indices.len(), TREE_DEPTH);
        // Real height is 2; every level above is a (0, 0) sentinel pair
        for level in 2..TREE_DEPTH {
            assert!(path.elements[level].is_zero());
            assert_eq!(path.indices[level], 0);
        }
        assert_eq!(path.elements[0], index.leaf(1).unwrap());
        assert_eq!(path.elements[1], index.leaf(2).unwrap());

        // Leaf 2 has no sibling at level 0
        let path2 = index.path(2).unwrap();
        assert!(path2.elements[0].is_zero());
        assert_eq!(path2.indices[1], 1);
        assert!(index.verify_path(&index.leaf(2).unwrap(), &path2, &index.root()));
    }

    #[test]
    fn test_path_out_of_range() {
        let index = MembershipIndex::build(leaves(&[1, 2]), MockHasher).unwrap();
        assert_eq!(
            index.path(2).unwrap_err(),
            IndexError::IndexOutOfRange { index: 2, leaf_count: 2 }
        );
    }

    #[test]
    fn test_wrong_leaf_fails() {
        let index = MembershipIndex::from_national_ids(&["a", "b", "c", "d"]).unwrap();
        let path = index.path(0).unwrap();
        assert!(!index.verify_path(&voter_leaf("zz"), &path, &index.root()));
    }

    #[test]
    fn test_hash_with_zero_diverges_from_carry() {
        // A verifier that hashes with zero instead of skipping gets another root
        let h = PoseidonNodeHasher;
        let index = MembershipIndex::from_national_ids(&["a", "b", "c"]).unwrap();
        let leaf = index.leaf(2).unwrap();
        let path = index.path(2).unwrap();

        let mut naive = leaf;
        for (sibling, bit) in path.elements.iter().zip(path.indices.iter()) {
            naive = if *bit == 0 { h.hash_pair(&naive, sibling) } else { h.hash_pair(sibling, &naive) };
        }

        assert_ne!(naive, index.root());
        assert!(index.verify_path(&leaf, &path, &index.root()));
    }

    #[test]
    fn test_invalid_path_bit() {
        let err = InclusionPath::new([FieldElement::ZERO; TREE_DEPTH], {
            let mut bits = [0u8; TREE_DEPTH];
            bits[4] = 2;
            bits
        })
        .unwrap_err();
        assert_eq!(err, IndexError::InvalidPathBit { level: 4, value: 2 });

        let index = MembershipIndex::from_national_ids(&["a", "b"]).unwrap();
        let mut path = index.path(0).unwrap();
        path.indices[0] = 3;
        assert!(!index.verify_path(&index.leaf(0).unwrap(), &path, &index.root()));
    }

    #[test]
    fn test_position_of() {
        let index = MembershipIndex::from_national_ids(&["a", "b", "c"]).unwrap();
        assert_eq!(index.position_of(&voter_leaf("b")), Some(1));
        assert_eq!(index.position_of(&voter_leaf("x")), None);
    }

    #[test]
    fn test_tampered_sibling_fails() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let values: Vec<u64> = (0..64).map(|_| rng.gen_range(1..u64::MAX)).collect();
        let index = MembershipIndex::build(leaves(&values), Sha256NodeHasher).unwrap();
        let root = index.root();

        // 64 leaves fill the first six levels, so every one has a real sibling
        for _ in 0..32 {
            let i = rng.gen_range(0..index.leaf_count());
            let level = rng.gen_range(0..6);
            let mut path = index.path(i).unwrap();
            path.elements[level] = FieldElement::from_u64(rng.gen_range(1..u64::MAX));
            assert!(!index.verify_path(&index.leaf(i).unwrap(), &path, &root));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_every_leaf_verifies(values in prop::collection::vec(1u64..u64::MAX, 1..150)) {
            let index = MembershipIndex::build(leaves(&values), Sha256NodeHasher).unwrap();
            let root = index.root();

            for i in 0..index.leaf_count() {
                let path = index.path(i).unwrap();
                prop_assert!(index.verify_path(&index.leaf(i).unwrap(), &path, &root));
            }
        }
    }
}
