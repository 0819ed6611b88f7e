//! Core primitives.
//!
//! Field elements, digests, external encoding and ledger time. Everything
//! above this layer hashes and encodes through these types.

pub mod clock;
pub mod encoding;
pub mod field;
pub mod hash;

// Re-export core types
pub use clock::{Clock, ManualClock, SystemClock};
pub use encoding::EncodingError;
pub use field::{hash_to_field, voter_leaf, voter_secret, FieldElement};
pub use hash::{hash_with_domain, DigestBuilder, Hash32, NodeHasher, PoseidonNodeHasher, Sha256NodeHasher};
