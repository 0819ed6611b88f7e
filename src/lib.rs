//! # ZK Ballot Server
//!
//! Anonymous, verifiable voting core: a registered-voter membership index,
//! eligibility proofs bound to an election by a nullifier, and a ledger that
//! accepts each anonymous token exactly once.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ZK BALLOT SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                               │
//! │  ├── field.rs    - Proving-field elements, voter leaves     │
//! │  ├── hash.rs     - Digests and the node hasher              │
//! │  ├── encoding.rs - 0x-hex / decimal external encoding       │
//! │  └── clock.rs    - Ledger time                              │
//! │                                                             │
//! │  proof/          - Eligibility (off-ledger)                 │
//! │  ├── merkle.rs   - Membership index, inclusion paths        │
//! │  ├── circuit.rs  - Witness, public signals, nullifier       │
//! │  └── orchestrator.rs - Retry, local verification           │
//! │                                                             │
//! │  ledger/         - Voting state machine (deterministic)     │
//! │  ├── state.rs    - Elections, tokens, votes                 │
//! │  ├── command.rs  - Ordered command log                      │
//! │  └── audit.rs    - Verification by replay                   │
//! │                                                             │
//! │  network/        - WebSocket gateway (non-deterministic)    │
//! │  config.rs       - Environment configuration                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! `ledger::VotingLedger` never reads the wall clock; time is passed in by the
//! caller and recorded in the command log. Replaying an exported log yields
//! byte-identical state, which is what `ledger::audit` checks.
//!
//! The ledger never sees a voter identity. Registration takes only a token
//! hash derived from the proof's nullifier, and casting takes only that hash.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod ledger;
pub mod network;
pub mod proof;

// Re-export commonly used types
pub use config::{ConfigError, NodeConfig};
pub use core::field::FieldElement;
pub use core::hash::Hash32;
pub use ledger::{LedgerError, LedgerService, VotingLedger};
pub use proof::{MembershipIndex, ProofOrchestrator, ProvingBackend};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
