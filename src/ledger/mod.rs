//! Anonymous-Token Voting Ledger
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    VOTING LEDGER                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  types.rs    - Elections, tokens, votes, receipts           │
//! │  state.rs    - Deterministic state machine                  │
//! │  command.rs  - Ordered command log (bincode export)         │
//! │  audit.rs    - Verification by replay                       │
//! │  signing.rs  - Vote co-signing policy                       │
//! │  service.rs  - Async shared handle                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod types;
pub mod state;
pub mod command;
pub mod audit;
pub mod signing;
pub mod service;

// Re-export key types
pub use types::{
    AnonymousToken, Election, ElectionId, ElectionState, EncryptedVote, Principal,
    VoteInclusion, VoteReceipt,
};
pub use state::{
    aggregate_root, compute_vote_hash, ErrorKind, LedgerError, PreparedVote, VotingLedger,
};
pub use command::{Command, CommandLog, LogEntry, LogError};
pub use audit::{audit, replay, replay_bytes, AuditError, AuditMismatch, AuditReport, ElectionAudit};
pub use signing::{KeyedDigestSigner, SigningError, SigningPolicy, VoteSignature, VoteSigner};
pub use service::LedgerService;
