//! Gateway Protocol
//!
//! JSON messages exchanged over the ledger gateway WebSocket. Every message is
//! an object tagged by `"type"`. 32-byte values travel as `0x` + 64 hex chars;
//! ballots as `0x`-prefixed hex of any length.

use serde::{Serialize, Deserialize};

use crate::core::encoding::hex_bytes;
use crate::core::hash::Hash32;
use crate::ledger::state::LedgerError;
use crate::ledger::types::{Election, ElectionId, VoteInclusion, VoteReceipt};
use crate::network::auth::AuthError;

// =============================================================================
// CLIENT -> NODE
// =============================================================================

/// Requests accepted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Present an authority JWT for this connection.
    Authenticate {
        /// JWT.
        token: String,
    },

    /// Create an election (authority).
    CreateElection {
        /// Title.
        title: String,
        /// Schedule start (unix seconds).
        start_time: u64,
        /// Schedule end (unix seconds).
        end_time: u64,
        /// Candidate commitment.
        candidates_root: Hash32,
    },

    /// Open an election (authority).
    OpenElection {
        /// Target election.
        election_id: ElectionId,
    },

    /// Close an election (authority).
    CloseElection {
        /// Target election.
        election_id: ElectionId,
    },

    /// Register an anonymous token (authority).
    RegisterToken {
        /// Target election.
        election_id: ElectionId,
        /// Token hash.
        token_hash: Hash32,
    },

    /// Cast a vote (anonymous).
    CastVote {
        /// Target election.
        election_id: ElectionId,
        /// Token to consume.
        token_hash: Hash32,
        /// Ballot ciphertext.
        #[serde(with = "hex_bytes")]
        encrypted_ballot: Vec<u8>,
    },

    /// Inclusion query.
    VerifyVoteInclusion {
        /// Election.
        election_id: ElectionId,
        /// Vote hash.
        vote_hash: Hash32,
    },

    /// Ordered vote hashes and aggregate root.
    ListVoteHashes {
        /// Election.
        election_id: ElectionId,
    },

    /// Election record.
    GetElection {
        /// Election.
        election_id: ElectionId,
    },

    /// Liveness check.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

impl Request {
    /// Whether the request needs an authenticated authority.
    pub fn requires_authority(&self) -> bool {
        matches!(
            self,
            Request::CreateElection { .. }
                | Request::OpenElection { .. }
                | Request::CloseElection { .. }
                | Request::RegisterToken { .. }
        )
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// NODE -> CLIENT
// =============================================================================

/// Responses sent by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Connection authenticated.
    Authenticated {
        /// Short principal fingerprint.
        principal: String,
    },

    /// Election created.
    ElectionCreated {
        /// Assigned id.
        election_id: ElectionId,
    },

    /// Election opened.
    ElectionOpened {
        /// Election.
        election_id: ElectionId,
    },

    /// Election closed.
    ElectionClosed {
        /// Election.
        election_id: ElectionId,
        /// Final vote count.
        total_votes: u64,
    },

    /// Token registered.
    TokenRegistered {
        /// Election.
        election_id: ElectionId,
        /// Token hash.
        token_hash: Hash32,
    },

    /// Vote accepted.
    VoteAccepted {
        /// Receipt.
        receipt: VoteReceipt,
    },

    /// Inclusion result.
    VoteInclusion {
        /// Election.
        election_id: ElectionId,
        /// Queried hash.
        vote_hash: Hash32,
        /// Result.
        inclusion: VoteInclusion,
    },

    /// Ordered vote hashes.
    VoteHashes {
        /// Election.
        election_id: ElectionId,
        /// Hashes in acceptance order.
        vote_hashes: Vec<Hash32>,
        /// Aggregate commitment.
        aggregate_root: Hash32,
    },

    /// Election record.
    Election {
        /// Record.
        election: Election,
    },

    /// Ping reply.
    Pong {
        /// Client timestamp.
        timestamp: u64,
        /// Node ledger time.
        server_time: u64,
    },

    /// Request failed.
    Error(ErrorResponse),
}

impl Response {
    /// Build an error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse { code, message: message.into() })
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl From<LedgerError> for Response {
    fn from(err: LedgerError) -> Self {
        Response::error(ErrorCode::from(&err), err.to_string())
    }
}

impl From<AuthError> for Response {
    fn from(err: AuthError) -> Self {
        Response::error(ErrorCode::from(&err), err.to_string())
    }
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authority operation without authentication.
    NotAuthenticated,
    /// JWT rejected.
    AuthFailed,
    /// JWT expired.
    TokenExpired,
    /// Message could not be parsed.
    InvalidRequest,
    /// Caller is not the authority.
    Unauthorized,
    /// Schedule rejected.
    InvalidSchedule,
    /// Election already open.
    AlreadyOpen,
    /// Election already closed.
    AlreadyClosed,
    /// Election not accepting votes.
    ElectionNotActive,
    /// Unknown election.
    ElectionNotFound,
    /// Token unknown or consumed.
    TokenAlreadyUsed,
    /// Token already registered.
    TokenAlreadyRegistered,
    /// Integrity alarm (hash collision).
    IntegrityFailure,
    /// Transient failure; retry.
    Unavailable,
    /// Connection limit reached.
    ServerFull,
}

impl From<&LedgerError> for ErrorCode {
    fn from(err: &LedgerError) -> Self {
        match err {
            LedgerError::Unauthorized => ErrorCode::Unauthorized,
            LedgerError::InvalidSchedule { .. } => ErrorCode::InvalidSchedule,
            LedgerError::AlreadyOpen(_) => ErrorCode::AlreadyOpen,
            LedgerError::AlreadyClosed(_) => ErrorCode::AlreadyClosed,
            LedgerError::ElectionNotActive(_) => ErrorCode::ElectionNotActive,
            LedgerError::ElectionNotFound(_) => ErrorCode::ElectionNotFound,
            LedgerError::TokenAlreadyUsed => ErrorCode::TokenAlreadyUsed,
            LedgerError::TokenAlreadyRegistered(_) => ErrorCode::TokenAlreadyRegistered,
            LedgerError::HashCollision { .. } => ErrorCode::IntegrityFailure,
            LedgerError::StaleVote { .. } | LedgerError::SigningFailed(_) => ErrorCode::Unavailable,
        }
    }
}

impl From<&AuthError> for ErrorCode {
    fn from(err: &AuthError) -> Self {
        match err {
            AuthError::Expired => ErrorCode::TokenExpired,
            _ => ErrorCode::AuthFailed,
        }
    }
}
