//! Voting Ledger State Machine
//!
//! Deterministic state over elections, anonymous tokens and recorded votes.
//! Every method takes the ledger time explicitly, so replaying the command log
//! with the recorded timestamps reproduces the same state.
//!
//! ```text
//! Created ──open──► Opened ──close──► Closed
//! ```

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{info, warn, error};

use crate::core::hash::{DigestBuilder, Hash32};
use crate::ledger::command::{Command, CommandLog, LogEntry};
use crate::ledger::types::{
    AnonymousToken, Election, ElectionId, ElectionState, EncryptedVote, Principal, VoteInclusion,
};

/// Domain separator for vote hashes.
const VOTE_HASH_DOMAIN: &[u8] = b"ZK_BALLOT_VOTE_V1";

/// Domain separator for per-election aggregate roots.
const AGGREGATE_ROOT_DOMAIN: &[u8] = b"ZK_BALLOT_AGGREGATE_V1";

// =============================================================================
// Errors
// =============================================================================

/// Error category, used by callers to decide whether to retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request; fix and resend.
    Validation,
    /// Caller lacks authority; do not retry with the same credentials.
    Authorization,
    /// Election is in the wrong state; re-check and retry.
    State,
    /// Token reuse; do not retry this token.
    Uniqueness,
    /// A broken assumption; raise an alarm.
    Integrity,
    /// Transient; retry.
    Transient,
}

/// Ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Caller is not the designated authority.
    #[error("caller is not the election authority")]
    Unauthorized,

    /// Schedule is not in the future or ends before it starts.
    #[error("invalid schedule: start {start_time}, end {end_time}, now {now}")]
    InvalidSchedule {
        /// Requested start.
        start_time: u64,
        /// Requested end.
        end_time: u64,
        /// Ledger time.
        now: u64,
    },

    /// Election is already opened.
    #[error("election {0} is already open")]
    AlreadyOpen(ElectionId),

    /// Election is closed.
    #[error("election {0} is already closed")]
    AlreadyClosed(ElectionId),

    /// Election is not accepting votes.
    #[error("election {0} is not active")]
    ElectionNotActive(ElectionId),

    /// No election with this id.
    #[error("election {0} not found")]
    ElectionNotFound(ElectionId),

    /// Token is unknown or already consumed. The two cases are not
    /// distinguished, so rejections do not reveal registration state.
    #[error("token already used")]
    TokenAlreadyUsed,

    /// Token is already registered for this election.
    #[error("token already registered for election {0}")]
    TokenAlreadyRegistered(ElectionId),

    /// Two votes hashed to the same value.
    #[error("vote hash collision in election {election_id}: {vote_hash}")]
    HashCollision {
        /// Election.
        election_id: ElectionId,
        /// Colliding hash.
        vote_hash: Hash32,
    },

    /// The ledger advanced between preparing and committing a vote.
    #[error("vote prepared at position {prepared} but ledger is at {current}")]
    StaleVote {
        /// Position the vote was prepared for.
        prepared: u64,
        /// Current next position.
        current: u64,
    },

    /// Required co-signature could not be produced.
    #[error("vote signing failed: {0}")]
    SigningFailed(String),
}

impl LedgerError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidSchedule { .. } | LedgerError::ElectionNotFound(_) => ErrorKind::Validation,
            LedgerError::Unauthorized => ErrorKind::Authorization,
            LedgerError::AlreadyOpen(_)
            | LedgerError::AlreadyClosed(_)
            | LedgerError::ElectionNotActive(_) => ErrorKind::State,
            LedgerError::TokenAlreadyUsed | LedgerError::TokenAlreadyRegistered(_) => {
                ErrorKind::Uniqueness
            }
            LedgerError::HashCollision { .. } => ErrorKind::Integrity,
            LedgerError::StaleVote { .. } | LedgerError::SigningFailed(_) => ErrorKind::Transient,
        }
    }

    /// Whether the error signals a broken integrity assumption.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Integrity
    }

    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

// =============================================================================
// Vote preparation
// =============================================================================

/// A validated vote, not yet applied.
///
/// Produced by `prepare_vote` and consumed by `commit_vote` on the same ledger
/// with no mutation in between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedVote {
    election_id: ElectionId,
    vote: EncryptedVote,
}

impl PreparedVote {
    /// Election the vote targets.
    pub fn election_id(&self) -> ElectionId {
        self.election_id
    }

    /// Hash the vote will be recorded under.
    pub fn vote_hash(&self) -> Hash32 {
        self.vote.vote_hash
    }

    /// Log position the vote will occupy.
    pub fn position(&self) -> u64 {
        self.vote.block_height
    }
}

/// Compute a vote hash.
pub fn compute_vote_hash(
    election_id: ElectionId,
    token_hash: &Hash32,
    encrypted_ballot: &[u8],
    timestamp: u64,
    position: u64,
) -> Hash32 {
    let mut builder = DigestBuilder::new(VOTE_HASH_DOMAIN);
    builder.update_u64(election_id);
    builder.update_hash(token_hash);
    builder.update_prefixed(encrypted_ballot);
    builder.update_u64(timestamp);
    builder.update_u64(position);
    builder.finalize()
}

/// Aggregate commitment over an ordered list of vote hashes.
pub fn aggregate_root(vote_hashes: &[Hash32]) -> Hash32 {
    let mut builder = DigestBuilder::new(AGGREGATE_ROOT_DOMAIN);
    for hash in vote_hashes {
        builder.update_hash(hash);
    }
    builder.finalize()
}

// =============================================================================
// Ledger
// =============================================================================

/// Authoritative state for elections, tokens and votes.
#[derive(Clone, Debug)]
pub struct VotingLedger {
    authority: Principal,
    next_election_id: ElectionId,
    elections: BTreeMap<ElectionId, Election>,
    tokens: BTreeMap<(ElectionId, Hash32), AnonymousToken>,
    votes: BTreeMap<(ElectionId, Hash32), EncryptedVote>,
    vote_order: BTreeMap<ElectionId, Vec<Hash32>>,
    log: CommandLog,
}

impl VotingLedger {
    /// Create an empty ledger administered by `authority`.
    pub fn new(authority: Principal) -> Self {
        Self {
            authority,
            next_election_id: 1,
            elections: BTreeMap::new(),
            tokens: BTreeMap::new(),
            votes: BTreeMap::new(),
            vote_order: BTreeMap::new(),
            log: CommandLog::new(),
        }
    }

    /// The designated authority.
    pub fn authority(&self) -> Principal {
        self.authority
    }

    /// Applied commands.
    pub fn log(&self) -> &CommandLog {
        &self.log
    }

    fn ensure_authority(&self, caller: &Principal) -> Result<(), LedgerError> {
        if *caller != self.authority {
            warn!("Rejected command from non-authority {}", caller);
            return Err(LedgerError::Unauthorized);
        }
        Ok(())
    }

    fn election_mut(&mut self, id: ElectionId) -> Result<&mut Election, LedgerError> {
        self.elections.get_mut(&id).ok_or(LedgerError::ElectionNotFound(id))
    }

    /// Create an election in state `Created`.
    pub fn create_election(
        &mut self,
        caller: &Principal,
        title: &str,
        start_time: u64,
        end_time: u64,
        candidates_root: Hash32,
        now: u64,
    ) -> Result<ElectionId, LedgerError> {
        self.ensure_authority(caller)?;

        if start_time <= now || end_time <= start_time {
            return Err(LedgerError::InvalidSchedule { start_time, end_time, now });
        }

        let id = self.next_election_id;
        self.next_election_id += 1;

        self.elections.insert(id, Election {
            id,
            title: title.to_string(),
            start_time,
            end_time,
            is_active: false,
            is_closed: false,
            total_votes: 0,
            candidates_root,
        });
        self.vote_order.insert(id, Vec::new());

        self.log.append(now, Command::CreateElection {
            caller: *caller,
            title: title.to_string(),
            start_time,
            end_time,
            candidates_root,
        });

        info!("Election {} created ({}..{})", id, start_time, end_time);
        Ok(id)
    }

    /// Transition `Created → Opened`.
    pub fn open_election(&mut self, caller: &Principal, id: ElectionId, now: u64) -> Result<(), LedgerError> {
        self.ensure_authority(caller)?;

        let election = self.election_mut(id)?;
        match election.state() {
            ElectionState::Created => {}
            ElectionState::Opened => return Err(LedgerError::AlreadyOpen(id)),
            ElectionState::Closed => return Err(LedgerError::AlreadyClosed(id)),
        }
        election.is_active = true;

        self.log.append(now, Command::OpenElection { caller: *caller, election_id: id });
        info!("Election {} opened", id);
        Ok(())
    }

    /// Transition `Opened → Closed`, freezing the vote count.
    pub fn close_election(&mut self, caller: &Principal, id: ElectionId, now: u64) -> Result<(), LedgerError> {
        self.ensure_authority(caller)?;

        let election = self.election_mut(id)?;
        match election.state() {
            ElectionState::Opened => {}
            ElectionState::Created => return Err(LedgerError::ElectionNotActive(id)),
            ElectionState::Closed => return Err(LedgerError::AlreadyClosed(id)),
        }
        election.is_active = false;
        election.is_closed = true;
        let total = election.total_votes;

        self.log.append(now, Command::CloseElection { caller: *caller, election_id: id });
        info!("Election {} closed with {} votes", id, total);
        Ok(())
    }

    /// Register an unused anonymous token.
    pub fn register_token(
        &mut self,
        caller: &Principal,
        election_id: ElectionId,
        token_hash: Hash32,
        now: u64,
    ) -> Result<(), LedgerError> {
        self.ensure_authority(caller)?;

        let election = self
            .elections
            .get(&election_id)
            .ok_or(LedgerError::ElectionNotFound(election_id))?;
        if election.state() == ElectionState::Closed {
            return Err(LedgerError::AlreadyClosed(election_id));
        }

        let key = (election_id, token_hash);
        if self.tokens.contains_key(&key) {
            return Err(LedgerError::TokenAlreadyRegistered(election_id));
        }
        self.tokens.insert(key, AnonymousToken { hash: token_hash, used: false });

        self.log.append(now, Command::RegisterToken {
            caller: *caller,
            election_id,
            token_hash,
        });
        Ok(())
    }

    /// Validate a vote and compute its hash without changing state.
    pub fn prepare_vote(
        &self,
        election_id: ElectionId,
        token_hash: Hash32,
        encrypted_ballot: &[u8],
        now: u64,
    ) -> Result<PreparedVote, LedgerError> {
        let active = self
            .elections
            .get(&election_id)
            .is_some_and(|e| e.accepts_votes_at(now));
        if !active {
            return Err(LedgerError::ElectionNotActive(election_id));
        }

        match self.tokens.get(&(election_id, token_hash)) {
            Some(token) if !token.used => {}
            _ => return Err(LedgerError::TokenAlreadyUsed),
        }

        let position = self.log.next_position();
        let vote_hash = compute_vote_hash(election_id, &token_hash, encrypted_ballot, now, position);

        if self.votes.contains_key(&(election_id, vote_hash)) {
            error!("Vote hash collision in election {}: {}", election_id, vote_hash);
            return Err(LedgerError::HashCollision { election_id, vote_hash });
        }

        Ok(PreparedVote {
            election_id,
            vote: EncryptedVote {
                vote_hash,
                encrypted_ballot: encrypted_ballot.to_vec(),
                token_hash,
                timestamp: now,
                block_height: position,
            },
        })
    }

    /// Apply a prepared vote: consume the token, append the vote and count it.
    pub fn commit_vote(&mut self, prepared: PreparedVote) -> Result<Hash32, LedgerError> {
        let current = self.log.next_position();
        if prepared.position() != current {
            return Err(LedgerError::StaleVote { prepared: prepared.position(), current });
        }

        let PreparedVote { election_id, vote } = prepared;
        let vote_hash = vote.vote_hash;

        let token = self
            .tokens
            .get_mut(&(election_id, vote.token_hash))
            .filter(|t| !t.used)
            .ok_or(LedgerError::TokenAlreadyUsed)?;
        let election = self
            .elections
            .get_mut(&election_id)
            .ok_or(LedgerError::ElectionNotActive(election_id))?;

        token.used = true;
        election.total_votes += 1;
        self.vote_order.entry(election_id).or_default().push(vote_hash);

        self.log.append(vote.timestamp, Command::CastVote {
            election_id,
            token_hash: vote.token_hash,
            encrypted_ballot: vote.encrypted_ballot.clone(),
        });
        self.votes.insert((election_id, vote_hash), vote);

        info!("Vote {} recorded in election {}", vote_hash, election_id);
        Ok(vote_hash)
    }

    /// Cast a vote in one step.
    pub fn cast_vote(
        &mut self,
        election_id: ElectionId,
        token_hash: Hash32,
        encrypted_ballot: &[u8],
        now: u64,
    ) -> Result<Hash32, LedgerError> {
        let prepared = self.prepare_vote(election_id, token_hash, encrypted_ballot, now)?;
        self.commit_vote(prepared)
    }

    /// Apply a logged command at its recorded time.
    pub fn apply(&mut self, entry: &LogEntry) -> Result<(), LedgerError> {
        let now = entry.timestamp;
        match &entry.command {
            Command::CreateElection { caller, title, start_time, end_time, candidates_root } => {
                self.create_election(caller, title, *start_time, *end_time, *candidates_root, now)
                    .map(|_| ())
            }
            Command::OpenElection { caller, election_id } => {
                self.open_election(caller, *election_id, now)
            }
            Command::CloseElection { caller, election_id } => {
                self.close_election(caller, *election_id, now)
            }
            Command::RegisterToken { caller, election_id, token_hash } => {
                self.register_token(caller, *election_id, *token_hash, now)
            }
            Command::CastVote { election_id, token_hash, encrypted_ballot } => {
                self.cast_vote(*election_id, *token_hash, encrypted_ballot, now).map(|_| ())
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look up an election.
    pub fn election(&self, id: ElectionId) -> Option<&Election> {
        self.elections.get(&id)
    }

    /// All elections in id order.
    pub fn elections(&self) -> impl Iterator<Item = &Election> {
        self.elections.values()
    }

    /// Look up a token.
    pub fn token(&self, election_id: ElectionId, token_hash: &Hash32) -> Option<&AnonymousToken> {
        self.tokens.get(&(election_id, *token_hash))
    }

    /// Look up a recorded vote.
    pub fn vote(&self, election_id: ElectionId, vote_hash: &Hash32) -> Option<&EncryptedVote> {
        self.votes.get(&(election_id, *vote_hash))
    }

    /// Inclusion query. Absent votes yield `exists = false` with zero fields.
    pub fn verify_vote_inclusion(&self, election_id: ElectionId, vote_hash: &Hash32) -> VoteInclusion {
        match self.vote(election_id, vote_hash) {
            Some(vote) => VoteInclusion {
                exists: true,
                timestamp: vote.timestamp,
                position: vote.block_height,
            },
            None => VoteInclusion::default(),
        }
    }

    /// Vote hashes of an election in acceptance order.
    pub fn list_vote_hashes(&self, election_id: ElectionId) -> Vec<Hash32> {
        self.vote_order.get(&election_id).cloned().unwrap_or_default()
    }

    /// Aggregate commitment over an election's votes.
    pub fn aggregate_root(&self, election_id: ElectionId) -> Hash32 {
        aggregate_root(self.vote_order.get(&election_id).map(Vec::as_slice).unwrap_or(&[]))
    }
}
