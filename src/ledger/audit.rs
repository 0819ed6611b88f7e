//! Ledger Audit
//!
//! Verify a ledger by deterministic replay: rebuild an independent ledger from
//! the command log and compare elections, vote order and aggregate roots.

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{error, info};

use crate::core::hash::Hash32;
use crate::ledger::command::{CommandLog, LogError};
use crate::ledger::state::{LedgerError, VotingLedger};
use crate::ledger::types::{ElectionId, Principal};

/// Audit errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A logged command was rejected on replay.
    #[error("command at position {position} failed on replay: {source}")]
    Replay {
        /// Log position of the failing command.
        position: u64,
        /// Rejection.
        #[source]
        source: LedgerError,
    },

    /// The log could not be decoded.
    #[error(transparent)]
    Log(#[from] LogError),
}

/// A difference between the live ledger and its replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditMismatch {
    /// Elections differ in number.
    ElectionCount {
        /// Live count.
        live: usize,
        /// Replayed count.
        replayed: usize,
    },
    /// Election record differs.
    ElectionRecord {
        /// Election.
        election_id: ElectionId,
    },
    /// Vote hash lists differ.
    VoteList {
        /// Election.
        election_id: ElectionId,
    },
    /// `total_votes` does not match the number of recorded votes.
    VoteCount {
        /// Election.
        election_id: ElectionId,
        /// Counter value.
        total_votes: u64,
        /// Recorded votes.
        listed: usize,
    },
    /// Aggregate roots differ.
    AggregateRoot {
        /// Election.
        election_id: ElectionId,
        /// Live root.
        live: Hash32,
        /// Replayed root.
        replayed: Hash32,
    },
}

/// Per-election audit summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionAudit {
    /// Election.
    pub election_id: ElectionId,
    /// Recorded votes.
    pub vote_count: usize,
    /// Aggregate root of the live ledger.
    pub aggregate_root: Hash32,
}

/// Audit result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    /// Did the audit pass?
    pub valid: bool,
    /// Commands replayed.
    pub log_length: usize,
    /// Per-election summaries.
    pub elections: Vec<ElectionAudit>,
    /// Differences found.
    pub mismatches: Vec<AuditMismatch>,
}

/// Rebuild a ledger from a command log.
pub fn replay(log: &CommandLog, authority: Principal) -> Result<VotingLedger, AuditError> {
    let mut ledger = VotingLedger::new(authority);

    for entry in log.entries() {
        ledger
            .apply(entry)
            .map_err(|source| AuditError::Replay { position: entry.position, source })?;
    }

    Ok(ledger)
}

/// Replay an exported (bincode) log.
pub fn replay_bytes(bytes: &[u8], authority: Principal) -> Result<VotingLedger, AuditError> {
    replay(&CommandLog::from_bytes(bytes)?, authority)
}

/// Audit a ledger against a replay of its own log.
pub fn audit(ledger: &VotingLedger) -> Result<AuditReport, AuditError> {
    let replayed = replay(ledger.log(), ledger.authority())?;
    let mut mismatches = Vec::new();
    let mut elections = Vec::new();

    let live_count = ledger.elections().count();
    let replayed_count = replayed.elections().count();
    if live_count != replayed_count {
        mismatches.push(AuditMismatch::ElectionCount { live: live_count, replayed: replayed_count });
    }

    for election in ledger.elections() {
        let id = election.id;
        if replayed.election(id) != Some(election) {
            mismatches.push(AuditMismatch::ElectionRecord { election_id: id });
        }

        let votes = ledger.list_vote_hashes(id);
        if votes != replayed.list_vote_hashes(id) {
            mismatches.push(AuditMismatch::VoteList { election_id: id });
        }

        if election.total_votes != votes.len() as u64 {
            mismatches.push(AuditMismatch::VoteCount {
                election_id: id,
                total_votes: election.total_votes,
                listed: votes.len(),
            });
        }

        let live_root = ledger.aggregate_root(id);
        let replayed_root = replayed.aggregate_root(id);
        if live_root != replayed_root {
            mismatches.push(AuditMismatch::AggregateRoot {
                election_id: id,
                live: live_root,
                replayed: replayed_root,
            });
        }

        elections.push(ElectionAudit {
            election_id: id,
            vote_count: votes.len(),
            aggregate_root: live_root,
        });
    }

    let valid = mismatches.is_empty();
    if valid {
        info!("Audit passed over {} commands", ledger.log().len());
    } else {
        error!("Audit found {} mismatch(es)", mismatches.len());
    }

    Ok(AuditReport {
        valid,
        log_length: ledger.log().len(),
        elections,
        mismatches,
    })
}
