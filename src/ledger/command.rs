//! Command Log
//!
//! Every successful ledger mutation is recorded as one ordered command. The
//! log is the ledger's source of truth: replaying it into an empty ledger
//! reproduces every election, token and vote hash bit for bit.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::encoding::hex_bytes;
use crate::core::hash::Hash32;
use crate::ledger::types::{ElectionId, Principal};

/// A ledger mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Create an election.
    CreateElection {
        /// Issuing principal.
        caller: Principal,
        /// Title.
        title: String,
        /// Schedule start.
        start_time: u64,
        /// Schedule end.
        end_time: u64,
        /// Candidate commitment.
        candidates_root: Hash32,
    },
    /// Open an election.
    OpenElection {
        /// Issuing principal.
        caller: Principal,
        /// Target election.
        election_id: ElectionId,
    },
    /// Close an election.
    CloseElection {
        /// Issuing principal.
        caller: Principal,
        /// Target election.
        election_id: ElectionId,
    },
    /// Register an anonymous token.
    RegisterToken {
        /// Issuing principal.
        caller: Principal,
        /// Target election.
        election_id: ElectionId,
        /// Token hash.
        token_hash: Hash32,
    },
    /// Cast a vote. Anonymous: carries no caller.
    CastVote {
        /// Target election.
        election_id: ElectionId,
        /// Token consumed.
        token_hash: Hash32,
        /// Ballot ciphertext.
        #[serde(with = "hex_bytes")]
        encrypted_ballot: Vec<u8>,
    },
}

impl Command {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateElection { .. } => "create_election",
            Command::OpenElection { .. } => "open_election",
            Command::CloseElection { .. } => "close_election",
            Command::RegisterToken { .. } => "register_token",
            Command::CastVote { .. } => "cast_vote",
        }
    }
}

/// One applied command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// 1-based position in the log.
    pub position: u64,
    /// Ledger time the command was applied at.
    pub timestamp: u64,
    /// The command.
    pub command: Command,
}

/// Command log errors.
#[derive(Debug, Error)]
pub enum LogError {
    /// bincode failure.
    #[error("log codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Positions are not 1, 2, 3, ...
    #[error("log position {got} where {expected} was expected")]
    NonSequential {
        /// Position expected at this slot.
        expected: u64,
        /// Position found.
        got: u64,
    },
}

/// Append-only, ordered list of applied commands.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLog {
    entries: Vec<LogEntry>,
}

impl CommandLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Position the next appended command will receive.
    pub fn next_position(&self) -> u64 {
        self.entries.len() as u64 + 1
    }

    /// Append a command, returning its position.
    pub(crate) fn append(&mut self, timestamp: u64, command: Command) -> u64 {
        let position = self.next_position();
        self.entries.push(LogEntry { position, timestamp, command });
        position
    }

    /// All entries in order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been applied.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize for export.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LogError> {
        Ok(bincode::serialize(&self.entries)?)
    }

    /// Deserialize an exported log, checking positions are sequential.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LogError> {
        let entries: Vec<LogEntry> = bincode::deserialize(bytes)?;

        for (i, entry) in entries.iter().enumerate() {
            let expected = i as u64 + 1;
            if entry.position != expected {
                return Err(LogError::NonSequential { expected, got: entry.position });
            }
        }

        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(n: u8) -> Command {
        Command::CastVote {
            election_id: 1,
            token_hash: Hash32([n; 32]),
            encrypted_ballot: vec![n, n],
        }
    }

    #[test]
    fn test_positions_start_at_one() {
        let mut log = CommandLog::new();
        assert_eq!(log.next_position(), 1);
        assert_eq!(log.append(10, vote(1)), 1);
        assert_eq!(log.append(11, vote(2)), 2);
        assert_eq!(log.entries()[1].timestamp, 11);
    }

    #[test]
    fn test_bincode_export() {
        let mut log = CommandLog::new();
        log.append(10, Command::OpenElection { caller: Principal([1; 16]), election_id: 1 });
        log.append(11, vote(3));

        let restored = CommandLog::from_bytes(&log.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, log);
    }

    #[test]
    fn test_import_rejects_gaps() {
        let entries = vec![
            LogEntry { position: 1, timestamp: 1, command: vote(1) },
            LogEntry { position: 3, timestamp: 2, command: vote(2) },
        ];
        let bytes = bincode::serialize(&entries).unwrap();

        assert!(matches!(
            CommandLog::from_bytes(&bytes),
            Err(LogError::NonSequential { expected: 2, got: 3 })
        ));
    }
}
