//! Ledger entities.

use std::fmt;

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

use crate::core::encoding::hex_bytes;
use crate::core::hash::Hash32;
use crate::ledger::signing::VoteSignature;

/// Sequential election identifier. The first election is 1.
pub type ElectionId = u64;

/// Identity of a ledger caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Principal(pub [u8; 16]);

impl Principal {
    /// Derive a principal from an authentication subject.
    pub fn from_subject(subject: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"zk-ballot-principal:");
        hasher.update(subject.as_bytes());
        let hash = hasher.finalize();

        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        Self(id)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..4]))
    }
}

/// Election lifecycle state. Transitions are linear: Created → Opened → Closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionState {
    /// Registered, not yet accepting votes.
    Created,
    /// Accepting votes inside its schedule.
    Opened,
    /// Terminal.
    Closed,
}

/// An election held on the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Election {
    /// Election id.
    pub id: ElectionId,
    /// Human-readable title.
    pub title: String,
    /// First second votes are accepted (unix seconds).
    pub start_time: u64,
    /// Last second votes are accepted (unix seconds).
    pub end_time: u64,
    /// Set while opened.
    pub is_active: bool,
    /// Set once closed.
    pub is_closed: bool,
    /// Accepted votes; frozen when closed.
    pub total_votes: u64,
    /// Commitment to the candidate list.
    pub candidates_root: Hash32,
}

impl Election {
    /// Current lifecycle state.
    pub fn state(&self) -> ElectionState {
        if self.is_closed {
            ElectionState::Closed
        } else if self.is_active {
            ElectionState::Opened
        } else {
            ElectionState::Created
        }
    }

    /// Whether a vote cast at `now` is admissible.
    pub fn accepts_votes_at(&self, now: u64) -> bool {
        self.state() == ElectionState::Opened && self.start_time <= now && now <= self.end_time
    }
}

/// Single-use anonymous credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousToken {
    /// Token hash.
    pub hash: Hash32,
    /// Set once a vote consumed the token.
    pub used: bool,
}

/// A recorded vote. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedVote {
    /// Vote hash.
    pub vote_hash: Hash32,
    /// Opaque ciphertext chosen by the voter.
    #[serde(with = "hex_bytes")]
    pub encrypted_ballot: Vec<u8>,
    /// Token consumed by this vote.
    pub token_hash: Hash32,
    /// Ledger time of acceptance.
    pub timestamp: u64,
    /// Command log position of acceptance.
    pub block_height: u64,
}

/// Result of an inclusion query. All fields are zero when the vote is absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteInclusion {
    /// Whether the vote is recorded.
    pub exists: bool,
    /// Ledger time of acceptance.
    pub timestamp: u64,
    /// Command log position of acceptance.
    pub position: u64,
}

/// Submission receipt for an accepted vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    /// Election the vote belongs to.
    pub election_id: ElectionId,
    /// Vote hash.
    pub vote_hash: Hash32,
    /// Command log position of acceptance.
    pub confirmation_position: u64,
    /// Co-signature, when the signing policy produced one.
    pub signature: Option<VoteSignature>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn election() -> Election {
        Election {
            id: 1,
            title: "Board".into(),
            start_time: 100,
            end_time: 200,
            is_active: false,
            is_closed: false,
            total_votes: 0,
            candidates_root: Hash32::ZERO,
        }
    }

    #[test]
    fn test_state_from_flags() {
        let mut e = election();
        assert_eq!(e.state(), ElectionState::Created);
        e.is_active = true;
        assert_eq!(e.state(), ElectionState::Opened);
        e.is_active = false;
        e.is_closed = true;
        assert_eq!(e.state(), ElectionState::Closed);
    }

    #[test]
    fn test_vote_window_is_inclusive() {
        let mut e = election();
        assert!(!e.accepts_votes_at(150));

        e.is_active = true;
        assert!(!e.accepts_votes_at(99));
        assert!(e.accepts_votes_at(100));
        assert!(e.accepts_votes_at(200));
        assert!(!e.accepts_votes_at(201));
    }

    #[test]
    fn test_principal_from_subject() {
        assert_eq!(Principal::from_subject("alice"), Principal::from_subject("alice"));
        assert_ne!(Principal::from_subject("alice"), Principal::from_subject("bob"));
    }

    #[test]
    fn test_encrypted_vote_json() {
        let vote = EncryptedVote {
            vote_hash: Hash32([1; 32]),
            encrypted_ballot: vec![0xde, 0xad],
            token_hash: Hash32([2; 32]),
            timestamp: 5,
            block_height: 9,
        };
        let json = serde_json::to_string(&vote).unwrap();
        assert!(json.contains("\"encryptedBallot\":\"0xdead\""));
        assert!(json.contains(&format!("\"voteHash\":\"{}\"", Hash32([1; 32]).to_hex())));
        assert_eq!(serde_json::from_str::<EncryptedVote>(&json).unwrap(), vote);
    }
}
