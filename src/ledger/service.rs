//! Ledger Service
//!
//! Clonable async handle around a single `VotingLedger`. Mutations take the
//! write lock for their whole check-then-act sequence, so racing casts on one
//! token resolve to exactly one success. Co-signed casts release the lock
//! while the signer runs and commit only if no command landed in between.
//! Reads share the read lock and always observe whole commands.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn, instrument};

use crate::core::clock::Clock;
use crate::core::hash::Hash32;
use crate::ledger::audit::{audit, AuditError, AuditReport};
use crate::ledger::command::LogError;
use crate::ledger::signing::{DynVoteSigner, SigningPolicy, VoteSigner};
use crate::ledger::state::{LedgerError, VotingLedger};
use crate::ledger::types::{Election, ElectionId, Principal, VoteInclusion, VoteReceipt};

/// Prepare/sign/commit rounds before a signed cast reports `StaleVote`.
const MAX_SIGNED_ATTEMPTS: u32 = 16;

/// Shared ledger handle.
#[derive(Clone)]
pub struct LedgerService {
    ledger: Arc<RwLock<VotingLedger>>,
    clock: Arc<dyn Clock>,
    signer: Option<Arc<dyn DynVoteSigner>>,
    policy: SigningPolicy,
}

impl LedgerService {
    /// Create a service over an empty ledger.
    pub fn new(authority: Principal, clock: Arc<dyn Clock>) -> Self {
        Self::from_ledger(VotingLedger::new(authority), clock)
    }

    /// Wrap an existing ledger (e.g. one rebuilt by replay).
    pub fn from_ledger(ledger: VotingLedger, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(ledger)),
            clock,
            signer: None,
            policy: SigningPolicy::Disabled,
        }
    }

    /// Attach a co-signer and the policy that governs it.
    pub fn with_signer<S: VoteSigner + 'static>(mut self, signer: Arc<S>, policy: SigningPolicy) -> Self {
        let signer: Arc<dyn DynVoteSigner> = signer;
        self.signer = Some(signer);
        self.policy = policy;
        self
    }

    /// Set the signing policy.
    pub fn with_policy(mut self, policy: SigningPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current ledger time.
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// The designated authority.
    pub async fn authority(&self) -> Principal {
        self.ledger.read().await.authority()
    }

    /// Create an election.
    pub async fn create_election(
        &self,
        caller: &Principal,
        title: &str,
        start_time: u64,
        end_time: u64,
        candidates_root: Hash32,
    ) -> Result<ElectionId, LedgerError> {
        let mut ledger = self.ledger.write().await;
        ledger.create_election(caller, title, start_time, end_time, candidates_root, self.clock.now())
    }

    /// Open an election.
    pub async fn open_election(&self, caller: &Principal, id: ElectionId) -> Result<(), LedgerError> {
        let mut ledger = self.ledger.write().await;
        ledger.open_election(caller, id, self.clock.now())
    }

    /// Close an election.
    pub async fn close_election(&self, caller: &Principal, id: ElectionId) -> Result<(), LedgerError> {
        let mut ledger = self.ledger.write().await;
        ledger.close_election(caller, id, self.clock.now())
    }

    /// Register an anonymous token.
    pub async fn register_token(
        &self,
        caller: &Principal,
        election_id: ElectionId,
        token_hash: Hash32,
    ) -> Result<(), LedgerError> {
        let mut ledger = self.ledger.write().await;
        ledger.register_token(caller, election_id, token_hash, self.clock.now())
    }

    /// Cast a vote, co-signing it according to policy.
    ///
    /// Under `SigningPolicy::Required` a signing failure rejects the vote
    /// before the token is consumed. Signing happens outside the write lock;
    /// if the log moved meanwhile the vote is prepared and signed again.
    #[instrument(skip(self, token_hash, encrypted_ballot), fields(ballot_len = encrypted_ballot.len()))]
    pub async fn cast_vote(
        &self,
        election_id: ElectionId,
        token_hash: Hash32,
        encrypted_ballot: &[u8],
    ) -> Result<VoteReceipt, LedgerError> {
        match (self.policy, self.signer.as_deref()) {
            (SigningPolicy::Disabled, _) | (SigningPolicy::Optional, None) => {
                self.cast_unsigned(election_id, token_hash, encrypted_ballot).await
            }
            (policy, signer) => self.cast_signed(policy, signer, election_id, token_hash, encrypted_ballot).await,
        }
    }

    async fn cast_unsigned(
        &self,
        election_id: ElectionId,
        token_hash: Hash32,
        encrypted_ballot: &[u8],
    ) -> Result<VoteReceipt, LedgerError> {
        let mut ledger = self.ledger.write().await;
        let prepared = ledger
            .prepare_vote(election_id, token_hash, encrypted_ballot, self.clock.now())
            .inspect_err(|e| warn!("Vote rejected: {}", e))?;
        let position = prepared.position();
        let vote_hash = ledger.commit_vote(prepared)?;

        Ok(VoteReceipt {
            election_id,
            vote_hash,
            confirmation_position: position,
            signature: None,
        })
    }

    async fn cast_signed(
        &self,
        policy: SigningPolicy,
        signer: Option<&dyn DynVoteSigner>,
        election_id: ElectionId,
        token_hash: Hash32,
        encrypted_ballot: &[u8],
    ) -> Result<VoteReceipt, LedgerError> {
        let mut attempt = 1;
        loop {
            let prepared = self
                .ledger
                .read()
                .await
                .prepare_vote(election_id, token_hash, encrypted_ballot, self.clock.now())
                .inspect_err(|e| warn!("Vote rejected: {}", e))?;
            let vote_hash = prepared.vote_hash();
            let position = prepared.position();

            let signature = match (policy, signer) {
                (_, None) => return Err(LedgerError::SigningFailed("no signer configured".into())),
                (SigningPolicy::Required, Some(signer)) => Some(
                    signer
                        .sign_boxed(election_id, &vote_hash)
                        .await
                        .map_err(|e| LedgerError::SigningFailed(e.to_string()))?,
                ),
                (_, Some(signer)) => match signer.sign_boxed(election_id, &vote_hash).await {
                    Ok(sig) => Some(sig),
                    Err(e) => {
                        warn!("Optional co-signature unavailable: {}", e);
                        None
                    }
                },
            };

            let committed = self.ledger.write().await.commit_vote(prepared);
            match committed {
                Ok(_) => {
                    return Ok(VoteReceipt {
                        election_id,
                        vote_hash,
                        confirmation_position: position,
                        signature,
                    });
                }
                Err(LedgerError::StaleVote { prepared: at, current }) if attempt < MAX_SIGNED_ATTEMPTS => {
                    debug!("Vote prepared at {} went stale at {}, attempt {}", at, current, attempt);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Look up an election.
    pub async fn election(&self, id: ElectionId) -> Option<Election> {
        self.ledger.read().await.election(id).cloned()
    }

    /// All elections.
    pub async fn elections(&self) -> Vec<Election> {
        self.ledger.read().await.elections().cloned().collect()
    }

    /// Inclusion query.
    pub async fn verify_vote_inclusion(&self, election_id: ElectionId, vote_hash: &Hash32) -> VoteInclusion {
        self.ledger.read().await.verify_vote_inclusion(election_id, vote_hash)
    }

    /// Vote hashes in acceptance order.
    pub async fn list_vote_hashes(&self, election_id: ElectionId) -> Vec<Hash32> {
        self.ledger.read().await.list_vote_hashes(election_id)
    }

    /// Aggregate commitment over an election's votes.
    pub async fn aggregate_root(&self, election_id: ElectionId) -> Hash32 {
        self.ledger.read().await.aggregate_root(election_id)
    }

    /// Export the command log (bincode).
    pub async fn export_log(&self) -> Result<Vec<u8>, LogError> {
        self.ledger.read().await.log().to_bytes()
    }

    /// Audit the ledger by replaying its log.
    pub async fn audit(&self) -> Result<AuditReport, AuditError> {
        let snapshot = self.ledger.read().await.clone();
        let report = audit(&snapshot)?;
        info!("Audit: valid={} commands={}", report.valid, report.log_length);
        Ok(report)
    }
}
