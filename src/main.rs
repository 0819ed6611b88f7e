//! ZK Ballot Server
//!
//! `zk-ballot-server [serve]` runs the ledger gateway.
//! `zk-ballot-server demo` runs one election end to end in-process.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zk_ballot::{
    VERSION,
    config::{BackendKind, NodeConfig},
    core::{voter_leaf, voter_secret, Clock, Hash32, ManualClock, SystemClock},
    ledger::{KeyedDigestSigner, LedgerError, LedgerService, Principal},
    network::LedgerGateway,
    proof::{
        external::CommandBackend, voter_token_hash, MembershipIndex, ProofOrchestrator,
        ProvingBackend, TranscriptBackend, VerificationKey,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("ZK Ballot Server v{}", VERSION);

    let config = NodeConfig::from_env().context("loading configuration")?;

    match std::env::args().nth(1).as_deref() {
        None | Some("serve") => serve(config).await,
        Some("demo") => demo(config).await,
        Some(other) => bail!("unknown command {other:?} (expected serve or demo)"),
    }
}

fn build_service(config: &NodeConfig, clock: Arc<dyn Clock>) -> LedgerService {
    let authority = Principal::from_subject(&config.authority_subject);
    let service = LedgerService::new(authority, clock);

    match &config.signing_key {
        Some(key) => {
            let signer = KeyedDigestSigner::new(config.authority_subject.clone(), key.as_bytes());
            service.with_signer(Arc::new(signer), config.signing_policy)
        }
        None => service.with_policy(config.signing_policy),
    }
}

async fn serve(config: NodeConfig) -> Result<()> {
    if !config.auth.is_configured() {
        warn!("No AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set; authority calls will be rejected");
    }

    let service = build_service(&config, Arc::new(SystemClock));
    info!("Election authority: {}", service.authority().await);

    let gateway = Arc::new(LedgerGateway::new(config.gateway.clone(), service, config.auth.clone()));

    let signal_gateway = gateway.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_gateway.shutdown();
        }
    });

    gateway.run().await.context("gateway failed")?;
    Ok(())
}

// =============================================================================
// Demo
// =============================================================================

const DEMO_START: u64 = 1_700_000_000;

async fn demo(config: NodeConfig) -> Result<()> {
    match config.backend {
        BackendKind::Transcript => {
            let (backend, vk) = TranscriptBackend::setup(b"zk-ballot-demo");
            run_demo(&config, ProofOrchestrator::new(backend, config.prover.clone()), vk).await
        }
        BackendKind::Command => {
            let Some(vk_path) = &config.verification_key else {
                bail!("PROVER_VERIFICATION_KEY is required for the command backend");
            };
            let vk = CommandBackend::load_verification_key(vk_path)
                .await
                .with_context(|| format!("loading {}", vk_path.display()))?;
            let backend = CommandBackend::new(config.command_backend.clone());
            run_demo(&config, ProofOrchestrator::new(backend, config.prover.clone()), vk).await
        }
    }
}

async fn run_demo<B: ProvingBackend>(
    config: &NodeConfig,
    orchestrator: ProofOrchestrator<B>,
    vk: VerificationKey,
) -> Result<()> {
    info!("=== Building Membership Index ===");
    let national_ids = ["EST-38001085718", "EST-49403136526", "EST-37605030299", "EST-60001019906"];
    let index = MembershipIndex::from_national_ids(&national_ids)?;
    info!("{} voters, root {}", index.leaf_count(), index.root());

    let clock = Arc::new(ManualClock::new(DEMO_START));
    let service = build_service(config, clock.clone());
    let authority = service.authority().await;

    info!("=== Creating Election ===");
    let election_id = service
        .create_election(&authority, "Demo referendum", DEMO_START + 60, DEMO_START + 3600, Hash32::ZERO)
        .await?;
    service.open_election(&authority, election_id).await?;
    info!("Election {} opened", election_id);

    info!("=== Proving Eligibility ===");
    let voter = voter_leaf(national_ids[2]);
    let secret = voter_secret(b"demo voter key material");
    let bundle = orchestrator.prove_voter(&index, &voter, &secret, election_id).await?;
    info!("Nullifier {}", bundle.nullifier);

    if !orchestrator.verify_proof_locally(&bundle.proof, &bundle.public_signals, &vk).await {
        bail!("eligibility proof failed local verification");
    }
    info!("Proof verified locally");

    let token_hash = voter_token_hash(election_id, &bundle.nullifier);
    service.register_token(&authority, election_id, token_hash).await?;
    info!("Token {} registered", token_hash);

    info!("=== Casting Vote ===");
    clock.set(DEMO_START + 120);
    let ballot = b"ciphertext:candidate-2";
    let receipt = service.cast_vote(election_id, token_hash, ballot).await?;
    info!("Vote {} accepted at position {}", receipt.vote_hash, receipt.confirmation_position);

    match service.cast_vote(election_id, token_hash, ballot).await {
        Err(LedgerError::TokenAlreadyUsed) => info!("Second cast with the same token rejected"),
        Err(e) => bail!("unexpected error on double cast: {e}"),
        Ok(_) => bail!("double cast was accepted"),
    }

    let inclusion = service.verify_vote_inclusion(election_id, &receipt.vote_hash).await;
    info!("Inclusion: exists={} position={}", inclusion.exists, inclusion.position);

    info!("=== Closing Election ===");
    clock.set(DEMO_START + 3600);
    service.close_election(&authority, election_id).await?;
    info!("Aggregate root {}", service.aggregate_root(election_id).await);

    info!("=== Auditing Log ===");
    let report = service.audit().await?;
    for election in &report.elections {
        info!("Election {}: {} vote(s)", election.election_id, election.vote_count);
    }

    if report.valid {
        info!("AUDIT PASSED: replay of {} log entries matches live state", report.log_length);
    } else {
        bail!("audit failed: {:?}", report.mismatches);
    }

    Ok(())
}
