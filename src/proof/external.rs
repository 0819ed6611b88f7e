//! External Command Prover
//!
//! Drives a snarkjs-compatible CLI:
//!
//! ```text
//! <program> groth16 fullprove input.json <wasm> <zkey> proof.json public.json
//! <program> groth16 verify vk.json public.json proof.json
//! ```
//!
//! Each invocation works in its own scratch directory under `work_dir`.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::core::field::FieldElement;
use crate::proof::backend::{Proof, ProverError, ProvingBackend, VerificationKey};
use crate::proof::circuit::{EligibilityWitness, PublicSignals, CIRCUIT_ID};

/// Configuration for the command prover.
#[derive(Clone, Debug)]
pub struct CommandBackendConfig {
    /// Prover executable (e.g. `snarkjs`).
    pub program: PathBuf,
    /// Compiled circuit (witness generator).
    pub circuit_wasm: PathBuf,
    /// Proving key.
    pub circuit_zkey: PathBuf,
    /// Parent directory for scratch directories.
    pub work_dir: PathBuf,
}

impl Default for CommandBackendConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("snarkjs"),
            circuit_wasm: PathBuf::from("circuits/voter_eligibility.wasm"),
            circuit_zkey: PathBuf::from("circuits/voter_eligibility.zkey"),
            work_dir: std::env::temp_dir(),
        }
    }
}

/// Prover that shells out to an external CLI.
#[derive(Clone, Debug)]
pub struct CommandBackend {
    config: CommandBackendConfig,
}

impl CommandBackend {
    /// Create a backend from configuration.
    pub fn new(config: CommandBackendConfig) -> Self {
        Self { config }
    }

    /// Load a verification key exported by the prover (`verification_key.json`).
    pub async fn load_verification_key(path: &Path) -> Result<VerificationKey, ProverError> {
        let data = tokio::fs::read(path).await?;
        serde_json::from_slice::<serde_json::Value>(&data)?;
        Ok(VerificationKey {
            circuit_id: CIRCUIT_ID.to_string(),
            data,
        })
    }

    async fn scratch_dir(&self) -> Result<PathBuf, ProverError> {
        let dir = self
            .config
            .work_dir
            .join(format!("zk-ballot-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn run(&self, dir: &Path, args: &[&std::ffi::OsStr]) -> Result<std::process::Output, ProverError> {
        debug!(program = %self.config.program.display(), dir = %dir.display(), "invoking prover");
        let output = Command::new(&self.config.program)
            .args(args)
            .current_dir(dir)
            .output()
            .await?;
        Ok(output)
    }

    async fn cleanup(dir: &Path) {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            warn!(dir = %dir.display(), "failed to remove prover scratch dir: {}", e);
        }
    }

    async fn prove_in(
        &self,
        dir: &Path,
        witness: &EligibilityWitness,
    ) -> Result<(Proof, PublicSignals), ProverError> {
        tokio::fs::write(dir.join("input.json"), serde_json::to_vec(witness)?).await?;

        let output = self
            .run(
                dir,
                &[
                    "groth16".as_ref(),
                    "fullprove".as_ref(),
                    "input.json".as_ref(),
                    self.config.circuit_wasm.as_os_str(),
                    self.config.circuit_zkey.as_os_str(),
                    "proof.json".as_ref(),
                    "public.json".as_ref(),
                ],
            )
            .await?;

        if !output.status.success() {
            return Err(ProverError::ProofGeneration(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let proof_data = tokio::fs::read(dir.join("proof.json")).await?;
        let public_raw = tokio::fs::read(dir.join("public.json")).await?;
        let signals = parse_public_signals(&public_raw)?;

        Ok((
            Proof {
                circuit_id: CIRCUIT_ID.to_string(),
                data: proof_data,
            },
            signals,
        ))
    }

    async fn verify_in(
        &self,
        dir: &Path,
        vk: &VerificationKey,
        signals: &PublicSignals,
        proof: &Proof,
    ) -> Result<bool, ProverError> {
        let public: Vec<String> = signals.to_fields().iter().map(FieldElement::to_hex).collect();

        tokio::fs::write(dir.join("vk.json"), &vk.data).await?;
        tokio::fs::write(dir.join("public.json"), serde_json::to_vec(&public)?).await?;
        tokio::fs::write(dir.join("proof.json"), &proof.data).await?;

        let output = self
            .run(
                dir,
                &[
                    "groth16".as_ref(),
                    "verify".as_ref(),
                    "vk.json".as_ref(),
                    "public.json".as_ref(),
                    "proof.json".as_ref(),
                ],
            )
            .await?;

        Ok(output.status.success())
    }
}

impl ProvingBackend for CommandBackend {
    async fn prove(
        &self,
        witness: &EligibilityWitness,
    ) -> Result<(Proof, PublicSignals), ProverError> {
        let dir = self.scratch_dir().await?;
        let result = self.prove_in(&dir, witness).await;
        Self::cleanup(&dir).await;
        result
    }

    async fn verify(
        &self,
        vk: &VerificationKey,
        signals: &PublicSignals,
        proof: &Proof,
    ) -> Result<bool, ProverError> {
        if vk.circuit_id != proof.circuit_id {
            return Err(ProverError::CircuitMismatch {
                expected: vk.circuit_id.clone(),
                got: proof.circuit_id.clone(),
            });
        }

        let dir = self.scratch_dir().await?;
        let result = self.verify_in(&dir, vk, signals, proof).await;
        Self::cleanup(&dir).await;
        result
    }
}

/// Parse a snarkjs `public.json` (decimal or `0x` strings, circuit order).
pub fn parse_public_signals(raw: &[u8]) -> Result<PublicSignals, ProverError> {
    let values: Vec<String> = serde_json::from_slice(raw)?;

    let fields = values
        .iter()
        .map(|v| {
            if v.starts_with("0x") {
                FieldElement::from_hex(v)
            } else {
                FieldElement::from_decimal(v)
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProverError::MalformedOutput(e.to_string()))?;

    PublicSignals::from_fields(&fields).map_err(|e| ProverError::MalformedOutput(e.to_string()))
}
