//! Node Configuration
//!
//! Everything is read from environment variables. Unset variables fall back to
//! defaults; set but malformed variables are errors naming the variable.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::ledger::signing::SigningPolicy;
use crate::network::auth::AuthConfig;
use crate::network::server::GatewayConfig;
use crate::proof::external::CommandBackendConfig;
use crate::proof::orchestrator::ProverConfig;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable could not be parsed.
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// A variable required by another setting is unset.
    #[error("{var} must be set when {because}")]
    Missing {
        /// Variable name.
        var: &'static str,
        /// Setting that requires it.
        because: &'static str,
    },
}

/// Which proving backend the node drives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process transcript backend.
    #[default]
    Transcript,
    /// External snarkjs-compatible command.
    Command,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "transcript" => Ok(Self::Transcript),
            "command" | "snarkjs" => Ok(Self::Command),
            other => Err(format!("unknown backend {other}")),
        }
    }
}

/// Full node configuration.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Gateway listener settings.
    pub gateway: GatewayConfig,
    /// JWT validation for authority callers.
    pub auth: AuthConfig,
    /// JWT subject of the election authority.
    pub authority_subject: String,
    /// Proof retry/timeout/diagnostics.
    pub prover: ProverConfig,
    /// Backend selection.
    pub backend: BackendKind,
    /// Command backend settings.
    pub command_backend: CommandBackendConfig,
    /// Verification key exported by the command backend.
    pub verification_key: Option<PathBuf>,
    /// Co-signing policy.
    pub signing_policy: SigningPolicy,
    /// Key material for the keyed-digest signer.
    pub signing_key: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            auth: AuthConfig::default(),
            authority_subject: "election-authority".to_string(),
            prover: ProverConfig::default(),
            backend: BackendKind::default(),
            command_backend: CommandBackendConfig::default(),
            verification_key: None,
            signing_policy: SigningPolicy::default(),
            signing_key: None,
        }
    }
}

impl NodeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let env = Env(&lookup);

        let gateway = GatewayConfig {
            bind_addr: env.parse("BALLOT_BIND_ADDR")?.unwrap_or(defaults.gateway.bind_addr),
            max_connections: env
                .parse("BALLOT_MAX_CONNECTIONS")?
                .unwrap_or(defaults.gateway.max_connections),
            idle_timeout: env
                .parse::<u64>("BALLOT_IDLE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.gateway.idle_timeout),
        };

        let prover = ProverConfig {
            max_attempts: env.parse("PROVER_MAX_ATTEMPTS")?.unwrap_or(defaults.prover.max_attempts),
            initial_backoff: env
                .parse::<u64>("PROVER_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.prover.initial_backoff),
            max_backoff: env
                .parse::<u64>("PROVER_MAX_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.prover.max_backoff),
            timeout: env
                .parse::<u64>("PROVER_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.prover.timeout),
            diagnostics: env.flag("PROVER_DIAGNOSTICS"),
        };

        let command_backend = CommandBackendConfig {
            program: env.path("PROVER_COMMAND").unwrap_or(defaults.command_backend.program),
            circuit_wasm: env
                .path("PROVER_CIRCUIT_WASM")
                .unwrap_or(defaults.command_backend.circuit_wasm),
            circuit_zkey: env
                .path("PROVER_CIRCUIT_ZKEY")
                .unwrap_or(defaults.command_backend.circuit_zkey),
            work_dir: env.path("PROVER_WORK_DIR").unwrap_or(defaults.command_backend.work_dir),
        };

        let backend = env.parse::<BackendKind>("PROVER_BACKEND")?.unwrap_or_default();
        let verification_key = env.path("PROVER_VERIFICATION_KEY");
        if backend == BackendKind::Command && verification_key.is_none() {
            return Err(ConfigError::Missing {
                var: "PROVER_VERIFICATION_KEY",
                because: "PROVER_BACKEND=command",
            });
        }

        let signing_policy = env.parse::<SigningPolicy>("BALLOT_SIGNING_POLICY")?.unwrap_or_default();
        let signing_key = lookup("BALLOT_SIGNING_KEY");
        if signing_policy == SigningPolicy::Required && signing_key.is_none() {
            return Err(ConfigError::Missing {
                var: "BALLOT_SIGNING_KEY",
                because: "BALLOT_SIGNING_POLICY=required",
            });
        }

        Ok(Self {
            gateway,
            auth: AuthConfig::from_lookup(&lookup),
            authority_subject: lookup("BALLOT_AUTHORITY_SUBJECT")
                .unwrap_or(defaults.authority_subject),
            prover,
            backend,
            command_backend,
            verification_key,
            signing_policy,
            signing_key,
        })
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(value) = (self.0)(var) else {
            return Ok(None);
        };
        match value.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn flag(&self, var: &str) -> bool {
        (self.0)(var).is_some_and(|v| v == "true" || v == "1")
    }

    fn path(&self, var: &str) -> Option<PathBuf> {
        (self.0)(var).map(PathBuf::from)
    }
}
