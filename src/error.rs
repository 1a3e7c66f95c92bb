use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::contracts::ContractKind;

/// Named step of the scenario. Every fatal error carries the stage it was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ConnectAndLoadMaster,
    CreateAdmin,
    CreateUsers,
    DeployTokenContracts,
    DeployAmmContract,
    InitializeContracts,
    BalanceDistribution,
    SwapVerification,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::ConnectAndLoadMaster => "ConnectAndLoadMaster",
            Stage::CreateAdmin => "CreateAdmin",
            Stage::CreateUsers => "CreateUsers",
            Stage::DeployTokenContracts => "DeployTokenContracts",
            Stage::DeployAmmContract => "DeployAmmContract",
            Stage::InitializeContracts => "InitializeContracts",
            Stage::BalanceDistribution => "BalanceDistribution",
            Stage::SwapVerification => "SwapVerification",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure category used for reporting and for the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connection,
    LedgerRejection,
    Collaborator,
    Assertion,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown network profile `{0}` (expected `sandbox` or `local`)")]
    UnknownProfile(String),
    #[error("invalid account id `{value}`: {reason}")]
    InvalidAccountId { value: String, reason: String },
    #[error("no user accounts configured")]
    NoUsers,
    #[error("per-account key issuance is not supported; shared_test_key must be enabled")]
    SharedKeyRequired,
    #[error("failed to read key file {}: {source}", path.display())]
    KeyFileIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("key file {} is not valid: {reason}", path.display())]
    KeyFileFormat { path: PathBuf, reason: String },
    #[error("invalid key material: {0}")]
    KeyMaterial(String),
    #[error("failed to read contract binary {}: {source}", path.display())]
    Binary {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to start local sandbox: {0}")]
    Sandbox(String),
}

/// Errors reported by a [`crate::LedgerGateway`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("rejected by the ledger: {0}")]
    Rejected(String),
    #[error("contract execution failed: {0}")]
    ContractFailure(String),
    #[error("{operation} did not finalize within {after:?}")]
    Timeout { operation: String, after: Duration },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Connection(_) => ErrorKind::Connection,
            GatewayError::Rejected(_) | GatewayError::Timeout { .. } => ErrorKind::LedgerRejection,
            GatewayError::ContractFailure(_) => ErrorKind::Collaborator,
        }
    }
}

/// Errors raised through a [`crate::ContractHandle`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("`{op}` is not declared by the {kind} descriptor")]
    Undeclared { op: &'static str, kind: ContractKind },
    #[error("a {descriptor} handle cannot target {target}, which hosts a {hosted} contract")]
    KindMismatch {
        descriptor: ContractKind,
        target: String,
        hosted: ContractKind,
    },
    #[error("unexpected response from `{op}`: {detail}")]
    Malformed { op: &'static str, detail: String },
}

impl CallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Gateway(err) => err.kind(),
            CallError::Undeclared { .. } | CallError::KindMismatch { .. } => {
                ErrorKind::Configuration
            }
            CallError::Malformed { .. } => ErrorKind::Collaborator,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("[{stage}] {source}")]
    Config { stage: Stage, source: ConfigError },
    #[error("[{stage}] {source}")]
    Gateway { stage: Stage, source: GatewayError },
    #[error("[{stage}] {source}")]
    Call { stage: Stage, source: CallError },
    #[error("[{stage}] {detail}")]
    Precondition { stage: Stage, detail: String },
    #[error("[{stage}] {detail}")]
    Collaborator { stage: Stage, detail: String },
    #[error("[{}] swap did not increase the token B balance: before {before}, after {after}", Stage::SwapVerification)]
    Assertion { before: u128, after: u128 },
}

impl ScenarioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScenarioError::Config { .. } | ScenarioError::Precondition { .. } => {
                ErrorKind::Configuration
            }
            ScenarioError::Gateway { source, .. } => source.kind(),
            ScenarioError::Call { source, .. } => source.kind(),
            ScenarioError::Collaborator { .. } => ErrorKind::Collaborator,
            ScenarioError::Assertion { .. } => ErrorKind::Assertion,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            ScenarioError::Config { stage, .. }
            | ScenarioError::Gateway { stage, .. }
            | ScenarioError::Call { stage, .. }
            | ScenarioError::Precondition { stage, .. }
            | ScenarioError::Collaborator { stage, .. } => *stage,
            ScenarioError::Assertion { .. } => Stage::SwapVerification,
        }
    }
}

/// Tags a lower-level error with the stage it surfaced in.
pub trait AtStage<T> {
    fn at_stage(self, stage: Stage) -> Result<T, ScenarioError>;
}

impl<T> AtStage<T> for Result<T, ConfigError> {
    fn at_stage(self, stage: Stage) -> Result<T, ScenarioError> {
        self.map_err(|source| ScenarioError::Config { stage, source })
    }
}

impl<T> AtStage<T> for Result<T, GatewayError> {
    fn at_stage(self, stage: Stage) -> Result<T, ScenarioError> {
        self.map_err(|source| ScenarioError::Gateway { stage, source })
    }
}

impl<T> AtStage<T> for Result<T, CallError> {
    fn at_stage(self, stage: Stage) -> Result<T, ScenarioError> {
        self.map_err(|source| ScenarioError::Call { stage, source })
    }
}
