//! # AMM sandbox scenario
//!
//! Stands up a disposable NEAR sandbox with two NEP-141 fungible tokens and an
//! AMM contract, distributes balances to the participants and verifies that a
//! transfer-with-callback into the AMM swaps token A for token B.
//!
//! The run is split into three stages that share one [`ScenarioContext`]:
//! [`ProvisioningPipeline`], [`BalanceDistributionStage`] and
//! [`SwapVerificationStage`]. All ledger access goes through the
//! [`LedgerGateway`] trait; [`NearGateway`] implements it on top of `near-api`.

pub mod config;
pub mod context;
pub mod contracts;
pub mod distribution;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod near_gateway;
pub mod pipeline;
pub mod provisioner;
pub mod sandbox;
pub mod scenario;
pub mod swap;
pub mod token;

pub use config::{ContractBinaries, NetworkProfile, ScenarioParams, TokenSpec};
pub use context::{ContractRole, PipelineState, ScenarioContext};
pub use contracts::{ContractDescriptor, ContractHandle, ContractKind, DeployedContractRef};
pub use distribution::{BalanceDistributionStage, DistributionReport};
pub use error::{CallError, ConfigError, ErrorKind, GatewayError, ScenarioError, Stage};
pub use keys::{Identity, KeyMaterial, KeyStore};
pub use ledger::LedgerGateway;
pub use near_gateway::NearGateway;
pub use pipeline::ProvisioningPipeline;
pub use provisioner::{AccountProvisioner, ContractDeployer};
pub use scenario::run_scenario;
pub use swap::{SwapReport, SwapVerificationStage};
pub use token::{AmmContract, FungibleTokenMetadata, TokenContract};
