use std::sync::Arc;

use tracing::info;

use crate::config::{ContractBinaries, NetworkProfile, ScenarioParams};
use crate::distribution::BalanceDistributionStage;
use crate::error::{ScenarioError, Stage};
use crate::ledger::LedgerGateway;
use crate::pipeline::ProvisioningPipeline;
use crate::swap::{SwapReport, SwapVerificationStage};

/// Runs the whole scenario: provisioning, balance distribution, then the swap
/// check for the first configured user.
pub async fn run_scenario(
    gateway: Arc<dyn LedgerGateway>,
    profile: NetworkProfile,
    params: ScenarioParams,
    binaries: &ContractBinaries,
) -> Result<SwapReport, ScenarioError> {
    let mut ctx = ProvisioningPipeline::provision(gateway, profile, params, binaries).await?;

    let distribution = BalanceDistributionStage::run(&mut ctx).await?;
    info!(transfers = distribution.transfers.len(), "balance distribution complete");

    let user = ctx
        .profile
        .user_accounts
        .first()
        .cloned()
        .ok_or_else(|| ScenarioError::Precondition {
            stage: Stage::SwapVerification,
            detail: "no user account to swap with".to_string(),
        })?;
    SwapVerificationStage::run(&mut ctx, &user).await
}
