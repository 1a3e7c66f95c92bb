use futures::future::join_all;
use near_api::AccountId;
use tracing::{error, info};

use crate::config::TokenSpec;
use crate::context::{ContractRole, PipelineState, ScenarioContext};
use crate::error::{AtStage, ScenarioError, Stage};
use crate::keys::Identity;

const STAGE: Stage = Stage::BalanceDistribution;

/// One settled (participant, token) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub participant: AccountId,
    pub token: ContractRole,
    pub amount: u128,
    /// False when the participant already had a storage record on the token.
    pub opened_storage: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub transfers: Vec<TransferRecord>,
}

/// Opens storage records and transfers the initial balances of both tokens to
/// every participant (users and the AMM).
pub struct BalanceDistributionStage;

impl BalanceDistributionStage {
    /// Resolves only once every storage deposit and every transfer has
    /// finalized. Pairs run concurrently; within a pair the deposit finalizes
    /// before the transfer is submitted.
    pub async fn run(ctx: &mut ScenarioContext) -> Result<DistributionReport, ScenarioError> {
        ctx.require_state(STAGE, PipelineState::Provisioned)?;
        let admin = ctx.identity(STAGE, &ctx.profile.admin_account)?;
        let participants = ctx.profile.participants();
        let tokens = [
            (ContractRole::TokenA, &ctx.params.token_a),
            (ContractRole::TokenB, &ctx.params.token_b),
        ];
        info!(
            stage = %STAGE,
            participants = participants.len(),
            "opening storage records and distributing token balances"
        );

        let settled = {
            let shared: &ScenarioContext = ctx;
            let pairs = participants.iter().flat_map(|participant| {
                tokens
                    .iter()
                    .map(move |(role, spec)| (participant, *role, *spec))
            });
            // join_all, not try_join_all: a failing pair must not leave other pairs in flight
            join_all(pairs.map(|(participant, role, spec)| {
                settle_pair(shared, &admin, participant, role, spec)
            }))
            .await
        };

        let mut report = DistributionReport::default();
        let mut failures = Vec::new();
        for outcome in settled {
            match outcome {
                Ok(record) => report.transfers.push(record),
                Err(err) => failures.push(err),
            }
        }
        if let Some(first) = failures.into_iter().next() {
            error!(
                stage = %STAGE,
                settled = report.transfers.len(),
                "balance distribution failed: {first}"
            );
            return Err(first);
        }

        info!(stage = %STAGE, transfers = report.transfers.len(), "all balances distributed");
        ctx.advance(STAGE, PipelineState::Distributed)?;
        Ok(report)
    }
}

async fn settle_pair(
    ctx: &ScenarioContext,
    admin: &Identity,
    participant: &AccountId,
    role: ContractRole,
    spec: &TokenSpec,
) -> Result<TransferRecord, ScenarioError> {
    // The participant pays for its own storage record
    let owner = ctx.identity(STAGE, participant)?;
    let as_participant = ctx.token(STAGE, role, owner)?;

    let opened_storage = !as_participant
        .has_storage(participant)
        .await
        .at_stage(STAGE)?;
    if opened_storage {
        as_participant
            .storage_deposit(participant, ctx.params.storage_deposit)
            .await
            .at_stage(STAGE)?;
    }

    let as_admin = ctx.token(STAGE, role, admin.clone())?;
    as_admin
        .transfer(participant, spec.initial_distribution)
        .await
        .at_stage(STAGE)?;
    tracing::debug!(
        stage = %STAGE,
        token = %as_admin.account_id(),
        receiver = %participant,
        amount = %spec.initial_distribution,
        "transfer finalized"
    );

    Ok(TransferRecord {
        participant: participant.clone(),
        token: role,
        amount: spec.initial_distribution,
        opened_storage,
    })
}
