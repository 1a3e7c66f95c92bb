use near_api::AccountId;
use tracing::{error, info};

use crate::context::{ContractRole, PipelineState, ScenarioContext};
use crate::error::{AtStage, ScenarioError, Stage};

const STAGE: Stage = Stage::SwapVerification;

// ft_on_transfer message understood by the AMM as "swap everything received"
const SWAP_MSG: &str = "";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapReport {
    pub user: AccountId,
    pub amount_in: u128,
    /// Token B balance read before the swap was submitted.
    pub before: u128,
    /// Token B balance read after the swap finalized.
    pub after: u128,
}

impl SwapReport {
    pub fn received(&self) -> u128 {
        self.after.saturating_sub(self.before)
    }
}

/// Sends token A from a user into the AMM and checks that the user's token B
/// balance went up.
pub struct SwapVerificationStage;

impl SwapVerificationStage {
    pub async fn run(
        ctx: &mut ScenarioContext,
        user: &AccountId,
    ) -> Result<SwapReport, ScenarioError> {
        ctx.require_state(STAGE, PipelineState::Distributed)?;
        let report = Self::swap(ctx, user).await?;

        if report.after <= report.before {
            error!(
                stage = %STAGE,
                user = %user,
                before = %report.before,
                after = %report.after,
                "token B balance did not increase"
            );
            return Err(ScenarioError::Assertion {
                before: report.before,
                after: report.after,
            });
        }

        info!(
            stage = %STAGE,
            user = %user,
            before = %report.before,
            after = %report.after,
            "swap verified"
        );
        ctx.advance(STAGE, PipelineState::Verified)?;
        Ok(report)
    }

    async fn swap(ctx: &ScenarioContext, user: &AccountId) -> Result<SwapReport, ScenarioError> {
        let identity = ctx.identity(STAGE, user)?;
        let token_a = ctx.token(STAGE, ContractRole::TokenA, identity.clone())?;
        let token_b = ctx.token(STAGE, ContractRole::TokenB, identity)?;
        let amm_account = &ctx.profile.amm_account;
        let amount_in = ctx.params.swap_amount;

        let before = token_b.balance_of(user).await.at_stage(STAGE)?;
        info!(stage = %STAGE, user = %user, balance = %before, "token B balance before swap");

        info!(stage = %STAGE, user = %user, amount = %amount_in, amm = %amm_account, "performing swap");
        let used = token_a
            .transfer_call(amm_account, amount_in, SWAP_MSG)
            .await
            .at_stage(STAGE)?;
        tracing::debug!(stage = %STAGE, used = ?used, "swap transaction finalized");

        let after = token_b.balance_of(user).await.at_stage(STAGE)?;
        info!(stage = %STAGE, user = %user, balance = %after, "token B balance after swap");

        Ok(SwapReport {
            user: user.clone(),
            amount_in,
            before,
            after,
        })
    }
}
