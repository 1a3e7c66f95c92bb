use std::sync::Arc;

use futures::future::join_all;
use tracing::info;

use crate::config::{ContractBinaries, NetworkProfile, ScenarioParams};
use crate::context::{ContractRole, PipelineState, ScenarioContext};
use crate::contracts::ContractKind;
use crate::error::{AtStage, GatewayError, ScenarioError, Stage};
use crate::keys::{Identity, load_master_key};
use crate::ledger::{LedgerGateway, within};
use crate::provisioner::{AccountProvisioner, ContractDeployer};

/// Stands up admin, users, both tokens and the AMM, in dependency order:
/// connect, admin, users, then token and AMM deployments side by side, then
/// initialization.
pub struct ProvisioningPipeline;

impl ProvisioningPipeline {
    /// Connect, then run every provisioning step. The returned context is `Provisioned`.
    pub async fn provision(
        gateway: Arc<dyn LedgerGateway>,
        profile: NetworkProfile,
        params: ScenarioParams,
        binaries: &ContractBinaries,
    ) -> Result<ScenarioContext, ScenarioError> {
        let mut ctx = Self::connect_and_load_master(gateway, profile, params).await?;
        Self::run(&mut ctx, binaries).await?;
        Ok(ctx)
    }

    pub async fn connect_and_load_master(
        gateway: Arc<dyn LedgerGateway>,
        profile: NetworkProfile,
        params: ScenarioParams,
    ) -> Result<ScenarioContext, ScenarioError> {
        let stage = Stage::ConnectAndLoadMaster;
        info!(
            %stage,
            network = %profile.network_id,
            rpc = %profile.rpc_endpoint,
            "connecting to network and loading master account"
        );
        profile.validate().at_stage(stage)?;
        let key = load_master_key(&profile.key_path).at_stage(stage)?;

        // Any failure to reach the master account means there is no usable session
        let master_exists = within(
            params.finality_timeout,
            format!("view account {}", profile.master_account),
            gateway.account_exists(&profile.master_account),
        )
        .await
        .map_err(|err| match err {
            GatewayError::Connection(_) => err,
            other => GatewayError::Connection(other.to_string()),
        })
        .at_stage(stage)?;
        if !master_exists {
            return Err(GatewayError::Connection(format!(
                "master account {} does not exist on {}",
                profile.master_account, profile.network_id
            )))
            .at_stage(stage);
        }

        let master = Identity::new(profile.master_account.clone(), key);
        Ok(ScenarioContext::new(profile, params, gateway, master))
    }

    /// Steps after connecting. Each step finalizes before the next starts.
    pub async fn run(
        ctx: &mut ScenarioContext,
        binaries: &ContractBinaries,
    ) -> Result<(), ScenarioError> {
        Self::create_admin(ctx).await?;
        Self::create_users(ctx).await?;
        Self::deploy_contracts(ctx, binaries).await?;
        Self::initialize_contracts(ctx).await?;
        info!(state = ?ctx.state(), "scenario provisioned");
        Ok(())
    }

    async fn create_admin(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        let stage = Stage::CreateAdmin;
        ctx.require_state(stage, PipelineState::MasterLoaded)?;
        info!(%stage, account = %ctx.profile.admin_account, "creating contracts admin account");

        let gateway = ctx.shared_gateway();
        let provisioner = AccountProvisioner::new(gateway.as_ref(), ctx.params.finality_timeout);
        let master = ctx.master().clone();
        let admin_account = ctx.profile.admin_account.clone();
        let funding = ctx.params.account_funding;

        provisioner
            .create_and_register(
                ctx.key_store_mut(),
                &master,
                &admin_account,
                &master.key,
                funding,
            )
            .await
            .at_stage(stage)?;
        ctx.advance(stage, PipelineState::AdminCreated)
    }

    async fn create_users(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        let stage = Stage::CreateUsers;
        ctx.require_state(stage, PipelineState::AdminCreated)?;
        info!(%stage, users = ctx.profile.user_accounts.len(), "creating user accounts");

        let gateway = ctx.shared_gateway();
        let provisioner = AccountProvisioner::new(gateway.as_ref(), ctx.params.finality_timeout);
        let master = ctx.master().clone();

        // Users are independent; every creation settles before the first failure is reported
        let created = join_all(ctx.profile.user_accounts.iter().map(|user| {
            provisioner.create_funded_account(&master, user, &master.key, ctx.params.account_funding)
        }))
        .await;
        let users = created
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .at_stage(stage)?;

        for user in &users {
            provisioner.register(ctx.key_store_mut(), user);
        }
        ctx.advance(stage, PipelineState::UsersCreated)
    }

    async fn deploy_contracts(
        ctx: &mut ScenarioContext,
        binaries: &ContractBinaries,
    ) -> Result<(), ScenarioError> {
        ctx.require_state(Stage::DeployTokenContracts, PipelineState::UsersCreated)?;

        let gateway = ctx.shared_gateway();
        let deployer = ContractDeployer::new(gateway.as_ref(), ctx.params.finality_timeout);
        let master = ctx.master().clone();
        let profile = &ctx.profile;
        let funding = ctx.params.account_funding;

        let tokens = async {
            let stage = Stage::DeployTokenContracts;
            info!(%stage, "deploying fungible token contracts");
            let token_a = deployer
                .deploy_and_fund(
                    &master,
                    &profile.token_a_account,
                    ContractKind::FungibleToken,
                    &binaries.token,
                    &master.key,
                    funding,
                )
                .await
                .at_stage(stage)?;
            let token_b = deployer
                .deploy_and_fund(
                    &master,
                    &profile.token_b_account,
                    ContractKind::FungibleToken,
                    &binaries.token,
                    &master.key,
                    funding,
                )
                .await
                .at_stage(stage)?;
            Ok::<_, ScenarioError>((token_a, token_b))
        };
        let amm = async {
            let stage = Stage::DeployAmmContract;
            info!(%stage, "deploying AMM contract");
            deployer
                .deploy_and_fund(
                    &master,
                    &profile.amm_account,
                    ContractKind::Amm,
                    &binaries.amm,
                    &master.key,
                    funding,
                )
                .await
                .at_stage(stage)
        };

        // Neither deployment depends on the other; both settle before either result is used
        let (tokens, amm) = tokio::join!(tokens, amm);
        let ((token_a_host, token_a), (token_b_host, token_b)) = tokens?;
        let (amm_host, amm) = amm?;

        for (role, host, deployed) in [
            (ContractRole::TokenA, token_a_host, token_a),
            (ContractRole::TokenB, token_b_host, token_b),
            (ContractRole::Amm, amm_host, amm),
        ] {
            deployer.provisioner().register(ctx.key_store_mut(), &host);
            ctx.record_contract(role, deployed);
        }
        ctx.advance(Stage::DeployAmmContract, PipelineState::ContractsDeployed)
    }

    async fn initialize_contracts(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        let stage = Stage::InitializeContracts;
        ctx.require_state(stage, PipelineState::ContractsDeployed)?;
        let admin = ctx.identity(stage, &ctx.profile.admin_account)?;

        info!(%stage, "initializing token contracts");
        for (role, spec) in [
            (ContractRole::TokenA, &ctx.params.token_a),
            (ContractRole::TokenB, &ctx.params.token_b),
        ] {
            let token = ctx.token(stage, role, admin.clone())?;
            info!(
                %stage,
                token = %token.account_id(),
                symbol = %spec.symbol,
                total_supply = %spec.total_supply,
                "initializing token"
            );
            token.init(&admin.account_id, spec).await.at_stage(stage)?;

            let metadata = token.metadata().await.at_stage(stage)?;
            if metadata.decimals != spec.decimals || metadata.symbol != spec.symbol {
                return Err(ScenarioError::Collaborator {
                    stage,
                    detail: format!(
                        "{} reports {} with {} decimals, expected {} with {}",
                        token.account_id(),
                        metadata.symbol,
                        metadata.decimals,
                        spec.symbol,
                        spec.decimals
                    ),
                });
            }
        }

        info!(%stage, "initializing AMM contract");
        let amm = ctx.amm(stage, admin.clone())?;
        amm.init(
            &admin.account_id,
            &ctx.profile.token_a_account,
            &ctx.profile.token_b_account,
        )
        .await
        .at_stage(stage)?;

        ctx.advance(stage, PipelineState::Provisioned)
    }
}
