use std::collections::HashMap;
use std::sync::Arc;

use near_api::AccountId;

use crate::config::{NetworkProfile, ScenarioParams};
use crate::contracts::{ContractDescriptor, ContractHandle, ContractKind, DeployedContractRef};
use crate::error::{AtStage, ScenarioError, Stage};
use crate::keys::{Identity, KeyStore};
use crate::ledger::LedgerGateway;
use crate::token::{AmmContract, TokenContract};

/// Progress of a scenario run. Only moves forward, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    MasterLoaded,
    AdminCreated,
    UsersCreated,
    ContractsDeployed,
    Provisioned,
    Distributed,
    Verified,
}

impl PipelineState {
    pub fn successor(self) -> Option<PipelineState> {
        match self {
            PipelineState::MasterLoaded => Some(PipelineState::AdminCreated),
            PipelineState::AdminCreated => Some(PipelineState::UsersCreated),
            PipelineState::UsersCreated => Some(PipelineState::ContractsDeployed),
            PipelineState::ContractsDeployed => Some(PipelineState::Provisioned),
            PipelineState::Provisioned => Some(PipelineState::Distributed),
            PipelineState::Distributed => Some(PipelineState::Verified),
            PipelineState::Verified => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractRole {
    TokenA,
    TokenB,
    Amm,
}

impl ContractRole {
    pub fn kind(self) -> ContractKind {
        match self {
            ContractRole::TokenA | ContractRole::TokenB => ContractKind::FungibleToken,
            ContractRole::Amm => ContractKind::Amm,
        }
    }
}

/// State shared by the stages of one run. Created by
/// [`crate::ProvisioningPipeline::connect_and_load_master`] and only ever extended.
pub struct ScenarioContext {
    pub profile: NetworkProfile,
    pub params: ScenarioParams,
    gateway: Arc<dyn LedgerGateway>,
    master: Identity,
    key_store: KeyStore,
    contracts: HashMap<ContractRole, DeployedContractRef>,
    state: PipelineState,
}

impl ScenarioContext {
    pub(crate) fn new(
        profile: NetworkProfile,
        params: ScenarioParams,
        gateway: Arc<dyn LedgerGateway>,
        master: Identity,
    ) -> Self {
        let mut key_store = KeyStore::default();
        key_store.insert(
            gateway.network_id(),
            master.account_id.clone(),
            master.key.clone(),
        );
        Self {
            profile,
            params,
            gateway,
            master,
            key_store,
            contracts: HashMap::new(),
            state: PipelineState::MasterLoaded,
        }
    }

    pub fn gateway(&self) -> &dyn LedgerGateway {
        self.gateway.as_ref()
    }

    pub(crate) fn shared_gateway(&self) -> Arc<dyn LedgerGateway> {
        Arc::clone(&self.gateway)
    }

    pub fn master(&self) -> &Identity {
        &self.master
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.key_store
    }

    pub(crate) fn key_store_mut(&mut self) -> &mut KeyStore {
        &mut self.key_store
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Moves to `next`, which must be the direct successor of the current state.
    pub(crate) fn advance(&mut self, stage: Stage, next: PipelineState) -> Result<(), ScenarioError> {
        if self.state.successor() != Some(next) {
            return Err(ScenarioError::Precondition {
                stage,
                detail: format!("cannot move from {:?} to {:?}", self.state, next),
            });
        }
        tracing::debug!(%stage, from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
        Ok(())
    }

    pub(crate) fn require_state(
        &self,
        stage: Stage,
        expected: PipelineState,
    ) -> Result<(), ScenarioError> {
        if self.state != expected {
            return Err(ScenarioError::Precondition {
                stage,
                detail: format!(
                    "{stage} requires the pipeline to be {:?}, but it is {:?}",
                    expected, self.state
                ),
            });
        }
        Ok(())
    }

    pub(crate) fn record_contract(&mut self, role: ContractRole, deployed: DeployedContractRef) {
        self.contracts.insert(role, deployed);
    }

    pub fn contract(&self, role: ContractRole) -> Option<&DeployedContractRef> {
        self.contracts.get(&role)
    }

    /// Registered identity for `account_id` on this network.
    pub fn identity(&self, stage: Stage, account_id: &AccountId) -> Result<Identity, ScenarioError> {
        self.key_store
            .identity(self.gateway.network_id(), account_id)
            .ok_or_else(|| ScenarioError::Precondition {
                stage,
                detail: format!("no key registered for {account_id}"),
            })
    }

    pub fn handle(
        &self,
        stage: Stage,
        role: ContractRole,
        caller: Identity,
    ) -> Result<ContractHandle<'_>, ScenarioError> {
        let deployed = self.contract(role).ok_or_else(|| ScenarioError::Precondition {
            stage,
            detail: format!("{role:?} contract has not been deployed"),
        })?;
        ContractHandle::new(
            self.gateway(),
            caller,
            deployed,
            ContractDescriptor::for_kind(role.kind()),
            self.params.finality_timeout,
        )
        .at_stage(stage)
    }

    pub fn token(
        &self,
        stage: Stage,
        role: ContractRole,
        caller: Identity,
    ) -> Result<TokenContract<'_>, ScenarioError> {
        TokenContract::new(self.handle(stage, role, caller)?).at_stage(stage)
    }

    pub fn amm(&self, stage: Stage, caller: Identity) -> Result<AmmContract<'_>, ScenarioError> {
        AmmContract::new(self.handle(stage, ContractRole::Amm, caller)?).at_stage(stage)
    }
}
