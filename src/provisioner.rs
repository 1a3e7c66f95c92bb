use std::time::Duration;

use near_api::{AccountId, NearToken};

use crate::contracts::{ContractKind, DeployedContractRef};
use crate::error::GatewayError;
use crate::keys::{Identity, KeyMaterial, KeyStore};
use crate::ledger::{LedgerGateway, within};

/// Creates funded sub-accounts and registers their keys.
pub struct AccountProvisioner<'g> {
    gateway: &'g dyn LedgerGateway,
    timeout: Duration,
}

impl<'g> AccountProvisioner<'g> {
    pub fn new(gateway: &'g dyn LedgerGateway, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    /// Creates `new_account_id` under `parent` with `key`'s public key and
    /// returns its identity. The caller registers it with [`Self::register`]
    /// once the creation has finalized.
    pub async fn create_funded_account(
        &self,
        parent: &Identity,
        new_account_id: &AccountId,
        key: &KeyMaterial,
        initial_balance: NearToken,
    ) -> Result<Identity, GatewayError> {
        if !new_account_id.is_sub_account_of(&parent.account_id) {
            return Err(GatewayError::Rejected(format!(
                "{new_account_id} is not a sub-account of {}",
                parent.account_id
            )));
        }

        tracing::info!(
            account = %new_account_id,
            parent = %parent.account_id,
            balance = %initial_balance,
            "creating account"
        );
        within(
            self.timeout,
            format!("create_account {new_account_id}"),
            self.gateway
                .create_account(parent, new_account_id, key.public_key(), initial_balance),
        )
        .await?;

        Ok(Identity::new(new_account_id.clone(), key.clone()))
    }

    pub fn register(&self, key_store: &mut KeyStore, identity: &Identity) {
        key_store.insert(
            self.gateway.network_id(),
            identity.account_id.clone(),
            identity.key.clone(),
        );
    }

    /// [`Self::create_funded_account`] followed by registration.
    pub async fn create_and_register(
        &self,
        key_store: &mut KeyStore,
        parent: &Identity,
        new_account_id: &AccountId,
        key: &KeyMaterial,
        initial_balance: NearToken,
    ) -> Result<Identity, GatewayError> {
        let identity = self
            .create_funded_account(parent, new_account_id, key, initial_balance)
            .await?;
        self.register(key_store, &identity);
        Ok(identity)
    }
}

/// Creates a hosting account and uploads contract code to it in one ledger
/// operation.
pub struct ContractDeployer<'g> {
    provisioner: AccountProvisioner<'g>,
    gateway: &'g dyn LedgerGateway,
    timeout: Duration,
}

impl<'g> ContractDeployer<'g> {
    pub fn new(gateway: &'g dyn LedgerGateway, timeout: Duration) -> Self {
        Self {
            provisioner: AccountProvisioner::new(gateway, timeout),
            gateway,
            timeout,
        }
    }

    pub fn provisioner(&self) -> &AccountProvisioner<'g> {
        &self.provisioner
    }

    /// Returns the host identity alongside the contract reference so the
    /// caller can register it. A failed or timed out deploy leaves no host
    /// account behind.
    pub async fn deploy_and_fund(
        &self,
        parent: &Identity,
        account_id: &AccountId,
        kind: ContractKind,
        binary: &[u8],
        key: &KeyMaterial,
        initial_balance: NearToken,
    ) -> Result<(Identity, DeployedContractRef), GatewayError> {
        if !account_id.is_sub_account_of(&parent.account_id) {
            return Err(GatewayError::Rejected(format!(
                "{account_id} is not a sub-account of {}",
                parent.account_id
            )));
        }

        tracing::info!(
            account = %account_id,
            parent = %parent.account_id,
            balance = %initial_balance,
            %kind,
            bytes = binary.len(),
            "deploying contract"
        );
        within(
            self.timeout,
            format!("deploy_contract {account_id}"),
            self.gateway.deploy_contract(
                parent,
                account_id,
                key.public_key(),
                initial_balance,
                binary,
            ),
        )
        .await?;

        Ok((
            Identity::new(account_id.clone(), key.clone()),
            DeployedContractRef {
                account_id: account_id.clone(),
                kind,
            },
        ))
    }
}
