use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use near_api::{AccountId, NearToken};
use near_api_types::PublicKey;
use serde_json::Value;

use crate::error::GatewayError;
use crate::keys::Identity;

/// Capability surface the scenario needs from the ledger.
///
/// Every state-changing method resolves only once the ledger reports the
/// transaction final, either successful or failed.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    fn network_id(&self) -> &str;

    async fn account_exists(&self, account_id: &AccountId) -> Result<bool, GatewayError>;

    /// Creates `new_account_id` funded by `parent` with `initial_balance`.
    async fn create_account(
        &self,
        parent: &Identity,
        new_account_id: &AccountId,
        public_key: &PublicKey,
        initial_balance: NearToken,
    ) -> Result<(), GatewayError>;

    /// Creates `account_id` funded by `parent`, adds `public_key` as a full
    /// access key and uploads `code`, all in one transaction. Either every
    /// step takes effect or none does.
    async fn deploy_contract(
        &self,
        parent: &Identity,
        account_id: &AccountId,
        public_key: &PublicKey,
        initial_balance: NearToken,
        code: &[u8],
    ) -> Result<(), GatewayError>;

    async fn view(
        &self,
        contract_id: &AccountId,
        method: &str,
        args: Value,
    ) -> Result<Value, GatewayError>;

    /// Signs as `caller`, submits, and returns the decoded JSON return value if
    /// the method produced one.
    async fn call(
        &self,
        caller: &Identity,
        contract_id: &AccountId,
        method: &str,
        args: Value,
        deposit: NearToken,
    ) -> Result<Option<Value>, GatewayError>;
}

/// Bounds a ledger wait. Expiry is reported as [`GatewayError::Timeout`].
pub async fn within<T, F>(
    limit: Duration,
    operation: impl fmt::Display,
    fut: F,
) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            operation: operation.to_string(),
            after: limit,
        }),
    }
}
