use std::fmt;

use async_trait::async_trait;
use near_api::errors::{
    ExecuteTransactionError, QueryError, RetryError, SendRequestError, SignerError,
    ValidationError,
};
use near_api::{
    Account, AccountId, Contract, Data, NearGas, NearToken, NetworkConfig, RPCEndpoint,
    Transaction,
};
use near_api_types::transaction::actions::{
    AddKeyAction, CreateAccountAction, DeployContractAction, TransferAction,
};
use near_api_types::{AccessKey, AccessKeyPermission, Action, PublicKey};
use serde_json::Value;

use crate::config::NetworkProfile;
use crate::error::GatewayError;
use crate::keys::Identity;
use crate::ledger::LedgerGateway;

// Enough for ft_transfer_call plus the AMM callback chain
const CALL_GAS_TGAS: u64 = 300;

/// [`LedgerGateway`] backed by `near-api` against a single RPC endpoint.
pub struct NearGateway {
    network: NetworkConfig,
}

impl NearGateway {
    /// Builds the RPC session for the profile. No request is sent until the first operation.
    pub fn connect(profile: &NetworkProfile) -> Result<Self, GatewayError> {
        let endpoint = match profile.rpc_endpoint.parse() {
            Ok(url) => RPCEndpoint::new(url),
            Err(err) => {
                return Err(GatewayError::Connection(format!(
                    "invalid RPC endpoint `{}`: {err}",
                    profile.rpc_endpoint
                )));
            }
        };

        let network = NetworkConfig {
            network_name: profile.network_id.clone(),
            rpc_endpoints: vec![endpoint],
            ..NetworkConfig::testnet()
        };
        Ok(Self { network })
    }

    pub fn network_config(&self) -> &NetworkConfig {
        &self.network
    }
}

#[async_trait]
impl LedgerGateway for NearGateway {
    fn network_id(&self) -> &str {
        &self.network.network_name
    }

    async fn account_exists(&self, account_id: &AccountId) -> Result<bool, GatewayError> {
        match Account(account_id.clone())
            .view()
            .fetch_from(&self.network)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if unreachable_query(&err) => {
                Err(GatewayError::Connection(format!("{:?}", err)))
            }
            Err(err) => {
                let error_str = format!("{:?}", err);
                if error_str.contains("UnknownAccount") || error_str.contains("does not exist") {
                    Ok(false)
                } else {
                    Err(GatewayError::Connection(error_str))
                }
            }
        }
    }

    async fn create_account(
        &self,
        parent: &Identity,
        new_account_id: &AccountId,
        public_key: &PublicKey,
        initial_balance: NearToken,
    ) -> Result<(), GatewayError> {
        let outcome = Account::create_account(new_account_id.clone())
            .fund_myself(parent.account_id.clone(), initial_balance)
            .with_public_key(public_key.clone())
            .with_signer(parent.key.signer().clone())
            .send_to(&self.network)
            .await
            .map_err(send_error)?;

        outcome
            .into_result()
            .map_err(|failure| GatewayError::Rejected(format!("{:?}", failure)))?;
        Ok(())
    }

    async fn deploy_contract(
        &self,
        parent: &Identity,
        account_id: &AccountId,
        public_key: &PublicKey,
        initial_balance: NearToken,
        code: &[u8],
    ) -> Result<(), GatewayError> {
        let outcome = Transaction::construct(parent.account_id.clone(), account_id.clone())
            .add_actions(vec![
                Action::CreateAccount(CreateAccountAction {}),
                Action::Transfer(TransferAction {
                    deposit: initial_balance,
                }),
                Action::AddKey(Box::new(AddKeyAction {
                    public_key: public_key.clone(),
                    access_key: AccessKey {
                        nonce: 0.into(),
                        permission: AccessKeyPermission::FullAccess,
                    },
                })),
                Action::DeployContract(DeployContractAction {
                    code: code.to_vec(),
                }),
            ])
            .with_signer(parent.key.signer().clone())
            .send_to(&self.network)
            .await
            .map_err(send_error)?;

        outcome
            .into_result()
            .map_err(|failure| GatewayError::Rejected(format!("{:?}", failure)))?;
        Ok(())
    }

    async fn view(
        &self,
        contract_id: &AccountId,
        method: &str,
        args: Value,
    ) -> Result<Value, GatewayError> {
        let result: Data<Value> = Contract(contract_id.clone())
            .call_function(method, args)
            .read_only()
            .fetch_from(&self.network)
            .await
            .map_err(|err| {
                if unreachable_query(&err) {
                    GatewayError::Connection(format!("{:?}", err))
                } else {
                    GatewayError::ContractFailure(format!("{:?}", err))
                }
            })?;
        Ok(result.data)
    }

    async fn call(
        &self,
        caller: &Identity,
        contract_id: &AccountId,
        method: &str,
        args: Value,
        deposit: NearToken,
    ) -> Result<Option<Value>, GatewayError> {
        let outcome = Contract(contract_id.clone())
            .call_function(method, args)
            .transaction()
            .deposit(deposit)
            .gas(NearGas::from_tgas(CALL_GAS_TGAS))
            .with_signer(caller.account_id.clone(), caller.key.signer().clone())
            .send_to(&self.network)
            .await
            .map_err(send_error)?;

        // A transaction that finalized with a failed receipt is a contract-level error
        let success = outcome
            .into_result()
            .map_err(|failure| GatewayError::ContractFailure(format!("{:?}", failure)))?;
        let bytes = success
            .raw_bytes()
            .map_err(|err| GatewayError::ContractFailure(format!("{:?}", err)))?;
        decode_return(method, &bytes)
    }
}

/// Methods without a return value finalize with an empty payload. Anything
/// else must be JSON.
fn decode_return(method: &str, bytes: &[u8]) -> Result<Option<Value>, GatewayError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(bytes).map(Some).map_err(|err| {
        GatewayError::ContractFailure(format!("`{method}` returned a value that is not JSON: {err}"))
    })
}

/// Submission failures where the node was never reached are connection
/// errors; everything else is the ledger refusing the transaction.
fn send_error(err: ExecuteTransactionError) -> GatewayError {
    if unreachable_send(&err) {
        GatewayError::Connection(format!("{:?}", err))
    } else {
        GatewayError::Rejected(format!("{:?}", err))
    }
}

fn unreachable_send(err: &ExecuteTransactionError) -> bool {
    match err {
        ExecuteTransactionError::TransactionError(retry) => unreachable_retry(retry),
        ExecuteTransactionError::PreQueryError(query)
        | ExecuteTransactionError::ValidationError(ValidationError::QueryError(query)) => {
            unreachable_query(query)
        }
        ExecuteTransactionError::SignerError(SignerError::FetchNonceError(query)) => {
            unreachable_query(&**query)
        }
        _ => false,
    }
}

fn unreachable_query<E: fmt::Debug + Send + Sync>(err: &QueryError<E>) -> bool {
    matches!(err, QueryError::QueryError(retry) if unreachable_retry(&**retry))
}

fn unreachable_retry<E: fmt::Debug + Send + Sync>(err: &RetryError<SendRequestError<E>>) -> bool {
    match err {
        RetryError::NoRpcEndpoints => true,
        RetryError::RetriesExhausted(inner) | RetryError::Critical(inner) => {
            matches!(inner, SendRequestError::TransportError(_))
        }
        RetryError::InvalidApiKey(_) => false,
    }
}
