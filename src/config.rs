use std::path::{Path, PathBuf};
use std::time::Duration;

use near_api::{AccountId, NearToken};

use crate::error::ConfigError;

pub const DEFAULT_NETWORK_ID: &str = "sandbox";
pub const DEFAULT_RPC_ENDPOINT: &str = "http://localhost:3030";
pub const DEFAULT_MASTER_ACCOUNT: &str = "test.near";
pub const DEFAULT_KEY_PATH: &str = "/tmp/near-sandbox/validator_key.json";
pub const DEFAULT_USERS: [&str; 2] = ["alice", "bob"];

pub const DEFAULT_TOKEN_WASM_PATH: &str = "res/fungible_token.wasm";
pub const DEFAULT_AMM_WASM_PATH: &str = "res/amm.wasm";

// 10 NEAR for every created account and contract host
pub const ACCOUNT_FUNDING: NearToken = NearToken::from_near(10);
// NEP-145 minimum for the reference fungible token
pub const STORAGE_DEPOSIT: NearToken = NearToken::from_yoctonear(1_250_000_000_000_000_000_000);

/// Where the scenario runs and which accounts it uses. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    pub network_id: String,
    pub rpc_endpoint: String,
    pub master_account: AccountId,
    pub admin_account: AccountId,
    pub amm_account: AccountId,
    pub token_a_account: AccountId,
    pub token_b_account: AccountId,
    pub key_path: PathBuf,
    pub user_accounts: Vec<AccountId>,
    /// Every created account reuses the master key. This is a test-scenario
    /// simplification and the only supported mode.
    pub shared_test_key: bool,
}

impl NetworkProfile {
    /// Resolves the profile named by `NEAR_ENV`.
    pub fn from_env_name(env: &str) -> Result<Self, ConfigError> {
        match env {
            "sandbox" | "local" => Self::rooted_at(
                DEFAULT_NETWORK_ID,
                DEFAULT_RPC_ENDPOINT,
                parse_account_id(DEFAULT_MASTER_ACCOUNT)?,
                DEFAULT_KEY_PATH,
                &DEFAULT_USERS,
            ),
            other => Err(ConfigError::UnknownProfile(other.to_string())),
        }
    }

    /// Builds a profile whose admin, AMM, token and user accounts are all
    /// sub-accounts of `master_account`.
    pub fn rooted_at(
        network_id: &str,
        rpc_endpoint: &str,
        master_account: AccountId,
        key_path: impl AsRef<Path>,
        user_prefixes: &[&str],
    ) -> Result<Self, ConfigError> {
        let user_accounts = user_prefixes
            .iter()
            .map(|prefix| sub_account(prefix, &master_account))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            network_id: network_id.to_string(),
            rpc_endpoint: rpc_endpoint.to_string(),
            admin_account: sub_account("admin", &master_account)?,
            amm_account: sub_account("amm", &master_account)?,
            token_a_account: sub_account("token-a", &master_account)?,
            token_b_account: sub_account("token-b", &master_account)?,
            master_account,
            key_path: key_path.as_ref().to_path_buf(),
            user_accounts,
            shared_test_key: true,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.shared_test_key {
            return Err(ConfigError::SharedKeyRequired);
        }
        if self.user_accounts.is_empty() {
            return Err(ConfigError::NoUsers);
        }
        Ok(())
    }

    /// Accounts that receive token balances: the users in configured order, then the AMM.
    pub fn participants(&self) -> Vec<AccountId> {
        let mut participants = self.user_accounts.clone();
        participants.push(self.amm_account.clone());
        participants
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpec {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: u128,
    /// Amount the admin transfers to every participant.
    pub initial_distribution: u128,
}

impl TokenSpec {
    pub fn token_a() -> Self {
        Self {
            name: "Token A".to_string(),
            symbol: "TOKA".to_string(),
            decimals: 8,
            total_supply: 10_000_000_000_000,
            initial_distribution: 1_000_000,
        }
    }

    pub fn token_b() -> Self {
        Self {
            name: "Token B".to_string(),
            symbol: "TOKB".to_string(),
            decimals: 6,
            total_supply: 1_000_000_000_000_000,
            initial_distribution: 5_000_000,
        }
    }
}

/// Scenario constants: token setup, amounts, binaries and the finality bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioParams {
    pub token_a: TokenSpec,
    pub token_b: TokenSpec,
    /// Token A amount the first user sends into the AMM.
    pub swap_amount: u128,
    pub account_funding: NearToken,
    pub storage_deposit: NearToken,
    pub token_wasm_path: PathBuf,
    pub amm_wasm_path: PathBuf,
    /// Upper bound on every wait for a ledger operation to finalize.
    pub finality_timeout: Duration,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            token_a: TokenSpec::token_a(),
            token_b: TokenSpec::token_b(),
            swap_amount: 5_000,
            account_funding: ACCOUNT_FUNDING,
            storage_deposit: STORAGE_DEPOSIT,
            token_wasm_path: PathBuf::from(DEFAULT_TOKEN_WASM_PATH),
            amm_wasm_path: PathBuf::from(DEFAULT_AMM_WASM_PATH),
            finality_timeout: Duration::from_secs(60),
        }
    }
}

/// Contract code uploaded by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractBinaries {
    pub token: Vec<u8>,
    pub amm: Vec<u8>,
}

impl ContractBinaries {
    pub fn load(params: &ScenarioParams) -> Result<Self, ConfigError> {
        Ok(Self {
            token: read_binary(&params.token_wasm_path)?,
            amm: read_binary(&params.amm_wasm_path)?,
        })
    }
}

fn read_binary(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Binary {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_account_id(value: &str) -> Result<AccountId, ConfigError> {
    value
        .parse::<AccountId>()
        .map_err(|err| ConfigError::InvalidAccountId {
            value: value.to_string(),
            reason: err.to_string(),
        })
}

fn sub_account(prefix: &str, parent: &AccountId) -> Result<AccountId, ConfigError> {
    parse_account_id(&format!("{prefix}.{parent}"))
}
