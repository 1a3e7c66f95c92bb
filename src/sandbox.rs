use near_api::AccountId;
use near_sandbox::{GenesisAccount, Sandbox};
use serde_json::json;
use tempfile::TempDir;

use crate::config::{DEFAULT_NETWORK_ID, DEFAULT_USERS, NetworkProfile, parse_account_id};
use crate::error::ConfigError;

/// A disposable local sandbox node. The node stops when this is dropped.
pub struct LocalSandbox {
    sandbox: Sandbox,
    // holds the key file referenced by `profile.key_path`
    _key_dir: TempDir,
    pub profile: NetworkProfile,
}

impl LocalSandbox {
    /// Starts a node and builds a profile rooted at its genesis account, with
    /// the genesis key written to a key file in the sandbox key format.
    pub async fn start() -> Result<Self, ConfigError> {
        let sandbox = Sandbox::start_sandbox()
            .await
            .map_err(|err| ConfigError::Sandbox(err.to_string()))?;

        let genesis = GenesisAccount::default();
        let master: AccountId = parse_account_id(&genesis.account_id.to_string())?;

        let key_dir = tempfile::tempdir().map_err(|err| ConfigError::Sandbox(err.to_string()))?;
        let key_path = key_dir.path().join("validator_key.json");
        let key_file = json!({
            "account_id": master,
            "public_key": genesis.public_key.to_string(),
            "secret_key": genesis.private_key.to_string(),
        });
        std::fs::write(&key_path, key_file.to_string()).map_err(|source| {
            ConfigError::KeyFileIo {
                path: key_path.clone(),
                source,
            }
        })?;

        let profile = NetworkProfile::rooted_at(
            DEFAULT_NETWORK_ID,
            &sandbox.rpc_addr,
            master,
            &key_path,
            &DEFAULT_USERS,
        )?;
        tracing::info!(rpc = %sandbox.rpc_addr, master = %profile.master_account, "local sandbox started");

        Ok(Self {
            sandbox,
            _key_dir: key_dir,
            profile,
        })
    }

    pub fn rpc_addr(&self) -> &str {
        &self.sandbox.rpc_addr
    }
}
