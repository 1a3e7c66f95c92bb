use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use near_api::{AccountId, Signer, signer};
use near_api_types::{PublicKey, SecretKey};
use serde::Deserialize;

use crate::error::ConfigError;

/// Signing key shared by every account the scenario creates.
#[derive(Clone)]
pub struct KeyMaterial {
    signer: Arc<Signer>,
    public_key: PublicKey,
}

impl KeyMaterial {
    pub fn from_secret_key(secret_key: SecretKey) -> Result<Self, ConfigError> {
        let public_key = secret_key.public_key();
        let signer = Signer::from_secret_key(secret_key)
            .map_err(|err| ConfigError::KeyMaterial(err.to_string()))?;
        Ok(Self { signer, public_key })
    }

    /// Fresh random key. Used when a test needs a master key that is not on disk yet.
    pub fn generate() -> Result<(Self, SecretKey), ConfigError> {
        let secret_key =
            signer::generate_secret_key().map_err(|err| ConfigError::KeyMaterial(err.to_string()))?;
        Ok((Self::from_secret_key(secret_key.clone())?, secret_key))
    }

    pub fn signer(&self) -> &Arc<Signer> {
        &self.signer
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_key", &self.public_key.to_string())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub account_id: AccountId,
    pub key: KeyMaterial,
}

impl Identity {
    pub fn new(account_id: AccountId, key: KeyMaterial) -> Self {
        Self { account_id, key }
    }
}

// validator_key.json written by the sandbox uses `secret_key`, older tooling `private_key`
#[derive(Deserialize)]
struct KeyFile {
    secret_key: Option<String>,
    private_key: Option<String>,
}

/// Reads the master secret key from a sandbox key file.
pub fn load_master_key(path: &Path) -> Result<KeyMaterial, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::KeyFileIo {
        path: path.to_path_buf(),
        source,
    })?;
    let format_error = |reason: String| ConfigError::KeyFileFormat {
        path: path.to_path_buf(),
        reason,
    };

    let key_file: KeyFile = serde_json::from_str(&raw).map_err(|err| format_error(err.to_string()))?;
    let encoded = key_file
        .secret_key
        .or(key_file.private_key)
        .ok_or_else(|| format_error("missing `secret_key` or `private_key` field".to_string()))?;
    let secret_key: SecretKey = encoded
        .parse()
        .map_err(|err: <SecretKey as std::str::FromStr>::Err| format_error(err.to_string()))?;

    KeyMaterial::from_secret_key(secret_key)
}

/// Local registry of signing keys, keyed by (network id, account id).
#[derive(Debug, Default)]
pub struct KeyStore {
    keys: HashMap<(String, AccountId), KeyMaterial>,
}

impl KeyStore {
    pub fn insert(&mut self, network_id: &str, account_id: AccountId, key: KeyMaterial) {
        self.keys.insert((network_id.to_string(), account_id), key);
    }

    pub fn identity(&self, network_id: &str, account_id: &AccountId) -> Option<Identity> {
        self.keys
            .get(&(network_id.to_string(), account_id.clone()))
            .map(|key| Identity::new(account_id.clone(), key.clone()))
    }

    pub fn contains(&self, network_id: &str, account_id: &AccountId) -> bool {
        self.keys
            .contains_key(&(network_id.to_string(), account_id.clone()))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
