// Test Helpers
//
// `SimulatedLedger` stands in for the sandbox node: accounts with balances,
// the reference NEP-141 token (storage records, one-yocto transfers,
// init-once) and a constant-product AMM reacting to `ft_transfer_call`.
use amm_sandbox_scenario::{
    BalanceDistributionStage, ContractBinaries, GatewayError, Identity, KeyMaterial,
    LedgerGateway, NetworkProfile, ProvisioningPipeline, ScenarioContext, ScenarioError,
    ScenarioParams,
};
use async_trait::async_trait;
use near_api::{AccountId, NearToken};
use near_api_types::PublicKey;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::time::Duration;

#[allow(dead_code)]
pub const TOKEN_WASM: &[u8] = b"\0asm fungible_token";
#[allow(dead_code)]
pub const AMM_WASM: &[u8] = b"\0asm amm";

const MASTER_BALANCE: NearToken = NearToken::from_near(1_000);
const MIN_STORAGE_BALANCE: u128 = 1_250_000_000_000_000_000_000;
const ONE_YOCTO: u128 = 1;

#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    AccountCreated {
        account_id: AccountId,
    },
    Deployed {
        account_id: AccountId,
    },
    Called {
        caller: AccountId,
        contract: AccountId,
        method: String,
        args: Value,
    },
}

#[derive(Default)]
struct TokenState {
    initialized: bool,
    metadata: Value,
    storage: HashSet<AccountId>,
    balances: HashMap<AccountId, u128>,
}

impl TokenState {
    fn balance(&self, account_id: &AccountId) -> u128 {
        self.balances.get(account_id).copied().unwrap_or(0)
    }

    fn transfer(
        &mut self,
        sender: &AccountId,
        receiver: &AccountId,
        amount: u128,
    ) -> Result<(), GatewayError> {
        for account_id in [sender, receiver] {
            if !self.storage.contains(account_id) {
                return Err(failure(format!("The account {account_id} is not registered")));
            }
        }
        if sender == receiver {
            return Err(failure("Sender and receiver should be different"));
        }
        let available = self.balance(sender);
        if available < amount {
            return Err(failure("The account doesn't have enough balance"));
        }
        self.balances.insert(sender.clone(), available - amount);
        *self.balances.entry(receiver.clone()).or_insert(0) += amount;
        Ok(())
    }
}

#[derive(Default)]
struct AmmState {
    assets: Option<(AccountId, AccountId)>,
}

enum Code {
    Token(TokenState),
    Amm(AmmState),
    Unknown,
}

struct SimAccount {
    balance: u128,
    public_key: String,
    code: Option<Code>,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, SimAccount>,
    events: Vec<LedgerEvent>,
}

impl LedgerState {
    fn token(&self, contract: &AccountId) -> Option<&TokenState> {
        match self.accounts.get(contract)?.code.as_ref()? {
            Code::Token(token) => Some(token),
            _ => None,
        }
    }

    fn token_mut(&mut self, contract: &AccountId) -> Result<&mut TokenState, GatewayError> {
        match self
            .accounts
            .get_mut(contract)
            .and_then(|account| account.code.as_mut())
        {
            Some(Code::Token(token)) => Ok(token),
            _ => Err(failure(format!("{contract} does not host a token"))),
        }
    }

    // CreateAccount, Transfer, AddKey and an optional DeployContract as one
    // transaction. Every action is checked before any state changes.
    fn open_account(
        &mut self,
        parent: &Identity,
        account_id: &AccountId,
        public_key: String,
        initial_balance: NearToken,
        code: Option<&[u8]>,
    ) -> Result<(), GatewayError> {
        if self.accounts.contains_key(account_id) {
            return Err(GatewayError::Rejected(format!(
                "AccountAlreadyExists {{ account_id: {account_id} }}"
            )));
        }
        if !account_id.is_sub_account_of(&parent.account_id) {
            return Err(GatewayError::Rejected(format!(
                "CreateAccountNotAllowed {{ account_id: {account_id} }}"
            )));
        }
        let amount = initial_balance.as_yoctonear();
        let funds = self
            .accounts
            .get(&parent.account_id)
            .map(|funder| funder.balance)
            .ok_or_else(|| GatewayError::Rejected(format!("{} does not exist", parent.account_id)))?;
        if funds < amount {
            return Err(GatewayError::Rejected(format!(
                "NotEnoughBalance {{ signer_id: {} }}",
                parent.account_id
            )));
        }
        let code = match code {
            Some(bytes) if !bytes.starts_with(b"\0asm") => {
                return Err(GatewayError::Rejected(format!(
                    "CompilationError {{ account_id: {account_id} }}"
                )));
            }
            Some(TOKEN_WASM) => Some(Code::Token(TokenState::default())),
            Some(AMM_WASM) => Some(Code::Amm(AmmState::default())),
            Some(_) => Some(Code::Unknown),
            None => None,
        };

        if let Some(funder) = self.accounts.get_mut(&parent.account_id) {
            funder.balance -= amount;
        }
        let deployed = code.is_some();
        self.accounts.insert(
            account_id.clone(),
            SimAccount {
                balance: amount,
                public_key,
                code,
            },
        );
        self.events.push(LedgerEvent::AccountCreated {
            account_id: account_id.clone(),
        });
        if deployed {
            self.events.push(LedgerEvent::Deployed {
                account_id: account_id.clone(),
            });
        }
        Ok(())
    }

    fn amm_assets(&self, contract: &AccountId) -> Option<(AccountId, AccountId)> {
        match self.accounts.get(contract)?.code.as_ref()? {
            Code::Amm(amm) => amm.assets.clone(),
            _ => None,
        }
    }

    fn token_call(
        &mut self,
        caller: &AccountId,
        contract: &AccountId,
        method: &str,
        args: &Value,
        deposit: u128,
    ) -> Result<Option<Value>, GatewayError> {
        let token = self.token_mut(contract)?;
        if method == "new" {
            if token.initialized {
                return Err(failure("The contract has already been initialized"));
            }
            let owner = account_arg(args, "owner_id")?;
            let total_supply = amount_arg(args, "total_supply")?;
            token.initialized = true;
            token.metadata = args["metadata"].clone();
            token.storage.insert(owner.clone());
            token.balances.insert(owner, total_supply);
            return Ok(None);
        }
        if !token.initialized {
            return Err(failure("The contract is not initialized"));
        }

        match method {
            "storage_deposit" => {
                let account_id = match args.get("account_id") {
                    Some(Value::String(_)) => account_arg(args, "account_id")?,
                    _ => caller.clone(),
                };
                if !token.storage.contains(&account_id) && deposit < MIN_STORAGE_BALANCE {
                    return Err(failure(
                        "The attached deposit is less than the minimum storage balance",
                    ));
                }
                token.storage.insert(account_id);
                Ok(Some(storage_balance()))
            }
            "ft_transfer" => {
                require_one_yocto(deposit)?;
                let receiver = account_arg(args, "receiver_id")?;
                token.transfer(caller, &receiver, amount_arg(args, "amount")?)?;
                Ok(None)
            }
            "ft_transfer_call" => {
                require_one_yocto(deposit)?;
                let receiver = account_arg(args, "receiver_id")?;
                let amount = amount_arg(args, "amount")?;
                token.transfer(caller, &receiver, amount)?;
                let used = self.on_transfer(&receiver, contract, caller, amount)?;
                Ok(Some(json!(used.to_string())))
            }
            other => Err(failure(format!("MethodNotFound: {other}"))),
        }
    }

    // ft_on_transfer of the receiver followed by ft_resolve_transfer; returns the used amount
    fn on_transfer(
        &mut self,
        receiver: &AccountId,
        token_in: &AccountId,
        sender: &AccountId,
        amount: u128,
    ) -> Result<u128, GatewayError> {
        let Some((asset_a, asset_b)) = self.amm_assets(receiver) else {
            return Ok(amount);
        };
        let token_out = if *token_in == asset_a {
            asset_b
        } else if *token_in == asset_b {
            asset_a
        } else {
            return self.refund(token_in, receiver, sender, amount);
        };

        let (reserve_in, reserve_out) = match (self.token(token_in), self.token(&token_out)) {
            (Some(tin), Some(tout)) => (
                tin.balance(receiver).saturating_sub(amount),
                tout.balance(receiver),
            ),
            _ => return self.refund(token_in, receiver, sender, amount),
        };
        let amount_out = reserve_out * amount / (reserve_in + amount);
        if amount_out == 0 {
            return self.refund(token_in, receiver, sender, amount);
        }

        match self.token_mut(&token_out)?.transfer(receiver, sender, amount_out) {
            Ok(()) => Ok(amount),
            Err(_) => self.refund(token_in, receiver, sender, amount),
        }
    }

    fn refund(
        &mut self,
        token: &AccountId,
        from: &AccountId,
        to: &AccountId,
        amount: u128,
    ) -> Result<u128, GatewayError> {
        self.token_mut(token)?.transfer(from, to, amount)?;
        Ok(0)
    }

    fn amm_call(
        &mut self,
        contract: &AccountId,
        method: &str,
        args: &Value,
    ) -> Result<Option<Value>, GatewayError> {
        match method {
            "new" => {
                let asset_a = account_arg(args, "account_asset_a")?;
                let asset_b = account_arg(args, "account_asset_b")?;
                account_arg(args, "contract_owner")?;
                // The AMM fetches both tokens' metadata while initializing
                for asset in [&asset_a, &asset_b] {
                    if !self.token(asset).is_some_and(|token| token.initialized) {
                        return Err(failure(format!("failed to read metadata of {asset}")));
                    }
                }
                match self.accounts.get_mut(contract).and_then(|a| a.code.as_mut()) {
                    Some(Code::Amm(amm)) if amm.assets.is_some() => {
                        Err(failure("The contract has already been initialized"))
                    }
                    Some(Code::Amm(amm)) => {
                        amm.assets = Some((asset_a, asset_b));
                        Ok(None)
                    }
                    _ => Err(failure("CodeDoesNotExist")),
                }
            }
            other => Err(failure(format!("`{other}` is not simulated"))),
        }
    }
}

/// In-memory ledger implementing [`LedgerGateway`].
pub struct SimulatedLedger {
    network_id: String,
    state: Mutex<LedgerState>,
    latency: Duration,
    operations: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    stalled: Mutex<HashSet<String>>,
    failing: Mutex<Vec<(String, AccountId)>>,
    swaps_paused: AtomicBool,
}

#[allow(dead_code)]
impl SimulatedLedger {
    pub fn new(network_id: &str, master: &AccountId, master_key: &PublicKey) -> Self {
        let mut state = LedgerState::default();
        state.accounts.insert(
            master.clone(),
            SimAccount {
                balance: MASTER_BALANCE.as_yoctonear(),
                public_key: master_key.to_string(),
                code: None,
            },
        );
        Self {
            network_id: network_id.to_string(),
            state: Mutex::new(state),
            latency: Duration::from_millis(2),
            operations: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            stalled: Mutex::new(HashSet::new()),
            failing: Mutex::new(Vec::new()),
            swaps_paused: AtomicBool::new(false),
        }
    }

    /// Adds an account directly, as if someone else had created it earlier.
    pub fn insert_account(&self, account_id: &AccountId) {
        self.state.lock().unwrap().accounts.insert(
            account_id.clone(),
            SimAccount {
                balance: NearToken::from_near(1).as_yoctonear(),
                public_key: String::new(),
                code: None,
            },
        );
    }

    /// Operations named `op` never finalize. `op` is a gateway method
    /// (`create_account`, `deploy_contract`) or a contract method name.
    pub fn stall(&self, op: &str) {
        self.stalled.lock().unwrap().insert(op.to_string());
    }

    /// Calls of `method` fail inside the contract when `account_id` is the
    /// contract itself or the account the call is about.
    pub fn fail_call(&self, method: &str, account_id: &AccountId) {
        self.failing
            .lock()
            .unwrap()
            .push((method.to_string(), account_id.clone()));
    }

    /// The AMM keeps incoming tokens without paying anything out.
    pub fn pause_swaps(&self) {
        self.swaps_paused.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn calls_of(&self, contract: &AccountId, method: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LedgerEvent::Called {
                    contract: called,
                    method: name,
                    args,
                    ..
                } if called == *contract && name == method => Some(args),
                _ => None,
            })
            .collect()
    }

    pub fn deployments(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, LedgerEvent::Deployed { .. }))
            .count()
    }

    pub fn account_exists_now(&self, account_id: &AccountId) -> bool {
        self.state.lock().unwrap().accounts.contains_key(account_id)
    }

    pub fn public_key_of(&self, account_id: &AccountId) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(account_id)
            .map(|account| account.public_key.clone())
    }

    pub fn token_balance(&self, token: &AccountId, account_id: &AccountId) -> u128 {
        self.state
            .lock()
            .unwrap()
            .token(token)
            .map(|state| state.balance(account_id))
            .unwrap_or(0)
    }

    pub fn has_storage(&self, token: &AccountId, account_id: &AccountId) -> bool {
        self.state
            .lock()
            .unwrap()
            .token(token)
            .is_some_and(|state| state.storage.contains(account_id))
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn settle<T>(
        &self,
        op: &str,
        apply: impl FnOnce(&mut LedgerState) -> Result<T, GatewayError> + Send,
    ) -> Result<T, GatewayError> {
        let stalled = self.stalled.lock().unwrap().contains(op);
        if stalled {
            std::future::pending::<()>().await;
        }

        let sequence = self.operations.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Uneven latency so concurrent operations finish out of submission order
        tokio::time::sleep(self.latency * (sequence % 3 + 1) as u32).await;

        let result = apply(&mut self.state.lock().unwrap());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn injected_failure(&self, contract_id: &AccountId, method: &str, args: &Value) -> bool {
        let target = args
            .get("receiver_id")
            .or_else(|| args.get("account_id"))
            .and_then(Value::as_str);
        self.failing.lock().unwrap().iter().any(|(name, account)| {
            name == method && (account == contract_id || Some(account.as_str()) == target)
        })
    }
}

#[async_trait]
impl LedgerGateway for SimulatedLedger {
    fn network_id(&self) -> &str {
        &self.network_id
    }

    async fn account_exists(&self, account_id: &AccountId) -> Result<bool, GatewayError> {
        self.settle("view_account", |state| {
            Ok(state.accounts.contains_key(account_id))
        })
        .await
    }

    async fn create_account(
        &self,
        parent: &Identity,
        new_account_id: &AccountId,
        public_key: &PublicKey,
        initial_balance: NearToken,
    ) -> Result<(), GatewayError> {
        let public_key = public_key.to_string();
        self.settle("create_account", move |state| {
            state.open_account(parent, new_account_id, public_key, initial_balance, None)
        })
        .await
    }

    async fn deploy_contract(
        &self,
        parent: &Identity,
        account_id: &AccountId,
        public_key: &PublicKey,
        initial_balance: NearToken,
        code: &[u8],
    ) -> Result<(), GatewayError> {
        let public_key = public_key.to_string();
        self.settle("deploy_contract", move |state| {
            state.open_account(parent, account_id, public_key, initial_balance, Some(code))
        })
        .await
    }

    async fn view(
        &self,
        contract_id: &AccountId,
        method: &str,
        args: Value,
    ) -> Result<Value, GatewayError> {
        self.settle(method, |state| {
            let token = state
                .token(contract_id)
                .ok_or_else(|| failure(format!("{contract_id} has no view `{method}`")))?;
            if !token.initialized {
                return Err(failure("The contract is not initialized"));
            }
            match method {
                "ft_balance_of" => {
                    let account_id = account_arg(&args, "account_id")?;
                    Ok(json!(token.balance(&account_id).to_string()))
                }
                "ft_metadata" => Ok(token.metadata.clone()),
                "storage_balance_of" => {
                    let account_id = account_arg(&args, "account_id")?;
                    if token.storage.contains(&account_id) {
                        Ok(storage_balance())
                    } else {
                        Ok(Value::Null)
                    }
                }
                other => Err(failure(format!("MethodNotFound: {other}"))),
            }
        })
        .await
    }

    async fn call(
        &self,
        caller: &Identity,
        contract_id: &AccountId,
        method: &str,
        args: Value,
        deposit: NearToken,
    ) -> Result<Option<Value>, GatewayError> {
        let injected = self.injected_failure(contract_id, method, &args);
        let swaps_paused = self.swaps_paused.load(Ordering::SeqCst);
        self.settle(method, move |state| {
            if !state.accounts.contains_key(&caller.account_id) {
                return Err(GatewayError::Rejected(format!(
                    "signer {} does not exist",
                    caller.account_id
                )));
            }
            state.events.push(LedgerEvent::Called {
                caller: caller.account_id.clone(),
                contract: contract_id.clone(),
                method: method.to_string(),
                args: args.clone(),
            });
            if injected {
                return Err(failure(format!("injected failure in `{method}`")));
            }

            let is_amm = matches!(
                state.accounts.get(contract_id).and_then(|a| a.code.as_ref()),
                Some(Code::Amm(_))
            );
            if is_amm {
                return state.amm_call(contract_id, method, &args);
            }
            if swaps_paused && method == "ft_transfer_call" {
                // Tokens land on the AMM, nothing comes back
                require_one_yocto(deposit.as_yoctonear())?;
                let receiver = account_arg(&args, "receiver_id")?;
                let amount = amount_arg(&args, "amount")?;
                state
                    .token_mut(contract_id)?
                    .transfer(&caller.account_id, &receiver, amount)?;
                return Ok(Some(json!(amount.to_string())));
            }
            state.token_call(
                &caller.account_id,
                contract_id,
                method,
                &args,
                deposit.as_yoctonear(),
            )
        })
        .await
    }
}

fn failure(detail: impl Into<String>) -> GatewayError {
    GatewayError::ContractFailure(format!("Smart contract panicked: {}", detail.into()))
}

fn require_one_yocto(deposit: u128) -> Result<(), GatewayError> {
    if deposit != ONE_YOCTO {
        return Err(failure("Requires attached deposit of exactly 1 yoctoNEAR"));
    }
    Ok(())
}

fn storage_balance() -> Value {
    json!({ "total": MIN_STORAGE_BALANCE.to_string(), "available": "0" })
}

fn account_arg(args: &Value, key: &str) -> Result<AccountId, GatewayError> {
    args.get(key)
        .and_then(Value::as_str)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| failure(format!("missing or invalid `{key}`")))
}

fn amount_arg(args: &Value, key: &str) -> Result<u128, GatewayError> {
    args.get(key)
        .and_then(Value::as_str)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| failure(format!("missing or invalid `{key}`")))
}

/// Simulated ledger plus a profile, params and key file that match it.
pub struct Fixture {
    pub ledger: Arc<SimulatedLedger>,
    pub profile: NetworkProfile,
    pub params: ScenarioParams,
    pub binaries: ContractBinaries,
    _key_dir: TempDir,
}

#[allow(dead_code)]
pub fn fixture() -> Fixture {
    let (key, secret_key) = KeyMaterial::generate().unwrap();
    let key_dir = tempfile::tempdir().unwrap();
    let key_path = key_dir.path().join("validator_key.json");
    std::fs::write(
        &key_path,
        json!({
            "account_id": "test.near",
            "public_key": key.public_key().to_string(),
            "secret_key": secret_key.to_string(),
        })
        .to_string(),
    )
    .unwrap();

    let profile = NetworkProfile::rooted_at(
        "sandbox",
        "http://localhost:3030",
        "test.near".parse().unwrap(),
        &key_path,
        &["alice", "bob"],
    )
    .unwrap();
    let params = ScenarioParams {
        finality_timeout: Duration::from_secs(5),
        ..ScenarioParams::default()
    };
    let ledger = Arc::new(SimulatedLedger::new(
        &profile.network_id,
        &profile.master_account,
        key.public_key(),
    ));

    Fixture {
        ledger,
        profile,
        params,
        binaries: ContractBinaries {
            token: TOKEN_WASM.to_vec(),
            amm: AMM_WASM.to_vec(),
        },
        _key_dir: key_dir,
    }
}

#[allow(dead_code)]
impl Fixture {
    pub fn gateway(&self) -> Arc<dyn LedgerGateway> {
        self.ledger.clone()
    }

    pub async fn connect(&self) -> Result<ScenarioContext, ScenarioError> {
        ProvisioningPipeline::connect_and_load_master(
            self.gateway(),
            self.profile.clone(),
            self.params.clone(),
        )
        .await
    }

    pub async fn provision(&self) -> Result<ScenarioContext, ScenarioError> {
        ProvisioningPipeline::provision(
            self.gateway(),
            self.profile.clone(),
            self.params.clone(),
            &self.binaries,
        )
        .await
    }

    /// Provisioned and distributed context. Panics if either stage fails.
    pub async fn distributed(&self) -> ScenarioContext {
        let mut ctx = self.provision().await.unwrap();
        BalanceDistributionStage::run(&mut ctx).await.unwrap();
        ctx
    }

    pub fn token_a(&self) -> &AccountId {
        &self.profile.token_a_account
    }

    pub fn token_b(&self) -> &AccountId {
        &self.profile.token_b_account
    }
}
