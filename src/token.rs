use near_api::{AccountId, NearToken};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::TokenSpec;
use crate::contracts::{ChangeOp, ContractHandle, ContractKind, ViewOp};
use crate::error::CallError;

pub const FT_METADATA_SPEC: &str = "ft-1.0.0";

// NEP-141 transfers require exactly one attached yoctoNEAR
const ONE_YOCTO: NearToken = NearToken::from_yoctonear(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FungibleTokenMetadata {
    pub spec: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl From<&TokenSpec> for FungibleTokenMetadata {
    fn from(spec: &TokenSpec) -> Self {
        Self {
            spec: FT_METADATA_SPEC.to_string(),
            name: spec.name.clone(),
            symbol: spec.symbol.clone(),
            decimals: spec.decimals,
            icon: None,
            reference: None,
        }
    }
}

/// Typed NEP-141 operations over a fungible token handle.
pub struct TokenContract<'g> {
    handle: ContractHandle<'g>,
}

impl<'g> TokenContract<'g> {
    pub fn new(handle: ContractHandle<'g>) -> Result<Self, CallError> {
        expect_kind(&handle, ContractKind::FungibleToken)?;
        Ok(Self { handle })
    }

    pub fn account_id(&self) -> &AccountId {
        self.handle.target()
    }

    // Mints the whole supply to `owner`
    pub async fn init(&self, owner: &AccountId, spec: &TokenSpec) -> Result<(), CallError> {
        self.handle
            .invoke_change(
                ChangeOp::New,
                json!({
                    "owner_id": owner,
                    "total_supply": spec.total_supply.to_string(),
                    "metadata": FungibleTokenMetadata::from(spec),
                }),
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn metadata(&self) -> Result<FungibleTokenMetadata, CallError> {
        let value = self.handle.invoke_view(ViewOp::FtMetadata, json!({})).await?;
        serde_json::from_value(value).map_err(|err| CallError::Malformed {
            op: ViewOp::FtMetadata.method_name(),
            detail: err.to_string(),
        })
    }

    pub async fn balance_of(&self, account_id: &AccountId) -> Result<u128, CallError> {
        let value = self
            .handle
            .invoke_view(ViewOp::FtBalanceOf, json!({ "account_id": account_id }))
            .await?;
        parse_amount(ViewOp::FtBalanceOf.method_name(), &value)
    }

    /// Whether `account_id` has an open storage record on this token.
    pub async fn has_storage(&self, account_id: &AccountId) -> Result<bool, CallError> {
        let value = self
            .handle
            .invoke_view(
                ViewOp::StorageBalanceOf,
                json!({ "account_id": account_id }),
            )
            .await?;
        Ok(!value.is_null())
    }

    pub async fn storage_deposit(
        &self,
        account_id: &AccountId,
        deposit: NearToken,
    ) -> Result<(), CallError> {
        self.handle
            .invoke_change(
                ChangeOp::StorageDeposit,
                json!({ "account_id": account_id }),
                Some(deposit),
            )
            .await?;
        Ok(())
    }

    pub async fn transfer(&self, receiver_id: &AccountId, amount: u128) -> Result<(), CallError> {
        self.handle
            .invoke_change(
                ChangeOp::FtTransfer,
                json!({
                    "receiver_id": receiver_id,
                    "amount": amount.to_string(),
                }),
                Some(ONE_YOCTO),
            )
            .await?;
        Ok(())
    }

    /// Transfer that invokes `ft_on_transfer` on the receiver. Returns the
    /// amount the token contract reports as used, when it reports one.
    pub async fn transfer_call(
        &self,
        receiver_id: &AccountId,
        amount: u128,
        msg: &str,
    ) -> Result<Option<u128>, CallError> {
        let returned = self
            .handle
            .invoke_change(
                ChangeOp::FtTransferCall,
                json!({
                    "receiver_id": receiver_id,
                    "amount": amount.to_string(),
                    "msg": msg,
                }),
                Some(ONE_YOCTO),
            )
            .await?;
        returned
            .map(|value| parse_amount(ChangeOp::FtTransferCall.method_name(), &value))
            .transpose()
    }
}

/// Typed operations over an AMM handle.
pub struct AmmContract<'g> {
    handle: ContractHandle<'g>,
}

impl<'g> AmmContract<'g> {
    pub fn new(handle: ContractHandle<'g>) -> Result<Self, CallError> {
        expect_kind(&handle, ContractKind::Amm)?;
        Ok(Self { handle })
    }

    pub fn account_id(&self) -> &AccountId {
        self.handle.target()
    }

    // The AMM reads both tokens' metadata while initializing, so they must be initialized first
    pub async fn init(
        &self,
        owner: &AccountId,
        asset_a: &AccountId,
        asset_b: &AccountId,
    ) -> Result<(), CallError> {
        self.handle
            .invoke_change(
                ChangeOp::New,
                json!({
                    "contract_owner": owner,
                    "account_asset_a": asset_a,
                    "account_asset_b": asset_b,
                }),
                None,
            )
            .await?;
        Ok(())
    }
}

fn expect_kind(handle: &ContractHandle<'_>, kind: ContractKind) -> Result<(), CallError> {
    let hosted = handle.descriptor().kind();
    if hosted != kind {
        return Err(CallError::KindMismatch {
            descriptor: kind,
            target: handle.target().to_string(),
            hosted,
        });
    }
    Ok(())
}

/// NEP-141 amounts travel as decimal strings; plain numbers are accepted too.
pub fn parse_amount(op: &'static str, value: &Value) -> Result<u128, CallError> {
    let parsed = match value {
        Value::String(text) => text.parse::<u128>().ok(),
        Value::Number(number) => number.as_u64().map(u128::from),
        _ => None,
    };
    parsed.ok_or_else(|| CallError::Malformed {
        op,
        detail: format!("expected an amount, got {value}"),
    })
}
