use std::fmt;
use std::time::Duration;

use near_api::{AccountId, NearToken};
use serde_json::Value;

use crate::error::CallError;
use crate::keys::Identity;
use crate::ledger::{LedgerGateway, within};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractKind {
    FungibleToken,
    Amm,
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractKind::FungibleToken => f.write_str("fungible token"),
            ContractKind::Amm => f.write_str("AMM"),
        }
    }
}

/// Read-only contract methods the scenario knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOp {
    FtMetadata,
    FtBalanceOf,
    StorageBalanceOf,
}

impl ViewOp {
    pub fn method_name(self) -> &'static str {
        match self {
            ViewOp::FtMetadata => "ft_metadata",
            ViewOp::FtBalanceOf => "ft_balance_of",
            ViewOp::StorageBalanceOf => "storage_balance_of",
        }
    }
}

/// State-changing contract methods the scenario knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    New,
    StorageDeposit,
    FtTransfer,
    FtTransferCall,
    Swap,
    Deposit,
}

impl ChangeOp {
    pub fn method_name(self) -> &'static str {
        match self {
            ChangeOp::New => "new",
            ChangeOp::StorageDeposit => "storage_deposit",
            ChangeOp::FtTransfer => "ft_transfer",
            ChangeOp::FtTransferCall => "ft_transfer_call",
            ChangeOp::Swap => "swap",
            ChangeOp::Deposit => "deposit",
        }
    }
}

/// Closed declaration of what a handle may invoke on one kind of contract.
#[derive(Debug, PartialEq, Eq)]
pub struct ContractDescriptor {
    kind: ContractKind,
    views: &'static [ViewOp],
    changes: &'static [ChangeOp],
}

pub static FUNGIBLE_TOKEN: ContractDescriptor = ContractDescriptor {
    kind: ContractKind::FungibleToken,
    views: &[ViewOp::FtMetadata, ViewOp::FtBalanceOf, ViewOp::StorageBalanceOf],
    changes: &[
        ChangeOp::New,
        ChangeOp::StorageDeposit,
        ChangeOp::FtTransfer,
        ChangeOp::FtTransferCall,
    ],
};

pub static AMM: ContractDescriptor = ContractDescriptor {
    kind: ContractKind::Amm,
    views: &[],
    changes: &[ChangeOp::New, ChangeOp::Swap, ChangeOp::Deposit],
};

impl ContractDescriptor {
    pub fn for_kind(kind: ContractKind) -> &'static ContractDescriptor {
        match kind {
            ContractKind::FungibleToken => &FUNGIBLE_TOKEN,
            ContractKind::Amm => &AMM,
        }
    }

    pub fn kind(&self) -> ContractKind {
        self.kind
    }

    pub fn declares_view(&self, op: ViewOp) -> bool {
        self.views.contains(&op)
    }

    pub fn declares_change(&self, op: ChangeOp) -> bool {
        self.changes.contains(&op)
    }
}

/// An account hosting deployed contract code of a known kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedContractRef {
    pub account_id: AccountId,
    pub kind: ContractKind,
}

/// Caller identity bound to one deployed contract and its descriptor.
pub struct ContractHandle<'g> {
    gateway: &'g dyn LedgerGateway,
    caller: Identity,
    target: AccountId,
    descriptor: &'static ContractDescriptor,
    timeout: Duration,
}

impl<'g> ContractHandle<'g> {
    /// Fails if the descriptor does not describe the kind of contract the target hosts.
    pub fn new(
        gateway: &'g dyn LedgerGateway,
        caller: Identity,
        target: &DeployedContractRef,
        descriptor: &'static ContractDescriptor,
        timeout: Duration,
    ) -> Result<Self, CallError> {
        if descriptor.kind != target.kind {
            return Err(CallError::KindMismatch {
                descriptor: descriptor.kind,
                target: target.account_id.to_string(),
                hosted: target.kind,
            });
        }
        Ok(Self {
            gateway,
            caller,
            target: target.account_id.clone(),
            descriptor,
            timeout,
        })
    }

    pub fn caller(&self) -> &AccountId {
        &self.caller.account_id
    }

    pub fn target(&self) -> &AccountId {
        &self.target
    }

    pub fn descriptor(&self) -> &'static ContractDescriptor {
        self.descriptor
    }

    pub async fn invoke_view(&self, op: ViewOp, args: Value) -> Result<Value, CallError> {
        let method = op.method_name();
        if !self.descriptor.declares_view(op) {
            return Err(CallError::Undeclared {
                op: method,
                kind: self.descriptor.kind,
            });
        }
        tracing::debug!(contract = %self.target, method, "view");

        let value = within(
            self.timeout,
            format!("view {method} on {}", self.target),
            self.gateway.view(&self.target, method, args),
        )
        .await?;
        Ok(value)
    }

    pub async fn invoke_change(
        &self,
        op: ChangeOp,
        args: Value,
        attached_deposit: Option<NearToken>,
    ) -> Result<Option<Value>, CallError> {
        let method = op.method_name();
        if !self.descriptor.declares_change(op) {
            return Err(CallError::Undeclared {
                op: method,
                kind: self.descriptor.kind,
            });
        }
        let deposit = attached_deposit.unwrap_or(NearToken::from_yoctonear(0));
        tracing::debug!(
            contract = %self.target,
            caller = %self.caller.account_id,
            method,
            deposit = %deposit,
            "call"
        );

        let value = within(
            self.timeout,
            format!("{method} on {} by {}", self.target, self.caller.account_id),
            self.gateway
                .call(&self.caller, &self.target, method, args, deposit),
        )
        .await?;
        Ok(value)
    }
}
