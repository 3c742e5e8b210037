//! Terminal errors of the engine.
//!
//! Each component owns a narrow error type; [`EngineError`] is the union that
//! public operations return. Every variant aborts the request with no state
//! change left behind.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::host::LedgerError;
use crate::nonce::ReplayError;
use crate::relayer::RegistryError;
use crate::signature::SignatureError;
use crate::wallet::DeploymentError;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Caller is not an authorized relayer or not the administrator.
    #[error("{caller} is not authorized to {action}")]
    Unauthorized { caller: Address, action: &'static str },
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("engine is paused")]
    Paused,
    #[error("reentrant call rejected")]
    Reentrancy,
    #[error("wallet for {principal} is already deployed at {wallet}")]
    AlreadyDeployed { principal: Address, wallet: Address },
    #[error("wallet for {0} is not deployed")]
    NotDeployed(Address),
    #[error("insufficient funds: required {required}, provided {provided}")]
    InsufficientFunds { required: U256, provided: U256 },
    /// A forwarded call reverted. `leg` is the zero-based batch position, 0 for single calls.
    #[error("call {leg} to {target} failed: {source}")]
    Execution {
        leg: usize,
        target: Address,
        #[source]
        source: LedgerError,
    },
    #[error(transparent)]
    Deployment(DeploymentError),
    #[error("fee settlement failed: {0}")]
    FeeSettlement(#[source] LedgerError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// Host failure outside of forwarding and fee settlement, such as funding intake.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Stable category of an [`EngineError`], used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authorization,
    Replay,
    Signature,
    Paused,
    Reentrancy,
    AlreadyDeployed,
    NotDeployed,
    InsufficientFunds,
    Execution,
    Deployment,
    FeeSettlement,
    Registry,
    InvalidRequest,
    InvalidState,
    Ledger,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Unauthorized { .. } => ErrorKind::Authorization,
            EngineError::Replay(_) => ErrorKind::Replay,
            EngineError::Signature(_) => ErrorKind::Signature,
            EngineError::Paused => ErrorKind::Paused,
            EngineError::Reentrancy => ErrorKind::Reentrancy,
            EngineError::AlreadyDeployed { .. } => ErrorKind::AlreadyDeployed,
            EngineError::NotDeployed(_) => ErrorKind::NotDeployed,
            EngineError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            EngineError::Execution { .. } => ErrorKind::Execution,
            EngineError::Deployment(_) => ErrorKind::Deployment,
            EngineError::FeeSettlement(_) => ErrorKind::FeeSettlement,
            EngineError::Registry(_) => ErrorKind::Registry,
            EngineError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            EngineError::InvalidState(_) => ErrorKind::InvalidState,
            EngineError::Ledger(_) => ErrorKind::Ledger,
        }
    }
}

impl From<DeploymentError> for EngineError {
    fn from(value: DeploymentError) -> Self {
        match value {
            DeploymentError::AlreadyDeployed { principal, wallet } => {
                EngineError::AlreadyDeployed { principal, wallet }
            }
            other => EngineError::Deployment(other),
        }
    }
}
