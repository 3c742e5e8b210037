//! Observable outcomes of engine operations.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::types::{decimal_u256, decimal_u256_vec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    #[serde(rename_all = "camelCase")]
    WalletDeployed { principal: Address, wallet: Address },
    #[serde(rename_all = "camelCase")]
    MetaTransactionExecuted {
        principal: Address,
        relayer: Address,
        target: Address,
        #[serde(with = "decimal_u256")]
        value: U256,
        payload_hash: B256,
        #[serde(with = "decimal_u256")]
        fee: U256,
        nonce: u64,
    },
    #[serde(rename_all = "camelCase")]
    BatchExecuted {
        principal: Address,
        relayer: Address,
        targets: Vec<Address>,
        #[serde(with = "decimal_u256_vec")]
        values: Vec<U256>,
        payload_hashes: Vec<B256>,
        #[serde(with = "decimal_u256")]
        fee: U256,
        nonce: u64,
    },
    RelayerAdded { relayer: Address },
    RelayerRemoved { relayer: Address },
    Paused { by: Address },
    Unpaused { by: Address },
    FeeRecipientChanged {
        previous: Option<Address>,
        current: Option<Address>,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::WalletDeployed { .. } => "WalletDeployed",
            EngineEvent::MetaTransactionExecuted { .. } => "MetaTransactionExecuted",
            EngineEvent::BatchExecuted { .. } => "BatchExecuted",
            EngineEvent::RelayerAdded { .. } => "RelayerAdded",
            EngineEvent::RelayerRemoved { .. } => "RelayerRemoved",
            EngineEvent::Paused { .. } => "Paused",
            EngineEvent::Unpaused { .. } => "Unpaused",
            EngineEvent::FeeRecipientChanged { .. } => "FeeRecipientChanged",
        }
    }
}

/// An event as recorded by the host, tagged with the emitting account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub emitter: Address,
    #[serde(flatten)]
    pub event: EngineEvent,
}
