//! Signed requests as they arrive from principals via relayers.

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::types::{decimal_u256, decimal_u256_vec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaTransactionRequest {
    pub principal: Address,
    pub target: Address,
    #[serde(default)]
    pub payload: Bytes,
    #[serde(with = "decimal_u256")]
    pub value: U256,
    #[serde(with = "decimal_u256")]
    pub fee: U256,
    pub nonce: u64,
    pub signature: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetaTransactionRequest {
    pub principal: Address,
    pub targets: Vec<Address>,
    pub payloads: Vec<Bytes>,
    #[serde(with = "decimal_u256_vec")]
    pub values: Vec<U256>,
    #[serde(with = "decimal_u256")]
    pub fee: U256,
    pub nonce: u64,
    pub signature: Bytes,
}

impl BatchMetaTransactionRequest {
    pub fn legs(&self) -> usize {
        self.targets.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployWalletRequest {
    pub principal: Address,
    pub nonce: u64,
    pub signature: Bytes,
}

/// The relayer's side of a submission: who submits, and the native funding attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub relayer: Address,
    pub funding: U256,
}

impl Submission {
    pub fn new(relayer: Address, funding: U256) -> Self {
        Self { relayer, funding }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = r#"{
            "principal": "0x1111111111111111111111111111111111111111",
            "target": "0x2222222222222222222222222222222222222222",
            "payload": "0xa9059cbb",
            "value": "100",
            "fee": "5",
            "nonce": 0,
            "signature": "0x00"
        }"#;
        let request: MetaTransactionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.value, U256::from(100u64));
        assert_eq!(request.payload.len(), 4);
        let back = serde_json::to_value(&request).unwrap();
        assert_eq!(back["fee"], "5");
    }

    #[test]
    fn test_payload_defaults_to_empty() {
        let json = r#"{
            "principal": "0x1111111111111111111111111111111111111111",
            "target": "0x2222222222222222222222222222222222222222",
            "value": "0",
            "fee": "0",
            "nonce": 3,
            "signature": "0x"
        }"#;
        let request: MetaTransactionRequest = serde_json::from_str(json).unwrap();
        assert!(request.payload.is_empty());
        assert_eq!(request.nonce, 3);
    }
}
