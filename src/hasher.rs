//! EIP-712 structured hashing for meta-transaction requests.
//!
//! The domain separator is derived once from [`DomainConfig`] and kept for the
//! lifetime of the hasher. Request digests are
//! `keccak256(0x19 0x01 ‖ domainSeparator ‖ hashStruct(message))`, where the
//! struct layouts below are the contract with off-platform signers.

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use serde::{Deserialize, Serialize};

sol! {
    /// A single forwarded call.
    #[derive(Debug, PartialEq, Eq)]
    struct MetaTransaction {
        address principal;
        address target;
        bytes payload;
        uint256 value;
        uint256 fee;
        uint256 nonce;
    }

    /// Ordered calls executed all-or-nothing under one fee.
    #[derive(Debug, PartialEq, Eq)]
    struct BatchMetaTransaction {
        address principal;
        address[] targets;
        bytes[] payloads;
        uint256[] values;
        uint256 fee;
        uint256 nonce;
    }

    /// Authorization to deploy the principal's wallet.
    #[derive(Debug, PartialEq, Eq)]
    struct DeployWallet {
        address principal;
        uint256 nonce;
    }
}

/// Signing domain parameters. Immutable once the hasher is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainConfig {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    /// Account the engine runs as. Binds signatures to this deployment.
    pub verifying_account: Address,
}

#[derive(Debug, Clone)]
pub struct StructuredHasher {
    domain: Eip712Domain,
    separator: B256,
}

impl StructuredHasher {
    pub fn new(config: &DomainConfig) -> Self {
        let domain = eip712_domain! {
            name: config.name.clone(),
            version: config.version.clone(),
            chain_id: config.chain_id,
            verifying_contract: config.verifying_account,
        };
        let separator = domain.separator();
        Self { domain, separator }
    }

    pub fn domain(&self) -> &Eip712Domain {
        &self.domain
    }

    pub fn domain_separator(&self) -> B256 {
        self.separator
    }

    pub fn transaction_digest(
        &self,
        principal: Address,
        target: Address,
        payload: &Bytes,
        value: U256,
        fee: U256,
        nonce: u64,
    ) -> B256 {
        let message = MetaTransaction {
            principal,
            target,
            payload: payload.clone(),
            value,
            fee,
            nonce: U256::from(nonce),
        };
        self.digest(message.eip712_hash_struct())
    }

    pub fn batch_digest(
        &self,
        principal: Address,
        targets: &[Address],
        payloads: &[Bytes],
        values: &[U256],
        fee: U256,
        nonce: u64,
    ) -> B256 {
        let message = BatchMetaTransaction {
            principal,
            targets: targets.to_vec(),
            payloads: payloads.to_vec(),
            values: values.to_vec(),
            fee,
            nonce: U256::from(nonce),
        };
        self.digest(message.eip712_hash_struct())
    }

    pub fn deploy_digest(&self, principal: Address, nonce: u64) -> B256 {
        let message = DeployWallet {
            principal,
            nonce: U256::from(nonce),
        };
        self.digest(message.eip712_hash_struct())
    }

    fn digest(&self, struct_hash: B256) -> B256 {
        let mut buf = [0u8; 66];
        buf[0] = 0x19;
        buf[1] = 0x01;
        buf[2..34].copy_from_slice(self.separator.as_slice());
        buf[34..66].copy_from_slice(struct_hash.as_slice());
        keccak256(buf)
    }
}
