//! Principal-side request construction and signing.
//!
//! [`RequestSigner`] produces requests whose digests match what the engine
//! recomputes, using the same [`StructuredHasher`] layouts.

use alloy_primitives::{Address, B256, Bytes, FixedBytes, Signature, U256};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use std::sync::Arc;

use crate::hasher::{DomainConfig, StructuredHasher};
use crate::request::{BatchMetaTransactionRequest, DeployWalletRequest, MetaTransactionRequest};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to sign request: {0}")]
    Signing(#[from] alloy_signer::Error),
    #[error("batch must contain at least one call")]
    EmptyBatch,
}

/// Signing abstraction over owned and `Arc`-shared signers.
///
/// Alloy's `Signer` is not implemented for `Arc<T>`, and `PrivateKeySigner` is
/// commonly shared between tasks.
#[async_trait]
pub trait SignerLike {
    fn address(&self) -> Address;

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error>;
}

#[async_trait]
impl SignerLike for PrivateKeySigner {
    fn address(&self) -> Address {
        PrivateKeySigner::address(self)
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self, hash).await
    }
}

#[async_trait]
impl<T: SignerLike + Send + Sync> SignerLike for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        (**self).sign_hash(hash).await
    }
}

/// One leg of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: Address,
    pub payload: Bytes,
    pub value: U256,
}

impl Call {
    pub fn new(target: Address, payload: impl Into<Bytes>, value: U256) -> Self {
        Self {
            target,
            payload: payload.into(),
            value,
        }
    }
}

pub struct RequestSigner<S> {
    signer: S,
    hasher: StructuredHasher,
}

impl<S: SignerLike + Sync> RequestSigner<S> {
    pub fn new(signer: S, domain: &DomainConfig) -> Self {
        Self {
            signer,
            hasher: StructuredHasher::new(domain),
        }
    }

    pub fn principal(&self) -> Address {
        self.signer.address()
    }

    pub async fn sign_transaction(
        &self,
        call: Call,
        fee: U256,
        nonce: u64,
    ) -> Result<MetaTransactionRequest, ClientError> {
        let principal = self.principal();
        let digest = self.hasher.transaction_digest(
            principal,
            call.target,
            &call.payload,
            call.value,
            fee,
            nonce,
        );
        let signature = self.sign(&digest).await?;
        Ok(MetaTransactionRequest {
            principal,
            target: call.target,
            payload: call.payload,
            value: call.value,
            fee,
            nonce,
            signature,
        })
    }

    pub async fn sign_batch(
        &self,
        calls: Vec<Call>,
        fee: U256,
        nonce: u64,
    ) -> Result<BatchMetaTransactionRequest, ClientError> {
        if calls.is_empty() {
            return Err(ClientError::EmptyBatch);
        }
        let principal = self.principal();
        let mut targets = Vec::with_capacity(calls.len());
        let mut payloads = Vec::with_capacity(calls.len());
        let mut values = Vec::with_capacity(calls.len());
        for call in calls {
            targets.push(call.target);
            payloads.push(call.payload);
            values.push(call.value);
        }
        let digest = self
            .hasher
            .batch_digest(principal, &targets, &payloads, &values, fee, nonce);
        let signature = self.sign(&digest).await?;
        Ok(BatchMetaTransactionRequest {
            principal,
            targets,
            payloads,
            values,
            fee,
            nonce,
            signature,
        })
    }

    pub async fn sign_deploy(&self, nonce: u64) -> Result<DeployWalletRequest, ClientError> {
        let principal = self.principal();
        let digest = self.hasher.deploy_digest(principal, nonce);
        let signature = self.sign(&digest).await?;
        Ok(DeployWalletRequest {
            principal,
            nonce,
            signature,
        })
    }

    async fn sign(&self, digest: &B256) -> Result<Bytes, ClientError> {
        let signature = self.signer.sign_hash(digest).await?;
        Ok(Bytes::copy_from_slice(&signature.as_bytes()))
    }
}
