//! The relay: one engine, one ledger, one submitting identity.
//!
//! Requests are serialized on the ledger mutex, which is the host-level
//! exclusivity the engine expects from its environment.

use alloy_primitives::{Address, Bytes, U256};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{Config, ConfigError};
use crate::engine::MetaTxEngine;
use crate::error::EngineError;
use crate::host::{InMemoryLedger, Ledger};
use crate::request::{
    BatchMetaTransactionRequest, DeployWalletRequest, MetaTransactionRequest, Submission,
};
use crate::wallet::{CachingDeriver, Create2Deriver};

pub type RelayEngine = MetaTxEngine<CachingDeriver<Create2Deriver>>;

pub struct RelayService {
    engine: Arc<RelayEngine>,
    ledger: Mutex<InMemoryLedger>,
    relayer: Address,
}

impl RelayService {
    pub fn new(engine: Arc<RelayEngine>, ledger: InMemoryLedger, relayer: Address) -> Self {
        Self {
            engine,
            ledger: Mutex::new(ledger),
            relayer,
        }
    }

    /// Builds the engine and seeds a fresh ledger from the genesis section.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let engine_config = config.engine_config()?;
        let deriver = CachingDeriver::new(Create2Deriver::new(
            engine_config.domain.verifying_account,
            engine_config.wallet_template.clone(),
        ));
        let engine = MetaTxEngine::with_deriver(engine_config, deriver);
        let relayer = config.relayer_signer()?.address();

        let mut ledger = InMemoryLedger::new();
        let genesis = config.genesis();
        for (account, amount) in &genesis.balances {
            ledger.set_balance(account.0, amount.0);
        }
        for (token, holders) in &genesis.tokens {
            ledger.create_token(token.0);
            for (holder, amount) in holders {
                ledger.mint_token(token.0, holder.0, amount.0)?;
            }
        }
        tracing::info!(
            %relayer,
            accounts = genesis.balances.len(),
            tokens = genesis.tokens.len(),
            "relay ledger seeded"
        );
        Ok(Self::new(Arc::new(engine), ledger, relayer))
    }

    pub fn engine(&self) -> &RelayEngine {
        &self.engine
    }

    pub fn relayer(&self) -> Address {
        self.relayer
    }

    /// Submits a single call. Without explicit `funding`, the relayer fronts `value + fee`.
    pub async fn execute(
        &self,
        request: &MetaTransactionRequest,
        funding: Option<U256>,
    ) -> Result<Bytes, EngineError> {
        let funding = funding.unwrap_or_else(|| request.value.saturating_add(request.fee));
        let submission = Submission::new(self.relayer, funding);
        let mut ledger = self.ledger.lock().await;
        self.engine
            .execute_meta_transaction(&mut *ledger, &submission, request)
    }

    /// Submits a batch. Without explicit `funding`, the relayer fronts the summed values plus fee.
    pub async fn execute_batch(
        &self,
        request: &BatchMetaTransactionRequest,
        funding: Option<U256>,
    ) -> Result<(), EngineError> {
        let funding = funding.unwrap_or_else(|| {
            request
                .values
                .iter()
                .fold(request.fee, |acc, value| acc.saturating_add(*value))
        });
        let submission = Submission::new(self.relayer, funding);
        let mut ledger = self.ledger.lock().await;
        self.engine
            .execute_batch_meta_transaction(&mut *ledger, &submission, request)
    }

    pub async fn deploy(&self, principal: Address) -> Result<Address, EngineError> {
        let mut ledger = self.ledger.lock().await;
        self.engine
            .deploy_wallet(&mut *ledger, self.relayer, principal)
    }

    pub async fn deploy_meta(&self, request: &DeployWalletRequest) -> Result<Address, EngineError> {
        let mut ledger = self.ledger.lock().await;
        self.engine
            .deploy_wallet_meta(&mut *ledger, self.relayer, request)
    }

    pub async fn balance_of(&self, account: Address) -> U256 {
        self.ledger.lock().await.balance_of(account)
    }

    /// Runs `f` with exclusive access to the ledger.
    pub async fn with_ledger<T>(&self, f: impl FnOnce(&mut InMemoryLedger) -> T) -> T {
        let mut ledger = self.ledger.lock().await;
        f(&mut ledger)
    }
}
