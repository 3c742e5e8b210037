//! The meta-transaction executor.
//!
//! Every mutating operation runs the same gate chain (pause, reentrancy, caller
//! authorization, digest, signature) and then applies its effects inside a host
//! checkpoint. Engine-owned state is written with staged commits: the nonce
//! reservation is committed only after the host checkpoint commits, and the
//! deployed flag is written last by the coordinator.

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use std::sync::{PoisonError, RwLock};
use tracing::{Level, instrument};

use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::fee::{FeePlan, FeeSettlement};
use crate::guard::{OwnershipCheck, PauseGuard, ReentrancyGuard};
use crate::hasher::{DomainConfig, StructuredHasher};
use crate::host::{ForwardedCall, Ledger, atomically};
use crate::nonce::NonceSequencer;
use crate::relayer::RelayerRegistry;
use crate::request::{
    BatchMetaTransactionRequest, DeployWalletRequest, MetaTransactionRequest, Submission,
};
use crate::signature::SignatureVerifier;
use crate::wallet::{AddressDeriver, Create2Deriver, DeploymentCoordinator, WalletInstance};

/// Progress of a request through the gate chain. Reported when a request aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    RelayerChecked,
    DigestBuilt,
    SignatureVerified,
    NonceAdvanced,
    Forwarded,
    FeeSettled,
    Emitted,
}

/// Construction parameters for [`MetaTxEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub domain: DomainConfig,
    pub admin: Address,
    pub relayers: Vec<Address>,
    pub fee_recipient: Option<Address>,
    pub batch_enabled: bool,
    pub token_fee_fallback: bool,
    pub wallet_template: Bytes,
}

pub struct MetaTxEngine<D = Create2Deriver> {
    account: Address,
    hasher: StructuredHasher,
    verifier: SignatureVerifier,
    nonces: NonceSequencer,
    relayers: RelayerRegistry,
    deployments: DeploymentCoordinator<D>,
    fees: FeeSettlement,
    pause: PauseGuard,
    reentrancy: ReentrancyGuard,
    owner: OwnershipCheck,
    fee_recipient: RwLock<Option<Address>>,
    batch_enabled: bool,
}

impl MetaTxEngine<Create2Deriver> {
    /// Builds an engine whose wallets are CREATE2-deployed by the verifying account.
    pub fn new(config: EngineConfig) -> Self {
        let deriver = Create2Deriver::new(
            config.domain.verifying_account,
            config.wallet_template.clone(),
        );
        Self::with_deriver(config, deriver)
    }
}

impl<D: AddressDeriver> MetaTxEngine<D> {
    pub fn with_deriver(config: EngineConfig, deriver: D) -> Self {
        let hasher = StructuredHasher::new(&config.domain);
        tracing::info!(
            account = %config.domain.verifying_account,
            chain_id = config.domain.chain_id,
            separator = %hasher.domain_separator(),
            "meta-transaction engine initialized"
        );
        Self {
            account: config.domain.verifying_account,
            hasher,
            verifier: SignatureVerifier,
            nonces: NonceSequencer::new(),
            relayers: RelayerRegistry::new(config.relayers),
            deployments: DeploymentCoordinator::new(deriver),
            fees: FeeSettlement::new(config.token_fee_fallback),
            pause: PauseGuard::default(),
            reentrancy: ReentrancyGuard::default(),
            owner: OwnershipCheck::new(config.admin),
            fee_recipient: RwLock::new(config.fee_recipient),
            batch_enabled: config.batch_enabled,
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Forwards one signed call from the principal's wallet and returns its output.
    #[instrument(skip_all, err, fields(principal = %request.principal, relayer = %submission.relayer, nonce = request.nonce))]
    pub fn execute_meta_transaction<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        submission: &Submission,
        request: &MetaTransactionRequest,
    ) -> Result<Bytes, EngineError> {
        let mut stage = RequestStage::Received;
        self.run_single(host, submission, request, &mut stage)
            .inspect_err(|e| abort_trace(stage, e))
    }

    /// Forwards an ordered batch of calls. Either every leg applies or none does.
    #[instrument(skip_all, err, fields(principal = %request.principal, relayer = %submission.relayer, nonce = request.nonce, legs = request.legs()))]
    pub fn execute_batch_meta_transaction<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        submission: &Submission,
        request: &BatchMetaTransactionRequest,
    ) -> Result<(), EngineError> {
        let mut stage = RequestStage::Received;
        self.run_batch(host, submission, request, &mut stage)
            .inspect_err(|e| abort_trace(stage, e))
    }

    fn run_single<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        submission: &Submission,
        request: &MetaTransactionRequest,
        stage: &mut RequestStage,
    ) -> Result<Bytes, EngineError> {
        self.pause.ensure_active()?;
        let _lock = self.reentrancy.enter()?;
        self.ensure_relayer(submission.relayer)?;
        *stage = RequestStage::RelayerChecked;

        let digest = self.hasher.transaction_digest(
            request.principal,
            request.target,
            &request.payload,
            request.value,
            request.fee,
            request.nonce,
        );
        *stage = RequestStage::DigestBuilt;
        self.verifier
            .verify(&digest, &request.signature, request.principal)?;
        *stage = RequestStage::SignatureVerified;

        let wallet = self.deployed_wallet(request.principal)?;
        let plan = self.fees.plan(
            host,
            submission.funding,
            request.value,
            request.fee,
            Some(request.target),
        )?;
        let reservation = self
            .nonces
            .check_and_advance(request.principal, request.nonce)?;
        *stage = RequestStage::NonceAdvanced;

        let recipient = self.fee_recipient().unwrap_or(submission.relayer);
        let event = EngineEvent::MetaTransactionExecuted {
            principal: request.principal,
            relayer: submission.relayer,
            target: request.target,
            value: request.value,
            payload_hash: keccak256(&request.payload),
            fee: request.fee,
            nonce: request.nonce,
        };
        let output = atomically(host, |host| {
            self.take_funding(host, submission)?;
            let output = self.forward(
                host,
                wallet,
                0,
                request.target,
                &request.payload,
                request.value,
            )?;
            *stage = RequestStage::Forwarded;
            self.fees.settle(
                host,
                plan,
                self.account,
                request.principal,
                recipient,
                request.fee,
            )?;
            self.refund(host, submission, request.value, request.fee, plan)?;
            *stage = RequestStage::FeeSettled;
            self.emit(host, event.clone());
            Ok::<_, EngineError>(output)
        })?;
        reservation.commit();
        announce(&event);
        *stage = RequestStage::Emitted;

        tracing::event!(
            Level::INFO,
            status = "ok",
            target = %request.target,
            value = %request.value,
            fee = %request.fee,
            fee_plan = ?plan,
            "meta-transaction executed"
        );
        Ok(output)
    }

    fn run_batch<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        submission: &Submission,
        request: &BatchMetaTransactionRequest,
        stage: &mut RequestStage,
    ) -> Result<(), EngineError> {
        self.pause.ensure_active()?;
        let _lock = self.reentrancy.enter()?;
        if !self.batch_enabled {
            return Err(EngineError::InvalidRequest(
                "batch execution is disabled".into(),
            ));
        }
        self.ensure_relayer(submission.relayer)?;
        *stage = RequestStage::RelayerChecked;

        let total_value = validate_batch_shape(request)?;
        let digest = self.hasher.batch_digest(
            request.principal,
            &request.targets,
            &request.payloads,
            &request.values,
            request.fee,
            request.nonce,
        );
        *stage = RequestStage::DigestBuilt;
        self.verifier
            .verify(&digest, &request.signature, request.principal)?;
        *stage = RequestStage::SignatureVerified;

        let wallet = self.deployed_wallet(request.principal)?;
        let plan = self.fees.plan(
            host,
            submission.funding,
            total_value,
            request.fee,
            request.targets.first().copied(),
        )?;
        let reservation = self
            .nonces
            .check_and_advance(request.principal, request.nonce)?;
        *stage = RequestStage::NonceAdvanced;

        let recipient = self.fee_recipient().unwrap_or(submission.relayer);
        let event = EngineEvent::BatchExecuted {
            principal: request.principal,
            relayer: submission.relayer,
            targets: request.targets.clone(),
            values: request.values.clone(),
            payload_hashes: request.payloads.iter().map(keccak256).collect(),
            fee: request.fee,
            nonce: request.nonce,
        };
        atomically(host, |host| {
            self.take_funding(host, submission)?;
            let legs = request
                .targets
                .iter()
                .zip(request.payloads.iter())
                .zip(request.values.iter());
            for (leg, ((target, payload), value)) in legs.enumerate() {
                self.forward(host, wallet, leg, *target, payload, *value)?;
            }
            *stage = RequestStage::Forwarded;
            self.fees.settle(
                host,
                plan,
                self.account,
                request.principal,
                recipient,
                request.fee,
            )?;
            self.refund(host, submission, total_value, request.fee, plan)?;
            *stage = RequestStage::FeeSettled;
            self.emit(host, event.clone());
            Ok::<_, EngineError>(())
        })?;
        reservation.commit();
        announce(&event);
        *stage = RequestStage::Emitted;

        tracing::event!(
            Level::INFO,
            status = "ok",
            legs = request.legs(),
            value = %total_value,
            fee = %request.fee,
            fee_plan = ?plan,
            "batch executed"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deployment
    // ------------------------------------------------------------------

    /// Deploys `principal`'s wallet. The caller must be the principal or an authorized relayer.
    #[instrument(skip_all, err, fields(caller = %caller, principal = %principal))]
    pub fn deploy_wallet<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        caller: Address,
        principal: Address,
    ) -> Result<Address, EngineError> {
        self.pause.ensure_active()?;
        let _lock = self.reentrancy.enter()?;
        if caller != principal && !self.relayers.is_authorized(&caller) {
            return Err(EngineError::Unauthorized {
                caller,
                action: "deploy a wallet for another principal",
            });
        }
        let wallet = atomically(host, |host| self.deploy_and_emit(host, principal))?;
        announce(&EngineEvent::WalletDeployed { principal, wallet });
        Ok(wallet)
    }

    /// Deploys a wallet on the principal's signed authorization, consuming one nonce.
    #[instrument(skip_all, err, fields(relayer = %relayer, principal = %request.principal, nonce = request.nonce))]
    pub fn deploy_wallet_meta<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        relayer: Address,
        request: &DeployWalletRequest,
    ) -> Result<Address, EngineError> {
        self.pause.ensure_active()?;
        let _lock = self.reentrancy.enter()?;
        self.ensure_relayer(relayer)?;
        let digest = self
            .hasher
            .deploy_digest(request.principal, request.nonce);
        self.verifier
            .verify(&digest, &request.signature, request.principal)?;
        if self.deployments.is_deployed(request.principal) {
            return Err(EngineError::AlreadyDeployed {
                principal: request.principal,
                wallet: self.deployments.deriver().derive(request.principal),
            });
        }
        let reservation = self
            .nonces
            .check_and_advance(request.principal, request.nonce)?;
        let wallet = atomically(host, |host| self.deploy_and_emit(host, request.principal))?;
        reservation.commit();
        announce(&EngineEvent::WalletDeployed {
            principal: request.principal,
            wallet,
        });
        Ok(wallet)
    }

    fn deploy_and_emit<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        principal: Address,
    ) -> Result<Address, EngineError> {
        let wallet = self.deployments.deploy(host, principal)?;
        self.emit(host, EngineEvent::WalletDeployed { principal, wallet });
        Ok(wallet)
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    /// Authorizes `relayer` to submit requests. Admin only.
    ///
    /// Fails with a registry error if the address is already authorized; adding is
    /// not idempotent. Emits `RelayerAdded`.
    #[instrument(skip_all, err, fields(caller = %caller, relayer = %relayer))]
    pub fn add_relayer<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        caller: Address,
        relayer: Address,
    ) -> Result<(), EngineError> {
        let _lock = self.reentrancy.enter()?;
        self.owner.ensure_admin(caller, "add relayers")?;
        self.relayers.add(relayer)?;
        self.publish(host, EngineEvent::RelayerAdded { relayer });
        Ok(())
    }

    /// Revokes `relayer`. Admin only; unknown relayers are rejected.
    #[instrument(skip_all, err, fields(caller = %caller, relayer = %relayer))]
    pub fn remove_relayer<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        caller: Address,
        relayer: Address,
    ) -> Result<(), EngineError> {
        let _lock = self.reentrancy.enter()?;
        self.owner.ensure_admin(caller, "remove relayers")?;
        self.relayers.remove(&relayer)?;
        self.publish(host, EngineEvent::RelayerRemoved { relayer });
        Ok(())
    }

    /// Stops every state-changing operation except administration.
    ///
    /// Pausing twice is an `InvalidState` error. Read-only queries keep working.
    #[instrument(skip_all, err, fields(caller = %caller))]
    pub fn pause<H: Ledger + ?Sized>(&self, host: &mut H, caller: Address) -> Result<(), EngineError> {
        let _lock = self.reentrancy.enter()?;
        self.owner.ensure_admin(caller, "pause")?;
        self.pause.pause()?;
        self.publish(host, EngineEvent::Paused { by: caller });
        Ok(())
    }

    /// Reverses [`pause`](Self::pause).
    #[instrument(skip_all, err, fields(caller = %caller))]
    pub fn unpause<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        caller: Address,
    ) -> Result<(), EngineError> {
        let _lock = self.reentrancy.enter()?;
        self.owner.ensure_admin(caller, "unpause")?;
        self.pause.unpause()?;
        self.publish(host, EngineEvent::Unpaused { by: caller });
        Ok(())
    }

    /// Sets where fees go. `None` pays the submitting relayer.
    #[instrument(skip_all, err, fields(caller = %caller))]
    pub fn set_fee_recipient<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        caller: Address,
        recipient: Option<Address>,
    ) -> Result<(), EngineError> {
        let _lock = self.reentrancy.enter()?;
        self.owner.ensure_admin(caller, "set the fee recipient")?;
        let previous = {
            let mut slot = self
                .fee_recipient
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, recipient)
        };
        self.publish(
            host,
            EngineEvent::FeeRecipientChanged {
                previous,
                current: recipient,
            },
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read-only queries
    // ------------------------------------------------------------------

    /// Address the engine holds funds under and that deploys wallets.
    pub fn account(&self) -> Address {
        self.account
    }

    /// The single administrator.
    pub fn admin(&self) -> Address {
        self.owner.admin()
    }

    pub fn hasher(&self) -> &StructuredHasher {
        &self.hasher
    }

    /// EIP-712 domain separator, fixed at construction.
    pub fn domain_separator(&self) -> B256 {
        self.hasher.domain_separator()
    }

    /// Deterministic wallet address for `principal`.
    ///
    /// Pure derivation: the answer is the same before and after deployment, and the
    /// host is never consulted.
    pub fn compute_wallet_address(&self, principal: Address) -> Address {
        self.deployments.deriver().derive(principal)
    }

    /// Wallet address together with its recorded deployment flag.
    pub fn wallet(&self, principal: Address) -> WalletInstance {
        self.deployments.instance(principal)
    }

    /// Next nonce the principal must sign. Starts at 0 and only a committed
    /// request advances it.
    pub fn current_nonce(&self, principal: Address) -> u64 {
        self.nonces.current(principal)
    }

    /// Digest a principal signs for a single forwarded call.
    ///
    /// Clients can compare this against their own hashing before submitting.
    pub fn transaction_digest(
        &self,
        principal: Address,
        target: Address,
        payload: &Bytes,
        value: U256,
        fee: U256,
        nonce: u64,
    ) -> B256 {
        self.hasher
            .transaction_digest(principal, target, payload, value, fee, nonce)
    }

    /// Digest over the full ordered batch; reordering legs changes it.
    pub fn batch_digest(
        &self,
        principal: Address,
        targets: &[Address],
        payloads: &[Bytes],
        values: &[U256],
        fee: U256,
        nonce: u64,
    ) -> B256 {
        self.hasher
            .batch_digest(principal, targets, payloads, values, fee, nonce)
    }

    /// Digest authorizing [`deploy_wallet_meta`](Self::deploy_wallet_meta).
    pub fn deploy_digest(&self, principal: Address, nonce: u64) -> B256 {
        self.hasher.deploy_digest(principal, nonce)
    }

    pub fn is_relayer(&self, relayer: Address) -> bool {
        self.relayers.is_authorized(&relayer)
    }

    /// Snapshot of the authorized relayers, in no particular order.
    pub fn relayers(&self) -> Vec<Address> {
        self.relayers.list()
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Configured fee recipient. `None` means fees go to whichever relayer submits.
    pub fn fee_recipient(&self) -> Option<Address> {
        *self
            .fee_recipient
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn batch_enabled(&self) -> bool {
        self.batch_enabled
    }

    /// Whether fees may be pulled in the target token when native funding falls short.
    pub fn token_fee_fallback(&self) -> bool {
        self.fees.token_fallback()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn ensure_relayer(&self, relayer: Address) -> Result<(), EngineError> {
        if self.relayers.is_authorized(&relayer) {
            Ok(())
        } else {
            Err(EngineError::Unauthorized {
                caller: relayer,
                action: "submit meta-transactions",
            })
        }
    }

    fn deployed_wallet(&self, principal: Address) -> Result<Address, EngineError> {
        if !self.deployments.is_deployed(principal) {
            return Err(EngineError::NotDeployed(principal));
        }
        Ok(self.deployments.deriver().derive(principal))
    }

    fn take_funding<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        submission: &Submission,
    ) -> Result<(), EngineError> {
        host.transfer(submission.relayer, self.account, submission.funding)?;
        Ok(())
    }

    /// Returns whatever the relayer attached beyond the forwarded value and the native fee.
    fn refund<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        submission: &Submission,
        value: U256,
        fee: U256,
        plan: FeePlan,
    ) -> Result<(), EngineError> {
        let spent = match plan {
            FeePlan::Native => value + fee,
            FeePlan::TokenPull { .. } => value,
        };
        let change = submission.funding.saturating_sub(spent);
        host.transfer(self.account, submission.relayer, change)?;
        Ok(())
    }

    fn forward<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        wallet: Address,
        leg: usize,
        target: Address,
        payload: &Bytes,
        value: U256,
    ) -> Result<Bytes, EngineError> {
        host.transfer(self.account, wallet, value)?;
        host.call(ForwardedCall {
            caller: wallet,
            target,
            payload: payload.clone(),
            value,
        })
        .map_err(|source| EngineError::Execution {
            leg,
            target,
            source,
        })
    }

    /// Records `event` on the host. Inside a checkpoint it is still pending and
    /// disappears if the checkpoint is reverted.
    fn emit<H: Ledger + ?Sized>(&self, host: &mut H, event: EngineEvent) {
        tracing::debug!(event = event.name(), "engine event staged");
        host.emit(self.account, event);
    }

    /// Records an event outside any checkpoint, so it is final immediately.
    fn publish<H: Ledger + ?Sized>(&self, host: &mut H, event: EngineEvent) {
        announce(&event);
        host.emit(self.account, event);
    }
}

fn validate_batch_shape(request: &BatchMetaTransactionRequest) -> Result<U256, EngineError> {
    let legs = request.targets.len();
    if legs == 0 {
        return Err(EngineError::InvalidRequest("batch has no calls".into()));
    }
    if request.payloads.len() != legs || request.values.len() != legs {
        return Err(EngineError::InvalidRequest(format!(
            "batch lengths differ: {} targets, {} payloads, {} values",
            legs,
            request.payloads.len(),
            request.values.len()
        )));
    }
    request
        .values
        .iter()
        .try_fold(U256::ZERO, |acc, value| acc.checked_add(*value))
        .ok_or_else(|| EngineError::InvalidRequest("batch value overflows".into()))
}

/// Logs an event once the state it describes has been committed.
fn announce(event: &EngineEvent) {
    tracing::info!(event = event.name(), detail = ?event, "engine event");
}

fn abort_trace(stage: RequestStage, error: &EngineError) {
    tracing::debug!(?stage, kind = ?error.kind(), "request aborted");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Call, RequestSigner};
    use crate::error::ErrorKind;
    use crate::host::memory::IERC20;
    use crate::host::{CallContext, Contract, InMemoryLedger, LedgerError};
    use crate::nonce::ReplayError;
    use alloy_primitives::{address, bytes};
    use alloy_signer_local::PrivateKeySigner;
    use alloy_sol_types::SolCall;
    use std::sync::{Arc, Mutex};

    const ENGINE: Address = address!("0x00000000000000000000000000000000000e4e11");
    const ADMIN: Address = address!("0xadadadadadadadadadadadadadadadadadadadad");
    const RELAYER: Address = address!("0x2222222222222222222222222222222222222222");
    const TARGET: Address = address!("0x3333333333333333333333333333333333333333");
    const OTHER_TARGET: Address = address!("0x4444444444444444444444444444444444444444");
    const REVERTER: Address = address!("0x5555555555555555555555555555555555555555");
    const FEE_SINK: Address = address!("0x6666666666666666666666666666666666666666");
    const TOKEN: Address = address!("0x7070707070707070707070707070707070707070");
    const RELAYER_FUNDS: u64 = 1_000_000;

    fn domain(chain_id: u64) -> DomainConfig {
        DomainConfig {
            name: "MetaTxEngine".into(),
            version: "1".into(),
            chain_id,
            verifying_account: ENGINE,
        }
    }

    fn engine_config() -> EngineConfig {
        EngineConfig {
            domain: domain(31337),
            admin: ADMIN,
            relayers: vec![RELAYER],
            fee_recipient: None,
            batch_enabled: true,
            token_fee_fallback: false,
            wallet_template: bytes!("60806040"),
        }
    }

    struct Fixture {
        engine: Arc<MetaTxEngine>,
        ledger: InMemoryLedger,
        signer: PrivateKeySigner,
        client: RequestSigner<PrivateKeySigner>,
        wallet: Address,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(engine_config())
        }

        /// Engine plus a principal whose wallet is already deployed.
        fn with_config(config: EngineConfig) -> Self {
            let signer = PrivateKeySigner::random();
            let client = RequestSigner::new(signer.clone(), &config.domain);
            let engine = Arc::new(MetaTxEngine::new(config));
            let mut ledger = InMemoryLedger::new();
            ledger.set_balance(RELAYER, U256::from(RELAYER_FUNDS));
            let wallet = engine
                .deploy_wallet(&mut ledger, RELAYER, client.principal())
                .unwrap();
            Self {
                engine,
                ledger,
                signer,
                client,
                wallet,
            }
        }

        fn principal(&self) -> Address {
            self.client.principal()
        }

        fn execute(
            &mut self,
            request: &MetaTransactionRequest,
            funding: u64,
        ) -> Result<Bytes, EngineError> {
            let submission = Submission::new(RELAYER, U256::from(funding));
            self.engine
                .execute_meta_transaction(&mut self.ledger, &submission, request)
        }

        fn execute_batch(
            &mut self,
            request: &BatchMetaTransactionRequest,
            funding: u64,
        ) -> Result<(), EngineError> {
            let submission = Submission::new(RELAYER, U256::from(funding));
            self.engine
                .execute_batch_meta_transaction(&mut self.ledger, &submission, request)
        }

        fn last_event(&self) -> Option<&'static str> {
            self.ledger.logs().last().map(|entry| entry.event.name())
        }
    }

    fn transfer(target: Address, value: u64) -> Call {
        Call::new(target, Bytes::new(), U256::from(value))
    }

    struct AlwaysRevert;

    impl Contract for AlwaysRevert {
        fn invoke(&self, _host: &mut dyn Ledger, _ctx: &CallContext) -> Result<Bytes, LedgerError> {
            Err(LedgerError::Reverted("leg refused".into()))
        }
    }

    /// Calls back into the engine while the outer request is still executing.
    struct Reenter {
        engine: Arc<MetaTxEngine>,
        inner: MetaTransactionRequest,
        observed: Mutex<Option<ErrorKind>>,
    }

    impl Contract for Reenter {
        fn invoke(&self, host: &mut dyn Ledger, _ctx: &CallContext) -> Result<Bytes, LedgerError> {
            let submission = Submission::new(RELAYER, U256::ZERO);
            let result = self
                .engine
                .execute_meta_transaction(host, &submission, &self.inner);
            *self.observed.lock().unwrap() = result.err().map(|e| e.kind());
            Ok(Bytes::new())
        }
    }

    #[tokio::test]
    async fn test_execute_forwards_value_and_pays_relayer() {
        let mut fx = Fixture::new();
        let request = fx
            .client
            .sign_transaction(transfer(TARGET, 100), U256::from(5u64), 0)
            .await
            .unwrap();
        fx.execute(&request, 105).unwrap();

        assert_eq!(fx.engine.current_nonce(fx.principal()), 1);
        assert_eq!(fx.ledger.balance_of(TARGET), U256::from(100u64));
        // Relayer fronted 105 and received the 5 fee back.
        assert_eq!(fx.ledger.balance_of(RELAYER), U256::from(RELAYER_FUNDS - 100));
        assert_eq!(fx.ledger.balance_of(ENGINE), U256::ZERO);
        assert_eq!(fx.ledger.balance_of(fx.wallet), U256::ZERO);
        assert_eq!(fx.last_event(), Some("MetaTransactionExecuted"));
    }

    #[tokio::test]
    async fn test_replayed_request_is_rejected() {
        let mut fx = Fixture::new();
        let request = fx
            .client
            .sign_transaction(transfer(TARGET, 1), U256::ZERO, 0)
            .await
            .unwrap();
        fx.execute(&request, 1).unwrap();
        let err = fx.execute(&request, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Replay);
        assert_eq!(fx.engine.current_nonce(fx.principal()), 1);
        assert_eq!(fx.ledger.balance_of(TARGET), U256::from(1u64));
    }

    #[tokio::test]
    async fn test_nonces_must_be_sequential() {
        let mut fx = Fixture::new();
        let skipped = fx
            .client
            .sign_transaction(transfer(TARGET, 1), U256::ZERO, 1)
            .await
            .unwrap();
        let err = fx.execute(&skipped, 1).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Replay(ReplayError {
                expected: 0,
                presented: 1,
                ..
            })
        ));
        for nonce in 0..3 {
            let request = fx
                .client
                .sign_transaction(transfer(TARGET, 1), U256::ZERO, nonce)
                .await
                .unwrap();
            fx.execute(&request, 1).unwrap();
            assert_eq!(fx.engine.current_nonce(fx.principal()), nonce + 1);
        }
    }

    #[tokio::test]
    async fn test_fee_must_be_fully_funded() {
        let mut fx = Fixture::new();
        fx.engine
            .set_fee_recipient(&mut fx.ledger, ADMIN, Some(FEE_SINK))
            .unwrap();
        let request = fx
            .client
            .sign_transaction(transfer(TARGET, 100), U256::from(5u64), 0)
            .await
            .unwrap();

        let err = fx.execute(&request, 104).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert_eq!(fx.engine.current_nonce(fx.principal()), 0);
        assert_eq!(fx.ledger.balance_of(RELAYER), U256::from(RELAYER_FUNDS));

        fx.execute(&request, 105).unwrap();
        assert_eq!(fx.ledger.balance_of(FEE_SINK), U256::from(5u64));
        assert_eq!(fx.ledger.balance_of(TARGET), U256::from(100u64));
        assert_eq!(fx.ledger.balance_of(RELAYER), U256::from(RELAYER_FUNDS - 105));
    }

    #[tokio::test]
    async fn test_excess_funding_is_refunded() {
        let mut fx = Fixture::new();
        let request = fx
            .client
            .sign_transaction(transfer(TARGET, 100), U256::from(5u64), 0)
            .await
            .unwrap();
        fx.execute(&request, 500).unwrap();
        assert_eq!(fx.ledger.balance_of(RELAYER), U256::from(RELAYER_FUNDS - 100));
        assert_eq!(fx.ledger.balance_of(ENGINE), U256::ZERO);
    }

    #[tokio::test]
    async fn test_signature_from_another_key_is_rejected() {
        let mut fx = Fixture::new();
        let mallory = RequestSigner::new(PrivateKeySigner::random(), &domain(31337));
        let mut request = mallory
            .sign_transaction(transfer(TARGET, 1), U256::ZERO, 0)
            .await
            .unwrap();
        request.principal = fx.principal();
        let err = fx.execute(&request, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Signature);
        assert_eq!(fx.engine.current_nonce(fx.principal()), 0);
    }

    #[tokio::test]
    async fn test_signature_for_another_chain_is_rejected() {
        let mut fx = Fixture::new();
        let foreign = RequestSigner::new(fx.signer.clone(), &domain(1));
        let request = foreign
            .sign_transaction(transfer(TARGET, 1), U256::ZERO, 0)
            .await
            .unwrap();
        let err = fx.execute(&request, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Signature);
    }

    #[tokio::test]
    async fn test_tampered_request_is_rejected() {
        let mut fx = Fixture::new();
        let mut request = fx
            .client
            .sign_transaction(transfer(TARGET, 1), U256::ZERO, 0)
            .await
            .unwrap();
        request.target = OTHER_TARGET;
        let err = fx.execute(&request, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Signature);
    }

    #[tokio::test]
    async fn test_unregistered_relayer_is_rejected() {
        let mut fx = Fixture::new();
        let request = fx
            .client
            .sign_transaction(transfer(TARGET, 0), U256::ZERO, 0)
            .await
            .unwrap();
        let submission = Submission::new(OTHER_TARGET, U256::ZERO);
        let err = fx
            .engine
            .execute_meta_transaction(&mut fx.ledger, &submission, &request)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(fx.engine.current_nonce(fx.principal()), 0);
    }

    #[tokio::test]
    async fn test_undeployed_wallet_is_rejected() {
        let mut fx = Fixture::new();
        let stranger = RequestSigner::new(PrivateKeySigner::random(), &domain(31337));
        let request = stranger
            .sign_transaction(transfer(TARGET, 0), U256::ZERO, 0)
            .await
            .unwrap();
        let err = fx.execute(&request, 0).unwrap_err();
        assert_eq!(err, EngineError::NotDeployed(stranger.principal()));
    }

    #[tokio::test]
    async fn test_pause_blocks_execution_until_unpaused() {
        let mut fx = Fixture::new();
        let err = fx.engine.pause(&mut fx.ledger, RELAYER).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        fx.engine.pause(&mut fx.ledger, ADMIN).unwrap();
        assert!(fx.engine.is_paused());
        assert_eq!(fx.last_event(), Some("Paused"));
        let err = fx.engine.pause(&mut fx.ledger, ADMIN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let request = fx
            .client
            .sign_transaction(transfer(TARGET, 1), U256::ZERO, 0)
            .await
            .unwrap();
        assert_eq!(fx.execute(&request, 1).unwrap_err(), EngineError::Paused);
        assert_eq!(fx.engine.current_nonce(fx.principal()), 0);

        fx.engine.unpause(&mut fx.ledger, ADMIN).unwrap();
        fx.execute(&request, 1).unwrap();
        assert_eq!(fx.engine.current_nonce(fx.principal()), 1);
    }

    #[tokio::test]
    async fn test_batch_applies_every_leg() {
        let mut fx = Fixture::new();
        let request = fx
            .client
            .sign_batch(
                vec![
                    transfer(TARGET, 10),
                    transfer(OTHER_TARGET, 20),
                    transfer(TARGET, 30),
                ],
                U256::from(5u64),
                0,
            )
            .await
            .unwrap();
        fx.execute_batch(&request, 65).unwrap();
        assert_eq!(fx.ledger.balance_of(TARGET), U256::from(40u64));
        assert_eq!(fx.ledger.balance_of(OTHER_TARGET), U256::from(20u64));
        assert_eq!(fx.ledger.balance_of(RELAYER), U256::from(RELAYER_FUNDS - 60));
        assert_eq!(fx.engine.current_nonce(fx.principal()), 1);
        assert_eq!(fx.last_event(), Some("BatchExecuted"));
    }

    #[tokio::test]
    async fn test_batch_leg_failure_reverts_everything() {
        let mut fx = Fixture::new();
        fx.ledger.register_contract(REVERTER, Arc::new(AlwaysRevert));
        let logs_before = fx.ledger.logs().len();
        let request = fx
            .client
            .sign_batch(
                vec![
                    transfer(TARGET, 10),
                    transfer(REVERTER, 0),
                    transfer(OTHER_TARGET, 10),
                ],
                U256::from(5u64),
                0,
            )
            .await
            .unwrap();
        let err = fx.execute_batch(&request, 25).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Execution {
                leg: 1,
                target: REVERTER,
                ..
            }
        ));
        assert_eq!(fx.engine.current_nonce(fx.principal()), 0);
        assert_eq!(fx.ledger.balance_of(TARGET), U256::ZERO);
        assert_eq!(fx.ledger.balance_of(OTHER_TARGET), U256::ZERO);
        assert_eq!(fx.ledger.balance_of(RELAYER), U256::from(RELAYER_FUNDS));
        assert_eq!(fx.ledger.logs().len(), logs_before);
    }

    #[tokio::test]
    async fn test_single_call_revert_rolls_back() {
        let mut fx = Fixture::new();
        fx.ledger.register_contract(REVERTER, Arc::new(AlwaysRevert));
        let logs_before = fx.ledger.logs().len();
        let request = fx
            .client
            .sign_transaction(transfer(REVERTER, 10), U256::from(5u64), 0)
            .await
            .unwrap();
        let err = fx.execute(&request, 15).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Execution {
                leg: 0,
                target: REVERTER,
                ..
            }
        ));
        assert_eq!(fx.engine.current_nonce(fx.principal()), 0);
        assert_eq!(fx.ledger.balance_of(RELAYER), U256::from(RELAYER_FUNDS));
        assert_eq!(fx.ledger.balance_of(ENGINE), U256::ZERO);
        assert_eq!(fx.ledger.balance_of(fx.wallet), U256::ZERO);
        assert_eq!(fx.ledger.balance_of(REVERTER), U256::ZERO);
        assert_eq!(fx.ledger.logs().len(), logs_before);

        // Same nonce is still usable once the target behaves.
        let retry = fx
            .client
            .sign_transaction(transfer(TARGET, 10), U256::from(5u64), 0)
            .await
            .unwrap();
        fx.execute(&retry, 15).unwrap();
        assert_eq!(fx.engine.current_nonce(fx.principal()), 1);
    }

    #[tokio::test]
    async fn test_fee_pull_failure_reverts_forwarded_call() {
        let mut fx = Fixture::with_config(EngineConfig {
            token_fee_fallback: true,
            ..engine_config()
        });
        let principal = fx.principal();
        fx.ledger.mint_token(TOKEN, principal, U256::from(50u64)).unwrap();
        fx.ledger.mint_token(TOKEN, fx.wallet, U256::from(10u64)).unwrap();
        let logs_before = fx.ledger.logs().len();

        let payload = IERC20::transferCall {
            to: TARGET,
            amount: U256::from(10u64),
        }
        .abi_encode();
        let request = fx
            .client
            .sign_transaction(Call::new(TOKEN, payload, U256::ZERO), U256::from(5u64), 0)
            .await
            .unwrap();
        // No allowance granted to the engine, so the pull fails after forwarding.
        let err = fx.execute(&request, 0).unwrap_err();
        assert!(matches!(
            err,
            EngineError::FeeSettlement(LedgerError::InsufficientAllowance { .. })
        ));
        assert_eq!(fx.engine.current_nonce(principal), 0);
        assert_eq!(fx.ledger.token_balance_of(TOKEN, TARGET), U256::ZERO);
        assert_eq!(fx.ledger.token_balance_of(TOKEN, fx.wallet), U256::from(10u64));
        assert_eq!(fx.ledger.token_balance_of(TOKEN, principal), U256::from(50u64));
        assert_eq!(fx.ledger.token_balance_of(TOKEN, RELAYER), U256::ZERO);
        assert_eq!(fx.ledger.logs().len(), logs_before);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reverted_batch_is_not_logged_as_executed() {
        let mut fx = Fixture::with_config(EngineConfig {
            token_fee_fallback: true,
            ..engine_config()
        });
        let principal = fx.principal();
        fx.ledger.mint_token(TOKEN, principal, U256::from(50u64)).unwrap();
        fx.ledger.mint_token(TOKEN, fx.wallet, U256::from(10u64)).unwrap();
        let payload = IERC20::transferCall {
            to: TARGET,
            amount: U256::from(10u64),
        }
        .abi_encode();
        let request = fx
            .client
            .sign_batch(
                vec![Call::new(TOKEN, payload, U256::ZERO)],
                U256::from(5u64),
                0,
            )
            .await
            .unwrap();

        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let err = fx.execute_batch(&request, 0).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::FeeSettlement);
            assert!(!buffer.contents().contains("BatchExecuted"));

            fx.ledger
                .approve_token(TOKEN, principal, ENGINE, U256::from(5u64));
            fx.execute_batch(&request, 0).unwrap();
            assert!(buffer.contents().contains("BatchExecuted"));
        });
        assert_eq!(fx.last_event(), Some("BatchExecuted"));
    }

    #[tokio::test]
    async fn test_batch_shape_is_validated() {
        let mut fx = Fixture::new();
        let signature = Bytes::from(vec![0u8; 65]);
        let uneven = BatchMetaTransactionRequest {
            principal: fx.principal(),
            targets: vec![TARGET, OTHER_TARGET],
            payloads: vec![Bytes::new()],
            values: vec![U256::ZERO, U256::ZERO],
            fee: U256::ZERO,
            nonce: 0,
            signature: signature.clone(),
        };
        let err = fx.execute_batch(&uneven, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let empty = BatchMetaTransactionRequest {
            principal: fx.principal(),
            targets: vec![],
            payloads: vec![],
            values: vec![],
            fee: U256::ZERO,
            nonce: 0,
            signature,
        };
        let err = fx.execute_batch(&empty, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(fx.engine.current_nonce(fx.principal()), 0);
    }

    #[tokio::test]
    async fn test_batch_can_be_disabled() {
        let mut fx = Fixture::with_config(EngineConfig {
            batch_enabled: false,
            ..engine_config()
        });
        let request = fx
            .client
            .sign_batch(vec![transfer(TARGET, 1)], U256::ZERO, 0)
            .await
            .unwrap();
        let err = fx.execute_batch(&request, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_reentrant_execution_is_rejected() {
        let mut fx = Fixture::new();
        let inner = fx
            .client
            .sign_transaction(transfer(TARGET, 0), U256::ZERO, 1)
            .await
            .unwrap();
        let reenter = Arc::new(Reenter {
            engine: fx.engine.clone(),
            inner,
            observed: Mutex::new(None),
        });
        fx.ledger.register_contract(REVERTER, reenter.clone());

        let outer = fx
            .client
            .sign_transaction(transfer(REVERTER, 0), U256::ZERO, 0)
            .await
            .unwrap();
        fx.execute(&outer, 0).unwrap();

        assert_eq!(*reenter.observed.lock().unwrap(), Some(ErrorKind::Reentrancy));
        assert_eq!(fx.engine.current_nonce(fx.principal()), 1);
    }

    #[tokio::test]
    async fn test_token_fee_fallback() {
        let mut fx = Fixture::with_config(EngineConfig {
            token_fee_fallback: true,
            ..engine_config()
        });
        let principal = fx.principal();
        fx.ledger.mint_token(TOKEN, principal, U256::from(50u64)).unwrap();
        fx.ledger.mint_token(TOKEN, fx.wallet, U256::from(10u64)).unwrap();
        fx.ledger
            .approve_token(TOKEN, principal, ENGINE, U256::from(50u64));

        let payload = IERC20::transferCall {
            to: TARGET,
            amount: U256::from(10u64),
        }
        .abi_encode();
        let request = fx
            .client
            .sign_transaction(Call::new(TOKEN, payload, U256::ZERO), U256::from(5u64), 0)
            .await
            .unwrap();
        fx.execute(&request, 0).unwrap();

        assert_eq!(fx.ledger.token_balance_of(TOKEN, TARGET), U256::from(10u64));
        assert_eq!(fx.ledger.token_balance_of(TOKEN, RELAYER), U256::from(5u64));
        assert_eq!(fx.ledger.token_balance_of(TOKEN, principal), U256::from(45u64));
        assert_eq!(fx.ledger.balance_of(RELAYER), U256::from(RELAYER_FUNDS));
    }

    #[tokio::test]
    async fn test_token_fee_requires_fallback_enabled() {
        let mut fx = Fixture::new();
        fx.ledger.mint_token(TOKEN, fx.wallet, U256::from(10u64)).unwrap();
        let payload = IERC20::transferCall {
            to: TARGET,
            amount: U256::from(10u64),
        }
        .abi_encode();
        let request = fx
            .client
            .sign_transaction(Call::new(TOKEN, payload, U256::ZERO), U256::from(5u64), 0)
            .await
            .unwrap();
        let err = fx.execute(&request, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    }

    #[tokio::test]
    async fn test_signed_deploy_consumes_nonce() {
        let mut fx = Fixture::new();
        let newcomer = RequestSigner::new(PrivateKeySigner::random(), &domain(31337));
        let expected = fx.engine.compute_wallet_address(newcomer.principal());
        assert!(!fx.engine.wallet(newcomer.principal()).deployed);

        let request = newcomer.sign_deploy(0).await.unwrap();
        let wallet = fx
            .engine
            .deploy_wallet_meta(&mut fx.ledger, RELAYER, &request)
            .unwrap();
        assert_eq!(wallet, expected);
        assert!(fx.engine.wallet(newcomer.principal()).deployed);
        assert_eq!(fx.engine.current_nonce(newcomer.principal()), 1);
        assert_eq!(fx.last_event(), Some("WalletDeployed"));

        let again = newcomer.sign_deploy(1).await.unwrap();
        let err = fx
            .engine
            .deploy_wallet_meta(&mut fx.ledger, RELAYER, &again)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyDeployed);
        assert_eq!(fx.engine.current_nonce(newcomer.principal()), 1);
    }

    #[test]
    fn test_deploy_for_others_requires_relayer() {
        let mut fx = Fixture::new();
        let principal = PrivateKeySigner::random().address();
        let err = fx
            .engine
            .deploy_wallet(&mut fx.ledger, TARGET, principal)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        let wallet = fx
            .engine
            .deploy_wallet(&mut fx.ledger, principal, principal)
            .unwrap();
        assert_eq!(wallet, fx.engine.compute_wallet_address(principal));
        let err = fx
            .engine
            .deploy_wallet(&mut fx.ledger, RELAYER, principal)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyDeployed);
    }

    #[test]
    fn test_relayer_administration() {
        let mut fx = Fixture::new();
        let err = fx
            .engine
            .add_relayer(&mut fx.ledger, RELAYER, OTHER_TARGET)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        fx.engine
            .add_relayer(&mut fx.ledger, ADMIN, OTHER_TARGET)
            .unwrap();
        assert!(fx.engine.is_relayer(OTHER_TARGET));
        assert_eq!(fx.last_event(), Some("RelayerAdded"));
        let err = fx
            .engine
            .add_relayer(&mut fx.ledger, ADMIN, OTHER_TARGET)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Registry);

        fx.engine
            .remove_relayer(&mut fx.ledger, ADMIN, OTHER_TARGET)
            .unwrap();
        assert!(!fx.engine.is_relayer(OTHER_TARGET));
        assert_eq!(fx.engine.relayers(), vec![RELAYER]);
        assert_eq!(fx.last_event(), Some("RelayerRemoved"));
    }

    #[test]
    fn test_fee_recipient_is_admin_only() {
        let mut fx = Fixture::new();
        let err = fx
            .engine
            .set_fee_recipient(&mut fx.ledger, RELAYER, Some(RELAYER))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(fx.engine.fee_recipient(), None);
        fx.engine
            .set_fee_recipient(&mut fx.ledger, ADMIN, Some(FEE_SINK))
            .unwrap();
        assert_eq!(fx.engine.fee_recipient(), Some(FEE_SINK));
        assert_eq!(fx.last_event(), Some("FeeRecipientChanged"));
    }

    #[test]
    fn test_queries_are_deterministic() {
        let a = MetaTxEngine::new(engine_config());
        let b = MetaTxEngine::new(engine_config());
        let principal = PrivateKeySigner::random().address();
        assert_eq!(
            a.compute_wallet_address(principal),
            b.compute_wallet_address(principal)
        );
        assert_eq!(a.domain_separator(), b.domain_separator());
        let payload = bytes!("c0ffee");
        assert_eq!(
            a.transaction_digest(principal, TARGET, &payload, U256::from(1u64), U256::ZERO, 0),
            b.transaction_digest(principal, TARGET, &payload, U256::from(1u64), U256::ZERO, 0)
        );
        assert_ne!(a.deploy_digest(principal, 0), a.deploy_digest(principal, 1));
    }
}
