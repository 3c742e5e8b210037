//! Boundary to the ledger that holds balances, code and logs.
//!
//! The engine never owns value. It drives a [`Ledger`] through transfers,
//! forwarded calls and CREATE2 deployment, and brackets each request in a
//! checkpoint so a failure anywhere undoes every host-side effect.

pub mod memory;

use alloy_primitives::{Address, B256, Bytes, U256};

use crate::events::EngineEvent;

pub use memory::{CallContext, Contract, InMemoryLedger};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance in {account}: required {required}, available {available}")]
    InsufficientBalance {
        account: Address,
        required: U256,
        available: U256,
    },
    #[error(
        "insufficient allowance on {token} from {owner} to {spender}: required {required}, available {available}"
    )]
    InsufficientAllowance {
        token: Address,
        owner: Address,
        spender: Address,
        required: U256,
        available: U256,
    },
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("{0} is not a token contract")]
    NotAToken(Address),
    #[error("code already exists at {0}")]
    CodeExists(Address),
    #[error("init code is empty")]
    EmptyInitCode,
    #[error("balance of {account} would overflow")]
    Overflow { account: Address },
}

/// A call issued by `caller` against `target`, carrying `value` native units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedCall {
    pub caller: Address,
    pub target: Address,
    pub payload: Bytes,
    pub value: U256,
}

/// Opaque handle to a host state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

impl Checkpoint {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn id(&self) -> usize {
        self.0
    }
}

/// Host execution environment.
///
/// A failed [`Ledger::call`] must leave no trace of the callee's effects. Checkpoints nest:
/// reverting to one discards every later checkpoint too.
pub trait Ledger {
    fn balance_of(&self, account: Address) -> U256;

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), LedgerError>;

    /// Executes `call` and returns its return data. `Err` means the call reverted.
    fn call(&mut self, call: ForwardedCall) -> Result<Bytes, LedgerError>;

    fn code_at(&self, account: Address) -> Bytes;

    /// Instantiates `init_code` at `CREATE2(deployer, salt, keccak256(init_code))`.
    fn create2(
        &mut self,
        deployer: Address,
        salt: B256,
        init_code: Bytes,
    ) -> Result<Address, LedgerError>;

    fn is_token(&self, account: Address) -> bool;

    /// Moves `amount` token units from `owner` to `recipient` against the allowance
    /// `owner` granted to `spender`.
    fn token_transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        owner: Address,
        recipient: Address,
        amount: U256,
    ) -> Result<(), LedgerError>;

    fn emit(&mut self, emitter: Address, event: EngineEvent);

    fn checkpoint(&mut self) -> Checkpoint;

    fn revert_to(&mut self, checkpoint: Checkpoint);

    fn commit(&mut self, checkpoint: Checkpoint);
}

/// Runs `f` inside a host checkpoint: committed on `Ok`, reverted on `Err`.
pub fn atomically<H, T, E, F>(host: &mut H, f: F) -> Result<T, E>
where
    H: Ledger + ?Sized,
    F: FnOnce(&mut H) -> Result<T, E>,
{
    let checkpoint = host.checkpoint();
    let result = f(host);
    match &result {
        Ok(_) => host.commit(checkpoint),
        Err(_) => host.revert_to(checkpoint),
    }
    result
}
