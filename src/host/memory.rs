//! In-process [`Ledger`] used by the development relay and tests.
//!
//! Holds native balances, deployed code, ERC-20 style tokens and the event log.
//! Checkpoints are full snapshots of that state kept on a stack.

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_sol_types::{SolInterface, SolValue, sol};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::events::{EngineEvent, LogEntry};
use crate::host::{Checkpoint, ForwardedCall, Ledger, LedgerError};

sol! {
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function approve(address spender, uint256 amount) external returns (bool);
        function transferFrom(address from, address to, uint256 amount) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
    }
}

pub use IERC20::IERC20Calls as TokenCall;

/// Execution context handed to a registered [`Contract`].
#[derive(Debug, Clone)]
pub struct CallContext {
    pub caller: Address,
    pub address: Address,
    pub payload: Bytes,
    pub value: U256,
}

/// Native behaviour attached to an account.
///
/// The ledger has already credited `ctx.value` to `ctx.address` when `invoke` runs,
/// and rolls every effect back if it returns `Err`.
pub trait Contract: Send + Sync {
    fn invoke(&self, host: &mut dyn Ledger, ctx: &CallContext) -> Result<Bytes, LedgerError>;
}

#[derive(Debug, Clone, Default)]
struct TokenState {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

impl TokenState {
    fn balance(&self, owner: &Address) -> U256 {
        self.balances.get(owner).copied().unwrap_or_default()
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> U256 {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or_default()
    }

    fn move_units(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        let available = self.balance(&from);
        if available < amount {
            return Err(LedgerError::Reverted(format!(
                "token {token}: balance of {from} is {available}, transfer of {amount}"
            )));
        }
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance(&to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { account: to })?;
        self.balances.insert(from, available - amount);
        self.balances.insert(to, credited);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct WorldState {
    balances: HashMap<Address, U256>,
    code: HashMap<Address, Bytes>,
    tokens: HashMap<Address, TokenState>,
    logs: Vec<LogEntry>,
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: WorldState,
    snapshots: Vec<WorldState>,
    contracts: HashMap<Address, Arc<dyn Contract>>,
}

impl Debug for InMemoryLedger {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("accounts", &self.state.balances.len())
            .field("code", &self.state.code.len())
            .field("tokens", &self.state.tokens.len())
            .field("logs", &self.state.logs.len())
            .field("snapshots", &self.snapshots.len())
            .finish()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&mut self, account: Address, amount: U256) {
        self.state.balances.insert(account, amount);
    }

    /// Registers an ERC-20 style token at `token`. Existing holders are kept.
    pub fn create_token(&mut self, token: Address) {
        self.state.tokens.entry(token).or_default();
        self.state
            .code
            .entry(token)
            .or_insert_with(|| Bytes::from_static(b"erc20"));
    }

    /// Credits `amount` new units to `holder`, creating the token if needed.
    pub fn mint_token(
        &mut self,
        token: Address,
        holder: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.create_token(token);
        let state = self
            .state
            .tokens
            .get_mut(&token)
            .ok_or(LedgerError::NotAToken(token))?;
        let minted = state
            .balance(&holder)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { account: holder })?;
        state.balances.insert(holder, minted);
        Ok(())
    }

    pub fn approve_token(&mut self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.create_token(token);
        if let Some(state) = self.state.tokens.get_mut(&token) {
            state.allowances.insert((owner, spender), amount);
        }
    }

    pub fn token_balance_of(&self, token: Address, holder: Address) -> U256 {
        self.state
            .tokens
            .get(&token)
            .map(|state| state.balance(&holder))
            .unwrap_or_default()
    }

    pub fn token_allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.state
            .tokens
            .get(&token)
            .map(|state| state.allowance(&owner, &spender))
            .unwrap_or_default()
    }

    /// Attaches `contract` behaviour to `address`.
    pub fn register_contract(&mut self, address: Address, contract: Arc<dyn Contract>) {
        self.contracts.insert(address, contract);
        self.state
            .code
            .entry(address)
            .or_insert_with(|| Bytes::from_static(b"native"));
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.state.logs
    }

    fn dispatch(&mut self, call: &ForwardedCall) -> Result<Bytes, LedgerError> {
        self.transfer(call.caller, call.target, call.value)?;
        if let Some(contract) = self.contracts.get(&call.target).cloned() {
            let ctx = CallContext {
                caller: call.caller,
                address: call.target,
                payload: call.payload.clone(),
                value: call.value,
            };
            return contract.invoke(self, &ctx);
        }
        if self.state.tokens.contains_key(&call.target) {
            return self.token_call(call.target, call.caller, &call.payload);
        }
        Ok(Bytes::new())
    }

    fn token_call(
        &mut self,
        token: Address,
        caller: Address,
        payload: &Bytes,
    ) -> Result<Bytes, LedgerError> {
        let decoded = TokenCall::abi_decode(payload)
            .map_err(|e| LedgerError::Reverted(format!("token {token}: {e}")))?;
        let state = self
            .state
            .tokens
            .get_mut(&token)
            .ok_or(LedgerError::NotAToken(token))?;
        let output = match decoded {
            TokenCall::transfer(call) => {
                state.move_units(token, caller, call.to, call.amount)?;
                true.abi_encode()
            }
            TokenCall::approve(call) => {
                state.allowances.insert((caller, call.spender), call.amount);
                true.abi_encode()
            }
            TokenCall::transferFrom(call) => {
                let allowance = state.allowance(&call.from, &caller);
                if allowance < call.amount {
                    return Err(LedgerError::Reverted(format!(
                        "token {token}: allowance {allowance} below {}",
                        call.amount
                    )));
                }
                state.move_units(token, call.from, call.to, call.amount)?;
                state
                    .allowances
                    .insert((call.from, caller), allowance - call.amount);
                true.abi_encode()
            }
            TokenCall::balanceOf(call) => state.balance(&call.owner).abi_encode(),
        };
        Ok(Bytes::from(output))
    }
}

impl Ledger for InMemoryLedger {
    fn balance_of(&self, account: Address) -> U256 {
        self.state.balances.get(&account).copied().unwrap_or_default()
    }

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), LedgerError> {
        if amount.is_zero() || from == to {
            return Ok(());
        }
        let available = self.balance_of(from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: from,
                required: amount,
                available,
            });
        }
        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { account: to })?;
        self.state.balances.insert(from, available - amount);
        self.state.balances.insert(to, credited);
        Ok(())
    }

    fn call(&mut self, call: ForwardedCall) -> Result<Bytes, LedgerError> {
        let checkpoint = self.checkpoint();
        let result = self.dispatch(&call);
        match &result {
            Ok(_) => self.commit(checkpoint),
            Err(_) => self.revert_to(checkpoint),
        }
        result
    }

    fn code_at(&self, account: Address) -> Bytes {
        self.state.code.get(&account).cloned().unwrap_or_default()
    }

    fn create2(
        &mut self,
        deployer: Address,
        salt: B256,
        init_code: Bytes,
    ) -> Result<Address, LedgerError> {
        if init_code.is_empty() {
            return Err(LedgerError::EmptyInitCode);
        }
        let address = deployer.create2_from_code(salt, &init_code);
        if self.state.code.contains_key(&address) {
            return Err(LedgerError::CodeExists(address));
        }
        self.state.code.insert(address, init_code);
        Ok(address)
    }

    fn is_token(&self, account: Address) -> bool {
        self.state.tokens.contains_key(&account)
    }

    fn token_transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        owner: Address,
        recipient: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        let state = self
            .state
            .tokens
            .get_mut(&token)
            .ok_or(LedgerError::NotAToken(token))?;
        let allowance = state.allowance(&owner, &spender);
        if allowance < amount {
            return Err(LedgerError::InsufficientAllowance {
                token,
                owner,
                spender,
                required: amount,
                available: allowance,
            });
        }
        state.move_units(token, owner, recipient, amount)?;
        state.allowances.insert((owner, spender), allowance - amount);
        Ok(())
    }

    fn emit(&mut self, emitter: Address, event: EngineEvent) {
        self.state.logs.push(LogEntry { emitter, event });
    }

    fn checkpoint(&mut self) -> Checkpoint {
        self.snapshots.push(self.state.clone());
        Checkpoint::new(self.snapshots.len() - 1)
    }

    fn revert_to(&mut self, checkpoint: Checkpoint) {
        if checkpoint.id() >= self.snapshots.len() {
            return;
        }
        self.snapshots.truncate(checkpoint.id() + 1);
        if let Some(snapshot) = self.snapshots.pop() {
            self.state = snapshot;
        }
    }

    fn commit(&mut self, checkpoint: Checkpoint) {
        self.snapshots.truncate(checkpoint.id());
    }
}
