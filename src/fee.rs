//! Relayer reimbursement.
//!
//! The fee is paid from the native funding attached to the request when that
//! funding covers `value + fee`. Otherwise, if enabled, the fee is pulled in
//! token units from the principal using the allowance granted to the engine.
//! The choice is made before anything is forwarded and applied afterwards.

use alloy_primitives::{Address, U256};
use serde::Serialize;
use tracing::instrument;

use crate::error::EngineError;
use crate::host::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum FeePlan {
    Native,
    TokenPull { token: Address },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeeSettlement {
    token_fallback: bool,
}

impl FeeSettlement {
    pub fn new(token_fallback: bool) -> Self {
        Self { token_fallback }
    }

    pub fn token_fallback(&self) -> bool {
        self.token_fallback
    }

    /// Chooses how `fee` will be paid given `funding` native units for a request forwarding `value`.
    ///
    /// `fee_token` is the token the principal is interacting with, if any; only a token
    /// contract known to the host qualifies for the pull fallback.
    pub fn plan<H: Ledger + ?Sized>(
        &self,
        host: &H,
        funding: U256,
        value: U256,
        fee: U256,
        fee_token: Option<Address>,
    ) -> Result<FeePlan, EngineError> {
        let required = value
            .checked_add(fee)
            .ok_or_else(|| EngineError::InvalidRequest("value plus fee overflows".into()))?;
        if funding >= required {
            return Ok(FeePlan::Native);
        }
        let insufficient = EngineError::InsufficientFunds {
            required,
            provided: funding,
        };
        if funding < value || !self.token_fallback {
            return Err(insufficient);
        }
        match fee_token {
            Some(token) if host.is_token(token) => Ok(FeePlan::TokenPull { token }),
            _ => Err(insufficient),
        }
    }

    /// Pays `fee` to `recipient` according to `plan`. `engine` holds the native funding
    /// and is the spender for token pulls.
    #[instrument(skip_all, err, fields(plan = ?plan, fee = %fee, recipient = %recipient))]
    pub fn settle<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        plan: FeePlan,
        engine: Address,
        principal: Address,
        recipient: Address,
        fee: U256,
    ) -> Result<(), EngineError> {
        if fee.is_zero() {
            return Ok(());
        }
        match plan {
            FeePlan::Native => host
                .transfer(engine, recipient, fee)
                .map_err(EngineError::FeeSettlement),
            FeePlan::TokenPull { token } => host
                .token_transfer_from(token, engine, principal, recipient, fee)
                .map_err(EngineError::FeeSettlement),
        }
    }
}
