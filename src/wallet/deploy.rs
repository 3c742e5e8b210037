use alloy_primitives::Address;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

use crate::host::{Ledger, LedgerError};
use crate::wallet::derive::AddressDeriver;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DeploymentError {
    #[error("wallet for {principal} is already deployed at {wallet}")]
    AlreadyDeployed { principal: Address, wallet: Address },
    #[error("wallet creation failed: {0}")]
    Create(#[source] LedgerError),
    #[error("host created wallet at {actual}, derived address is {expected}")]
    AddressMismatch { expected: Address, actual: Address },
    #[error("no code at {0} after deployment")]
    MissingCode(Address),
}

/// A principal's wallet and whether it exists yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInstance {
    pub principal: Address,
    pub derived_address: Address,
    pub deployed: bool,
}

/// One-time wallet instantiation per principal.
pub struct DeploymentCoordinator<D> {
    deriver: D,
    deployed: Arc<DashMap<Address, Address>>,
}

impl<D: AddressDeriver> DeploymentCoordinator<D> {
    pub fn new(deriver: D) -> Self {
        Self {
            deriver,
            deployed: Arc::new(DashMap::new()),
        }
    }

    pub fn deriver(&self) -> &D {
        &self.deriver
    }

    pub fn is_deployed(&self, principal: Address) -> bool {
        self.deployed.contains_key(&principal)
    }

    pub fn instance(&self, principal: Address) -> WalletInstance {
        WalletInstance {
            principal,
            derived_address: self.deriver.derive(principal),
            deployed: self.is_deployed(principal),
        }
    }

    /// Creates the principal's wallet at its derived address.
    ///
    /// The deployed flag is written only after the host confirms code at the
    /// derived address. Callers run this inside a host checkpoint.
    #[instrument(skip_all, err, fields(principal = %principal))]
    pub fn deploy<H: Ledger + ?Sized>(
        &self,
        host: &mut H,
        principal: Address,
    ) -> Result<Address, DeploymentError> {
        let expected = self.deriver.derive(principal);
        if self.is_deployed(principal) {
            return Err(DeploymentError::AlreadyDeployed {
                principal,
                wallet: expected,
            });
        }
        let actual = host
            .create2(
                self.deriver.deployer(),
                self.deriver.salt(principal),
                self.deriver.init_code(principal),
            )
            .map_err(DeploymentError::Create)?;
        if actual != expected {
            return Err(DeploymentError::AddressMismatch { expected, actual });
        }
        if host.code_at(actual).is_empty() {
            return Err(DeploymentError::MissingCode(actual));
        }
        self.deployed.insert(principal, actual);
        tracing::debug!(%principal, wallet = %actual, "wallet deployed");
        Ok(actual)
    }
}
