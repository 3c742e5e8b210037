use alloy_primitives::Address;
use dashmap::DashSet;
use std::sync::Arc;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("relayer {0} is already registered")]
    AlreadyRegistered(Address),
    #[error("relayer {0} is not registered")]
    NotRegistered(Address),
}

/// Accounts allowed to submit meta-transactions.
///
/// Mutation is only reachable through the engine's administrator-gated operations.
#[derive(Clone, Debug, Default)]
pub struct RelayerRegistry {
    relayers: Arc<DashSet<Address>>,
}

impl RelayerRegistry {
    pub fn new<I: IntoIterator<Item = Address>>(initial: I) -> Self {
        let relayers = DashSet::new();
        for relayer in initial {
            relayers.insert(relayer);
        }
        Self {
            relayers: Arc::new(relayers),
        }
    }

    pub fn is_authorized(&self, relayer: &Address) -> bool {
        self.relayers.contains(relayer)
    }

    pub(crate) fn add(&self, relayer: Address) -> Result<(), RegistryError> {
        if self.relayers.insert(relayer) {
            Ok(())
        } else {
            Err(RegistryError::AlreadyRegistered(relayer))
        }
    }

    pub(crate) fn remove(&self, relayer: &Address) -> Result<(), RegistryError> {
        self.relayers
            .remove(relayer)
            .map(|_| ())
            .ok_or(RegistryError::NotRegistered(*relayer))
    }

    /// Snapshot of the registered relayers, sorted for stable output.
    pub fn list(&self) -> Vec<Address> {
        let mut relayers: Vec<Address> = self.relayers.iter().map(|r| *r).collect();
        relayers.sort();
        relayers
    }
}
