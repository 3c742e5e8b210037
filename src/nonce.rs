use alloy_primitives::Address;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("nonce for {principal} is {expected}, request carried {presented}")]
pub struct ReplayError {
    pub principal: Address,
    pub expected: u64,
    pub presented: u64,
}

/// Per-principal replay counters.
///
/// Each principal starts at nonce 0. [`NonceSequencer::check_and_advance`] compares and
/// increments under the principal's map entry lock, so two callers presenting the same
/// nonce can never both succeed.
///
/// Cloning is cheap and shares the same table.
#[derive(Clone, Debug, Default)]
pub struct NonceSequencer {
    nonces: Arc<DashMap<Address, u64>>,
}

impl NonceSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, principal: Address) -> u64 {
        self.nonces.get(&principal).map(|n| *n).unwrap_or(0)
    }

    /// Consumes `presented` if it equals the current nonce.
    ///
    /// The advance is provisional: dropping the returned reservation without calling
    /// [`NonceReservation::commit`] hands the nonce back. A mismatch leaves the counter untouched.
    pub fn check_and_advance(
        &self,
        principal: Address,
        presented: u64,
    ) -> Result<NonceReservation, ReplayError> {
        let mut entry = self.nonces.entry(principal).or_insert(0);
        let expected = *entry;
        if expected != presented || expected == u64::MAX {
            return Err(ReplayError {
                principal,
                expected,
                presented,
            });
        }
        *entry = expected + 1;
        drop(entry);
        tracing::trace!(%principal, nonce = presented, "nonce reserved");
        Ok(NonceReservation {
            nonces: Arc::clone(&self.nonces),
            principal,
            reserved: presented,
            committed: false,
        })
    }
}

/// A consumed nonce that is rolled back on drop unless committed.
#[derive(Debug)]
#[must_use = "dropping a reservation rolls the nonce back"]
pub struct NonceReservation {
    nonces: Arc<DashMap<Address, u64>>,
    principal: Address,
    reserved: u64,
    committed: bool,
}

impl NonceReservation {
    pub fn nonce(&self) -> u64 {
        self.reserved
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for NonceReservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(mut current) = self.nonces.get_mut(&self.principal) {
            if *current == self.reserved + 1 {
                *current = self.reserved;
                tracing::trace!(principal = %self.principal, nonce = self.reserved, "nonce released");
            }
        }
    }
}
