//! Capability checks composed into the engine: pause switch, reentrancy lock and
//! administrator ownership.

use alloy_primitives::Address;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::EngineError;

#[derive(Debug, Default)]
pub struct PauseGuard {
    paused: AtomicBool,
}

impl PauseGuard {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn ensure_active(&self) -> Result<(), EngineError> {
        if self.is_paused() {
            Err(EngineError::Paused)
        } else {
            Ok(())
        }
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.paused
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| EngineError::InvalidState("already paused"))
    }

    pub fn unpause(&self) -> Result<(), EngineError> {
        self.paused
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| EngineError::InvalidState("not paused"))
    }
}

/// Busy flag held for the whole of a mutating operation.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    entered: AtomicBool,
}

impl ReentrancyGuard {
    pub fn enter(&self) -> Result<ReentrancyLock<'_>, EngineError> {
        self.entered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::Reentrancy)?;
        Ok(ReentrancyLock { guard: self })
    }

    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }
}

/// Releases the reentrancy flag when dropped, on success and error paths alike.
#[derive(Debug)]
pub struct ReentrancyLock<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for ReentrancyLock<'_> {
    fn drop(&mut self) {
        self.guard.entered.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OwnershipCheck {
    admin: Address,
}

impl OwnershipCheck {
    pub fn new(admin: Address) -> Self {
        Self { admin }
    }

    pub fn admin(&self) -> Address {
        self.admin
    }

    pub fn ensure_admin(&self, caller: Address, action: &'static str) -> Result<(), EngineError> {
        if caller == self.admin {
            Ok(())
        } else {
            Err(EngineError::Unauthorized { caller, action })
        }
    }
}
