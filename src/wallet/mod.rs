//! Per-principal smart wallets: deterministic addressing and one-time deployment.

pub mod deploy;
pub mod derive;

pub use deploy::{DeploymentCoordinator, DeploymentError, WalletInstance};
pub use derive::{AddressDeriver, CachingDeriver, Create2Deriver};
