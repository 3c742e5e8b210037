use alloy_primitives::{Address, B256, Bytes, keccak256};
use alloy_sol_types::SolValue;
use dashmap::DashMap;
use std::sync::Arc;

/// Deterministic mapping from principal to wallet address.
///
/// Implementations must be pure: the same principal always yields the same address,
/// before and after the wallet is deployed.
pub trait AddressDeriver: Send + Sync {
    /// Account that performs the CREATE2 deployment.
    fn deployer(&self) -> Address;

    fn salt(&self, principal: Address) -> B256;

    fn init_code(&self, principal: Address) -> Bytes;

    fn derive(&self, principal: Address) -> Address {
        let init_code = self.init_code(principal);
        self.deployer()
            .create2(self.salt(principal), keccak256(&init_code))
    }
}

/// CREATE2 derivation over a wallet template.
///
/// The salt is the principal left-padded to 32 bytes and the init code is the
/// template followed by the ABI-encoded principal, so each principal gets its own
/// wallet bound to its address.
#[derive(Debug, Clone)]
pub struct Create2Deriver {
    deployer: Address,
    template: Bytes,
}

impl Create2Deriver {
    pub fn new(deployer: Address, template: Bytes) -> Self {
        Self { deployer, template }
    }

    pub fn template(&self) -> &Bytes {
        &self.template
    }
}

impl AddressDeriver for Create2Deriver {
    fn deployer(&self) -> Address {
        self.deployer
    }

    fn salt(&self, principal: Address) -> B256 {
        principal.into_word()
    }

    fn init_code(&self, principal: Address) -> Bytes {
        let mut code = self.template.to_vec();
        code.extend_from_slice(&principal.abi_encode());
        code.into()
    }
}

/// Memoizes another deriver's results.
#[derive(Debug)]
pub struct CachingDeriver<D> {
    inner: D,
    cache: Arc<DashMap<Address, Address>>,
}

impl<D: AddressDeriver> CachingDeriver<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            cache: Arc::new(DashMap::new()),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl<D: AddressDeriver> AddressDeriver for CachingDeriver<D> {
    fn deployer(&self) -> Address {
        self.inner.deployer()
    }

    fn salt(&self, principal: Address) -> B256 {
        self.inner.salt(principal)
    }

    fn init_code(&self, principal: Address) -> Bytes {
        self.inner.init_code(principal)
    }

    fn derive(&self, principal: Address) -> Address {
        *self
            .cache
            .entry(principal)
            .or_insert_with(|| self.inner.derive(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, bytes};

    const DEPLOYER: Address = address!("0x00000000000000000000000000000000000e4e11");
    const ALICE: Address = address!("0x1111111111111111111111111111111111111111");
    const BOB: Address = address!("0x2222222222222222222222222222222222222222");

    #[test]
    fn test_derivation_is_deterministic() {
        let deriver = Create2Deriver::new(DEPLOYER, bytes!("60806040"));
        assert_eq!(deriver.derive(ALICE), deriver.derive(ALICE));
        assert_ne!(deriver.derive(ALICE), deriver.derive(BOB));
    }

    #[test]
    fn test_derivation_matches_create2_formula() {
        let deriver = Create2Deriver::new(DEPLOYER, bytes!("60806040"));
        let init_code = deriver.init_code(ALICE);
        assert_eq!(init_code.len(), 4 + 32);
        assert_eq!(&init_code[init_code.len() - 20..], ALICE.as_slice());
        let expected = DEPLOYER.create2_from_code(ALICE.into_word(), &init_code);
        assert_eq!(deriver.derive(ALICE), expected);
    }

    #[test]
    fn test_template_changes_address() {
        let a = Create2Deriver::new(DEPLOYER, bytes!("60806040"));
        let b = Create2Deriver::new(DEPLOYER, bytes!("60806041"));
        assert_ne!(a.derive(ALICE), b.derive(ALICE));
    }

    #[test]
    fn test_caching_deriver_agrees() {
        let plain = Create2Deriver::new(DEPLOYER, bytes!("60806040"));
        let cached = CachingDeriver::new(plain.clone());
        assert_eq!(cached.derive(ALICE), plain.derive(ALICE));
        assert_eq!(cached.derive(ALICE), plain.derive(ALICE));
        assert_eq!(cached.cached(), 1);
    }
}
