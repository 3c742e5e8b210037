//! secp256k1 signer recovery over request digests.

use alloy_primitives::{Address, B256, Signature, U256, uint};
use tracing::instrument;

/// Half the secp256k1 group order. Signatures with `s` above it are malleable twins.
const SECP256K1_HALF_ORDER: U256 =
    uint!(0x7FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF5D576E7357A4501DDFE92F46681B20A0_U256);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature must be 64 or 65 bytes, got {0}")]
    InvalidLength(usize),
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("signature s value is in the upper half of the curve order")]
    HighS,
    #[error("signer recovery failed: {0}")]
    Recovery(String),
    #[error("signature mismatch: recovered {recovered}, expected {expected}")]
    Mismatch { recovered: Address, expected: Address },
}

/// Recovers signers of 65-byte `(r, s, v)` and 64-byte EIP-2098 compact signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureVerifier;

impl SignatureVerifier {
    pub fn recover(&self, digest: &B256, signature: &[u8]) -> Result<Address, SignatureError> {
        let signature = parse(signature)?;
        if signature.s() > SECP256K1_HALF_ORDER {
            return Err(SignatureError::HighS);
        }
        signature
            .recover_address_from_prehash(digest)
            .map_err(|e| SignatureError::Recovery(e.to_string()))
    }

    #[instrument(skip_all, err, fields(expected = %expected))]
    pub fn verify(
        &self,
        digest: &B256,
        signature: &[u8],
        expected: Address,
    ) -> Result<(), SignatureError> {
        let recovered = self.recover(digest, signature)?;
        if recovered != expected {
            return Err(SignatureError::Mismatch {
                recovered,
                expected,
            });
        }
        Ok(())
    }
}

fn parse(bytes: &[u8]) -> Result<Signature, SignatureError> {
    match bytes.len() {
        65 => Signature::from_raw(bytes).map_err(|e| SignatureError::Malformed(e.to_string())),
        64 => Ok(Signature::from_erc2098(bytes)),
        other => Err(SignatureError::InvalidLength(other)),
    }
}
