//! Signing identity derived from a seed value.

use std::fmt;

use alloy_core::primitives::{Address, B256, Bytes};
use k256::ecdsa::{Signature, SigningKey, signature::Signer};
use sha2::{Digest, Sha256};

use crate::error::CredentialError;

/// Opaque signing identity used to submit transactions.
///
/// The secret key is `sha256(seed)`; the account address is derived from the uncompressed
/// public key. The credential is never persisted and its `Debug` output only shows the address.
#[derive(Clone)]
pub struct Credential {
    signing_key: SigningKey,
    address: Address,
}

impl Credential {
    /// Derive a credential from a seed phrase or dev URI (e.g. `//Alice`).
    pub fn from_seed(seed: &str) -> Result<Self, CredentialError> {
        let seed = seed.trim();
        if seed.is_empty() {
            return Err(CredentialError::EmptySeed);
        }

        let secret: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
        let signing_key =
            SigningKey::from_bytes(&secret.into()).map_err(|_| CredentialError::InvalidKey)?;

        // Skip the 0x04 uncompressed marker.
        let public_key = signing_key.verifying_key().to_encoded_point(false);
        let address = Address::from_raw_public_key(&public_key.as_bytes()[1..]);

        Ok(Self {
            signing_key,
            address,
        })
    }

    /// The account address of this credential.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a transaction digest, returning the 64-byte `r || s` signature.
    pub fn sign(&self, digest: &B256) -> Bytes {
        let signature: Signature = self.signing_key.sign(digest.as_slice());
        Bytes::copy_from_slice(&signature.to_bytes())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
