//! RSA-OAEP block used for the first part of every establish envelope.

use crate::error::{CryptoError, Result};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// Encrypts exactly one OAEP block for a mix.
pub fn encrypt_block(public_key: &RsaPublicKey, block: &[u8]) -> Result<Vec<u8>> {
    let mut rng = rand::thread_rng();
    public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), block)
        .map_err(|e| CryptoError::Encryption(format!("RSA-OAEP: {}", e)).into())
}

/// RSA key pair held by a mix.
#[derive(Clone)]
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("bits", &(self.public.size() * 8))
            .finish_non_exhaustive()
    }
}

impl RsaKeyPair {
    /// Generates a fresh key pair.
    pub fn generate(bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CryptoError::KeyGeneration(format!("RSA-{}: {}", bits, e)))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// The public half, as published in the key directory.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Modulus size in bytes, which is also the ciphertext size.
    pub fn modulus_len(&self) -> usize {
        self.public.size()
    }

    /// Decrypts one OAEP block.
    pub fn decrypt_block(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() != self.modulus_len() {
            return Err(CryptoError::MalformedEnvelope(format!(
                "RSA block is {} bytes, expected {}",
                ciphertext.len(),
                self.modulus_len()
            ))
            .into());
        }
        self.private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|e| CryptoError::Decryption(format!("RSA-OAEP: {}", e)).into())
    }
}
