//! Key agreement over the X25519 group for Sphinx headers.
//!
//! Scalars are reduced modulo the group order (no clamping) so that blinding
//! commutes: `(alpha · b) · y == (alpha · y) · b`.

use curve25519_dalek::constants::X25519_BASEPOINT;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use rand::RngCore;
use sha2::{Digest, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an encoded group element.
pub const KX_PUBLIC_SIZE: usize = 32;

/// Encoded group element (alpha or a mix public key).
pub type KxPublic = [u8; KX_PUBLIC_SIZE];

/// Secret scalar of a mix or of a client's header construction.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KxSecret(Scalar);

impl std::fmt::Debug for KxSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KxSecret(..)")
    }
}

impl KxSecret {
    /// Generates a uniformly random non-zero scalar.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let mut wide = [0u8; 64];
            rng.fill_bytes(&mut wide);
            let scalar = Scalar::from_bytes_mod_order_wide(&wide);
            wide.zeroize();
            if scalar != Scalar::ZERO {
                return Self(scalar);
            }
        }
    }

    /// The matching public group element.
    pub fn public(&self) -> KxPublic {
        (X25519_BASEPOINT * self.0).to_bytes()
    }

    /// Multiplies the secret by a blinding factor.
    pub fn blind(&self, factor: &Scalar) -> Self {
        Self(self.0 * factor)
    }

    /// `point · secret`.
    pub fn shared_with(&self, point: &KxPublic) -> SharedSecret {
        SharedSecret((MontgomeryPoint(*point) * self.0).to_bytes())
    }
}

/// Shared secret between a client and one mix.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(pub(crate) [u8; 32]);

impl SharedSecret {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// An all-zero secret comes from a small-order point and must be rejected.
    pub fn is_degenerate(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

/// Blinding factor `b = H(alpha ‖ s)`.
pub fn blinding_factor(alpha: &KxPublic, shared: &SharedSecret) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(b"synapsed-mix/sphinx/blind");
    hasher.update(alpha);
    hasher.update(shared.as_bytes());
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// `alpha · b`.
pub fn blind_public(alpha: &KxPublic, factor: &Scalar) -> KxPublic {
    (MontgomeryPoint(*alpha) * factor).to_bytes()
}
