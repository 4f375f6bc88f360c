//! Truncated HMAC-SHA256.

use crate::error::{CryptoError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Computes HMAC-SHA256 over the concatenation of `parts`, truncated to `mac_len`.
pub fn compute_mac(key: &[u8], parts: &[&[u8]], mac_len: usize) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength("HMAC key".to_string()))?;
    for part in parts {
        mac.update(part);
    }
    let mut tag = mac.finalize().into_bytes().to_vec();
    if mac_len > tag.len() {
        return Err(CryptoError::InvalidKeyLength(format!("MAC length {} exceeds 32", mac_len)).into());
    }
    tag.truncate(mac_len);
    Ok(tag)
}

/// Verifies a truncated MAC in constant time.
pub fn verify_mac(key: &[u8], parts: &[&[u8]], expected: &[u8]) -> Result<()> {
    let actual = compute_mac(key, parts, expected.len())?;
    if bool::from(actual.ct_eq(expected)) {
        Ok(())
    } else {
        Err(CryptoError::MacMismatch.into())
    }
}
