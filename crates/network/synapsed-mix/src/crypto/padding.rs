//! Length headers and random padding.
//!
//! Every layer carries its payload as `len (u32 BE) ‖ payload ‖ padding`; the
//! padding is random so padded regions are indistinguishable from ciphertext.

use crate::error::{CryptoError, MixError, Result};
use rand::RngCore;

/// Size of the length header.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Rounds `len` up to the next multiple of `block`.
pub fn align_up(len: usize, block: usize) -> usize {
    len.div_ceil(block) * block
}

/// Appends `len ‖ payload`.
pub fn push_length_prefixed(buf: &mut Vec<u8>, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| MixError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(())
}

/// Appends random bytes until `buf` is `target_len` long.
pub fn pad_random(buf: &mut Vec<u8>, target_len: usize) {
    if buf.len() >= target_len {
        return;
    }
    let start = buf.len();
    buf.resize(target_len, 0);
    rand::thread_rng().fill_bytes(&mut buf[start..]);
}

/// Reads `len ‖ payload` from the front of `buf`, ignoring trailing padding.
pub fn read_length_prefixed(buf: &[u8]) -> Result<&[u8]> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Err(CryptoError::MalformedEnvelope(format!(
            "{} bytes cannot hold a length header",
            buf.len()
        ))
        .into());
    }
    let (header, rest) = buf.split_at(LENGTH_PREFIX_LEN);
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    rest.get(..len).ok_or_else(|| {
        CryptoError::MalformedEnvelope(format!(
            "length header {} exceeds remaining {} bytes",
            len,
            rest.len()
        ))
        .into()
    })
}

/// Splits `n` bytes off the front of `buf`.
pub(crate) fn take<'a>(buf: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(CryptoError::MalformedEnvelope(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            n,
            buf.len()
        ))
        .into());
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

/// Reads a big-endian `u32` off the front of `buf`.
pub(crate) fn take_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    let bytes = take(buf, 4, what)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads a big-endian `u64` off the front of `buf`.
pub(crate) fn take_u64(buf: &mut &[u8], what: &str) -> Result<u64> {
    let bytes = take(buf, 8, what)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(raw))
}
