//! Channel ciphers.
//!
//! A [`ChannelCipher`] is bound to one hop of one channel. The stateful
//! variant keeps a single AES-CTR keystream alive for the whole lifetime of the
//! channel, so both ends must process that channel's messages in the same
//! order. The explicit-IV variant re-keys CBC for every message and prepends a
//! random block, which lets messages be lost or reordered.

use crate::config::{SymmetricAlgorithm, BLOCK_SIZE};
use crate::error::{CryptoError, Result};
use aes::cipher::{
    block_padding::NoPadding, BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit,
    StreamCipher, StreamCipherSeek,
};
use aes::{Aes128, Aes256};
use rand::RngCore;
use zeroize::Zeroizing;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

enum Keystream {
    Aes128(Aes128Ctr),
    Aes256(Aes256Ctr),
}

impl Keystream {
    fn new(algorithm: SymmetricAlgorithm, key: &[u8], iv: &[u8]) -> Result<Self> {
        let invalid = |_| CryptoError::InvalidKeyLength(format!(
            "AES-CTR needs a {}-byte key and {}-byte IV, got {} and {}",
            algorithm.key_len(),
            BLOCK_SIZE,
            key.len(),
            iv.len()
        ));
        Ok(match algorithm {
            SymmetricAlgorithm::Aes128 => Keystream::Aes128(Aes128Ctr::new_from_slices(key, iv).map_err(invalid)?),
            SymmetricAlgorithm::Aes256 => Keystream::Aes256(Aes256Ctr::new_from_slices(key, iv).map_err(invalid)?),
        })
    }

    fn apply(&mut self, buf: &mut [u8]) -> Result<()> {
        let result = match self {
            Keystream::Aes128(c) => c.try_apply_keystream(buf),
            Keystream::Aes256(c) => c.try_apply_keystream(buf),
        };
        result.map_err(|_| CryptoError::Encryption("AES-CTR keystream exhausted".to_string()).into())
    }

    fn position(&self) -> Result<u64> {
        let result = match self {
            Keystream::Aes128(c) => c.try_current_pos::<u64>(),
            Keystream::Aes256(c) => c.try_current_pos::<u64>(),
        };
        result.map_err(|_| CryptoError::Encryption("AES-CTR position overflows u64".to_string()).into())
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        let result = match self {
            Keystream::Aes128(c) => c.try_seek(position),
            Keystream::Aes256(c) => c.try_seek(position),
        };
        result.map_err(|_| CryptoError::Encryption(format!("AES-CTR cannot seek to {}", position)).into())
    }
}

/// Keystream position saved by [`ChannelCipher::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(Option<u64>);

/// Symmetric state of one hop of one channel, for one direction.
pub struct ChannelCipher {
    inner: CipherState,
}

enum CipherState {
    Stream(Keystream),
    ExplicitIv {
        algorithm: SymmetricAlgorithm,
        key: Zeroizing<Vec<u8>>,
        iv: Zeroizing<Vec<u8>>,
    },
}

impl std::fmt::Debug for ChannelCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.inner {
            CipherState::Stream(_) => "stream",
            CipherState::ExplicitIv { .. } => "explicit-iv",
        };
        f.debug_struct("ChannelCipher").field("kind", &kind).finish_non_exhaustive()
    }
}

impl ChannelCipher {
    /// Stateful AES-CTR; the keystream continues across messages.
    pub fn stream(algorithm: SymmetricAlgorithm, key: &[u8], iv: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: CipherState::Stream(Keystream::new(algorithm, key, iv)?),
        })
    }

    /// AES-CBC with a fixed key/IV and a random first block per message.
    pub fn explicit_iv(algorithm: SymmetricAlgorithm, key: &[u8], iv: &[u8]) -> Result<Self> {
        if key.len() != algorithm.key_len() || iv.len() != BLOCK_SIZE {
            return Err(CryptoError::InvalidKeyLength(format!(
                "AES-CBC needs a {}-byte key and {}-byte IV, got {} and {}",
                algorithm.key_len(),
                BLOCK_SIZE,
                key.len(),
                iv.len()
            ))
            .into());
        }
        Ok(Self {
            inner: CipherState::ExplicitIv {
                algorithm,
                key: Zeroizing::new(key.to_vec()),
                iv: Zeroizing::new(iv.to_vec()),
            },
        })
    }

    /// Bytes added to every message by [`ChannelCipher::seal`].
    pub fn overhead(&self) -> usize {
        match self.inner {
            CipherState::Stream(_) => 0,
            CipherState::ExplicitIv { .. } => BLOCK_SIZE,
        }
    }

    /// Encrypts one message.
    pub fn seal(&mut self, mut data: Vec<u8>) -> Result<Vec<u8>> {
        match &mut self.inner {
            CipherState::Stream(keystream) => {
                keystream.apply(&mut data)?;
                Ok(data)
            }
            CipherState::ExplicitIv { algorithm, key, iv } => {
                let mut buf = vec![0u8; BLOCK_SIZE];
                rand::thread_rng().fill_bytes(&mut buf);
                buf.extend_from_slice(&data);
                match algorithm {
                    SymmetricAlgorithm::Aes128 => cbc_encrypt::<Aes128>(key, iv, &mut buf)?,
                    SymmetricAlgorithm::Aes256 => cbc_encrypt::<Aes256>(key, iv, &mut buf)?,
                }
                Ok(buf)
            }
        }
    }

    /// Current keystream position. Explicit-IV ciphers carry no state.
    pub fn checkpoint(&self) -> Result<Checkpoint> {
        match &self.inner {
            CipherState::Stream(keystream) => Ok(Checkpoint(Some(keystream.position()?))),
            CipherState::ExplicitIv { .. } => Ok(Checkpoint(None)),
        }
    }

    /// Rewinds to `checkpoint`, undoing messages that were opened but rejected.
    pub fn restore(&mut self, checkpoint: Checkpoint) -> Result<()> {
        match (&mut self.inner, checkpoint.0) {
            (CipherState::Stream(keystream), Some(position)) => keystream.seek(position),
            _ => Ok(()),
        }
    }

    /// Decrypts one message.
    pub fn open(&mut self, mut data: Vec<u8>) -> Result<Vec<u8>> {
        match &mut self.inner {
            CipherState::Stream(keystream) => {
                keystream.apply(&mut data)?;
                Ok(data)
            }
            CipherState::ExplicitIv { algorithm, key, iv } => {
                if data.len() < BLOCK_SIZE {
                    return Err(CryptoError::Decryption(format!(
                        "CBC message of {} bytes has no leading block",
                        data.len()
                    ))
                    .into());
                }
                match algorithm {
                    SymmetricAlgorithm::Aes128 => cbc_decrypt::<Aes128>(key, iv, &mut data)?,
                    SymmetricAlgorithm::Aes256 => cbc_decrypt::<Aes256>(key, iv, &mut data)?,
                }
                Ok(data.split_off(BLOCK_SIZE))
            }
        }
    }
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let len = buf.len();
    cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKeyLength("AES-CBC key or IV".to_string()))?
        .encrypt_padded_mut::<NoPadding>(buf, len)
        .map_err(|_| CryptoError::Encryption(format!("CBC input of {} bytes is not block aligned", len)))?;
    Ok(())
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let len = buf.len();
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKeyLength("AES-CBC key or IV".to_string()))?
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|_| CryptoError::Decryption(format!("CBC input of {} bytes is not block aligned", len)))?;
    Ok(())
}

/// Pseudo-random keystream of `len` bytes under a 16-byte key (zero IV).
///
/// Used for the Sphinx rho and pi transforms; every key is used once.
pub fn keystream(key: &[u8], len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    Keystream::new(SymmetricAlgorithm::Aes128, key, &[0u8; BLOCK_SIZE])?.apply(&mut out)?;
    Ok(out)
}

/// XORs `src` into `dst` (lengths must match).
pub fn xor_in_place(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}
