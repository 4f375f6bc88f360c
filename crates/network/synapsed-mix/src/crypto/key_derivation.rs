//! Per-hop channel keys and HKDF helpers.

use crate::config::MixConfig;
use crate::error::{CryptoError, Result};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Domain separation labels for HKDF.
pub mod labels {
    /// Keystream that encrypts the Sphinx routing block
    pub const RHO: &[u8] = b"synapsed-mix/sphinx/rho";
    /// Key of the Sphinx header MAC
    pub const MU: &[u8] = b"synapsed-mix/sphinx/mu";
    /// Keystream that encrypts the Sphinx payload
    pub const PI: &[u8] = b"synapsed-mix/sphinx/pi";
    /// Replay tag
    pub const TAG: &[u8] = b"synapsed-mix/sphinx/tag";
    /// Channel keys derived from a Sphinx shared secret
    pub const CHANNEL: &[u8] = b"synapsed-mix/channel";
}

/// Expands `secret` into `len` bytes under `label`.
pub fn expand(secret: &[u8], label: &[u8], len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut output = Zeroizing::new(vec![0u8; len]);
    Hkdf::<Sha256>::new(None, secret)
        .expand(label, &mut output)
        .map_err(|_| CryptoError::KeyDerivation(format!("HKDF-SHA256 cannot expand {} bytes", len)))?;
    Ok(output)
}

/// Symmetric material of one hop of a channel.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChannelKeys {
    /// MAC key for this hop
    pub mac_key: Vec<u8>,
    /// Request-direction key
    pub request_key: Vec<u8>,
    /// Request-direction IV
    pub request_iv: Vec<u8>,
    /// Reply-direction key, empty when the channel is simplex
    pub reply_key: Vec<u8>,
    /// Reply-direction IV, empty when the channel is simplex
    pub reply_iv: Vec<u8>,
}

impl std::fmt::Debug for ChannelKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelKeys")
            .field("duplex", &!self.reply_key.is_empty())
            .finish_non_exhaustive()
    }
}

impl ChannelKeys {
    /// Fresh random keys, as generated by a client for one hop.
    pub fn random(config: &MixConfig) -> Self {
        let mut rng = rand::thread_rng();
        let mut fill = |len: usize| {
            let mut v = vec![0u8; len];
            rng.fill_bytes(&mut v);
            v
        };
        let key_len = config.crypto.symmetric.key_len();
        let iv_len = config.crypto.iv_len;
        let (reply_key_len, reply_iv_len) = if config.duplex { (key_len, iv_len) } else { (0, 0) };
        Self {
            mac_key: fill(config.crypto.mac_key_len),
            request_key: fill(key_len),
            request_iv: fill(iv_len),
            reply_key: fill(reply_key_len),
            reply_iv: fill(reply_iv_len),
        }
    }

    /// Keys derived from a Sphinx shared secret.
    pub fn derive(secret: &[u8], config: &MixConfig) -> Result<Self> {
        let key_len = config.crypto.symmetric.key_len();
        let iv_len = config.crypto.iv_len;
        let mac_key_len = config.crypto.mac_key_len;
        let okm = expand(secret, labels::CHANNEL, mac_key_len + 2 * (key_len + iv_len))?;

        let mut offset = 0;
        let mut next = |len: usize| {
            let part = okm[offset..offset + len].to_vec();
            offset += len;
            part
        };
        let mac_key = next(mac_key_len);
        let request_key = next(key_len);
        let request_iv = next(iv_len);
        let (reply_key, reply_iv) = if config.duplex {
            (next(key_len), next(iv_len))
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(Self {
            mac_key,
            request_key,
            request_iv,
            reply_key,
            reply_iv,
        })
    }

    /// Whether reply keys are present.
    pub fn is_duplex(&self) -> bool {
        !self.reply_key.is_empty()
    }

    /// Serialized length of the secret fields in establish headers.
    pub fn encoded_len(&self) -> usize {
        self.mac_key.len()
            + self.request_key.len()
            + self.request_iv.len()
            + self.reply_key.len()
            + self.reply_iv.len()
    }

    /// Appends `mac_key ‖ req_key ‖ req_iv [‖ reply_key ‖ reply_iv]`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.mac_key);
        buf.extend_from_slice(&self.request_key);
        buf.extend_from_slice(&self.request_iv);
        buf.extend_from_slice(&self.reply_key);
        buf.extend_from_slice(&self.reply_iv);
    }

    /// Parses the fields written by [`ChannelKeys::encode_into`].
    pub fn decode_from(cursor: &mut &[u8], config: &MixConfig) -> Result<Self> {
        use crate::crypto::padding::take;

        let key_len = config.crypto.symmetric.key_len();
        let iv_len = config.crypto.iv_len;
        let mac_key = take(cursor, config.crypto.mac_key_len, "MAC key")?.to_vec();
        let request_key = take(cursor, key_len, "request key")?.to_vec();
        let request_iv = take(cursor, iv_len, "request IV")?.to_vec();
        let (reply_key, reply_iv) = if config.duplex {
            (
                take(cursor, key_len, "reply key")?.to_vec(),
                take(cursor, iv_len, "reply IV")?.to_vec(),
            )
        } else {
            (Vec::new(), Vec::new())
        };
        Ok(Self {
            mac_key,
            request_key,
            request_iv,
            reply_key,
            reply_iv,
        })
    }
}
