//! Channel-message and reply layers shared by every scheme once a channel
//! is established.
//!
//! Channel message, per hop: `MAC ‖ len ‖ payload ‖ padding`, the MAC over
//! everything after it, sealed with the hop's request cipher. Reply, per hop:
//! the exit relay frames `len ‖ payload ‖ padding` and every relay seals with
//! its reply cipher; the client opens hop by hop from the entry mix inwards.

use crate::channel::ChannelData;
use crate::config::{MixConfig, SymmetricAlgorithm, BLOCK_SIZE};
use crate::crypto::padding::{self, align_up, pad_random, push_length_prefixed, LENGTH_PREFIX_LEN};
use crate::crypto::{compute_mac, verify_mac, ChannelCipher, ChannelKeys};
use crate::error::{CryptoError, MixError, Result};
use zeroize::Zeroizing;

/// How a scheme's channel ciphers behave across messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    /// Stateful AES-CTR; messages must arrive in order
    Stream,
    /// AES-CBC with a random first block; tolerates loss and reordering
    ExplicitIv,
}

impl CipherMode {
    /// Builds one direction's cipher.
    pub fn cipher(self, algorithm: SymmetricAlgorithm, key: &[u8], iv: &[u8]) -> Result<ChannelCipher> {
        match self {
            CipherMode::Stream => ChannelCipher::stream(algorithm, key, iv),
            CipherMode::ExplicitIv => ChannelCipher::explicit_iv(algorithm, key, iv),
        }
    }

    /// Bytes each sealed layer adds.
    pub fn overhead(self) -> usize {
        match self {
            CipherMode::Stream => 0,
            CipherMode::ExplicitIv => BLOCK_SIZE,
        }
    }
}

/// Client-side secrets of one hop of an established channel.
pub(crate) struct ClientHop {
    pub mac_key: Zeroizing<Vec<u8>>,
    pub request: ChannelCipher,
    pub reply: Option<ChannelCipher>,
}

impl ClientHop {
    pub fn from_keys(keys: &ChannelKeys, mode: CipherMode, algorithm: SymmetricAlgorithm) -> Result<Self> {
        let (request, reply) = ciphers_from_keys(keys, mode, algorithm)?;
        Ok(Self {
            mac_key: Zeroizing::new(keys.mac_key.clone()),
            request,
            reply,
        })
    }
}

/// Relay-side state for a freshly established channel. Routing fields are
/// filled in by the caller.
pub(crate) fn channel_state_from_keys(
    keys: &ChannelKeys,
    mode: CipherMode,
    algorithm: SymmetricAlgorithm,
) -> Result<ChannelData> {
    let (request, reply) = ciphers_from_keys(keys, mode, algorithm)?;
    Ok(ChannelData {
        mac_key: Some(Zeroizing::new(keys.mac_key.clone())),
        request_cipher: Some(request),
        reply_cipher: reply,
        next_hop: None,
        is_exit: false,
    })
}

fn ciphers_from_keys(
    keys: &ChannelKeys,
    mode: CipherMode,
    algorithm: SymmetricAlgorithm,
) -> Result<(ChannelCipher, Option<ChannelCipher>)> {
    let request = mode.cipher(algorithm, &keys.request_key, &keys.request_iv)?;
    let reply = if keys.is_duplex() {
        Some(mode.cipher(algorithm, &keys.reply_key, &keys.reply_iv)?)
    } else {
        None
    };
    Ok((request, reply))
}

/// Length of a channel message that still carries `layers` layers.
pub fn channel_message_len(config: &MixConfig, mode: CipherMode, layers: usize) -> usize {
    let mac_len = config.crypto.mac_len;
    let mut len = config.max_payload;
    for _ in 0..layers {
        len = align_up(mac_len + LENGTH_PREFIX_LEN + len, BLOCK_SIZE) + mode.overhead();
    }
    len
}

/// Length of a reply after `layers` relays have sealed it.
pub fn reply_message_len(config: &MixConfig, mode: CipherMode, layers: usize) -> usize {
    if layers == 0 {
        return 0;
    }
    align_up(LENGTH_PREFIX_LEN + config.max_payload, BLOCK_SIZE) + layers * mode.overhead()
}

/// Builds a channel message, innermost hop first.
pub(crate) fn seal_channel_message(hops: &mut [ClientHop], payload: &[u8], config: &MixConfig) -> Result<Vec<u8>> {
    let mac_len = config.crypto.mac_len;
    let last = hops.len().saturating_sub(1);
    let mut inner = payload.to_vec();

    for (index, hop) in hops.iter_mut().enumerate().rev() {
        let mut body = Vec::with_capacity(LENGTH_PREFIX_LEN + inner.len() + 2 * BLOCK_SIZE);
        push_length_prefixed(&mut body, &inner)?;
        if index == last {
            pad_random(&mut body, LENGTH_PREFIX_LEN + config.max_payload);
        }
        let target = align_up(mac_len + body.len(), BLOCK_SIZE) - mac_len;
        pad_random(&mut body, target);

        let mut plaintext = compute_mac(&hop.mac_key, &[&body[..]], mac_len)?;
        plaintext.extend_from_slice(&body);
        inner = hop.request.seal(plaintext)?;
    }
    Ok(inner)
}

/// Removes this relay's layer from a channel message.
///
/// A rejected message leaves the request cipher where it was, so injected
/// garbage cannot push a stream channel out of step with its client.
pub(crate) fn open_channel_message(channel: &mut ChannelData, data: Vec<u8>, config: &MixConfig) -> Result<Vec<u8>> {
    let mac_len = config.crypto.mac_len;
    let mac_key = channel
        .mac_key
        .as_ref()
        .ok_or_else(|| MixError::Protocol("channel message on unestablished channel".to_string()))?;
    let cipher = channel
        .request_cipher
        .as_mut()
        .ok_or_else(|| MixError::Protocol("channel has no request cipher".to_string()))?;

    let checkpoint = cipher.checkpoint()?;
    let opened = cipher.open(data).and_then(|plaintext| {
        if plaintext.len() < mac_len {
            return Err(CryptoError::MalformedEnvelope(format!(
                "channel message of {} bytes is shorter than its MAC",
                plaintext.len()
            ))
            .into());
        }
        let (mac, body) = plaintext.split_at(mac_len);
        verify_mac(mac_key, &[body], mac)?;
        Ok(padding::read_length_prefixed(body)?.to_vec())
    });
    if opened.is_err() {
        cipher.restore(checkpoint)?;
    }
    opened
}

/// Applies this relay's reply layer; the exit relay frames the payload first.
pub(crate) fn seal_reply(channel: &mut ChannelData, payload: Vec<u8>, config: &MixConfig) -> Result<Vec<u8>> {
    if !channel.is_established() {
        return Err(MixError::Protocol("reply on unestablished channel".to_string()));
    }
    let is_exit = channel.is_exit;
    let cipher = channel
        .reply_cipher
        .as_mut()
        .ok_or_else(|| MixError::Protocol("reply on simplex channel".to_string()))?;

    let data = if is_exit {
        if payload.len() > config.max_payload {
            return Err(MixError::Protocol(format!(
                "reply payload of {} bytes exceeds {}",
                payload.len(),
                config.max_payload
            )));
        }
        let mut framed = Vec::with_capacity(align_up(LENGTH_PREFIX_LEN + config.max_payload, BLOCK_SIZE));
        push_length_prefixed(&mut framed, &payload)?;
        pad_random(&mut framed, align_up(LENGTH_PREFIX_LEN + config.max_payload, BLOCK_SIZE));
        framed
    } else {
        payload
    };
    cipher.seal(data)
}

/// Removes every reply layer on the client, entry mix first.
pub(crate) fn open_reply(hops: &mut [ClientHop], reply: &[u8]) -> Result<Vec<u8>> {
    let mut data = reply.to_vec();
    for hop in hops.iter_mut() {
        let cipher = hop
            .reply
            .as_mut()
            .ok_or_else(|| MixError::Protocol("channel is simplex".to_string()))?;
        data = cipher.open(data)?;
    }
    Ok(padding::read_length_prefixed(&data)?.to_vec())
}
