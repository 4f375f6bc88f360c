//! Hybrid RSA + AES channel establishment.
//!
//! Per hop the client writes
//!
//! ```text
//! MAC ‖ mac_key ‖ req_key ‖ req_iv [‖ reply_key ‖ reply_iv] ‖ timestamp
//!     [‖ next_hop] ‖ len ‖ payload ‖ padding
//! ```
//!
//! and sends `RSA(first A bytes) ‖ AES(rest)`, where `A` is the OAEP capacity
//! of the hop's key. All secrets sit in the RSA block, so the relay can build
//! its request cipher before it touches the symmetric part. The symmetric part
//! is sealed with the same request cipher that later carries channel messages.

use super::layers::{ClientHop, CipherMode};
use super::{CodecParams, NextHop, OpenedEstablish};
use crate::config::{RoutingMode, BLOCK_SIZE};
use crate::crypto::asymmetric::encrypt_block;
use crate::crypto::padding::{self, align_up, pad_random, push_length_prefixed, take, take_u32, take_u64, LENGTH_PREFIX_LEN};
use crate::crypto::{compute_mac, verify_mac, ChannelKeys, RsaKeyPair};
use crate::directory::{MixPublicKey, Route};
use crate::error::{CryptoError, MixError, Result};
use crate::replay::IDENTIFIER_LEN;
use crate::types::MixAddress;
use std::sync::Arc;
use zeroize::Zeroizing;

const TIMESTAMP_LEN: usize = 8;
const NEXT_HOP_LEN: usize = 4;

/// RSA/AES codec, stateful or loss tolerant depending on its cipher mode.
#[derive(Debug, Clone)]
pub struct RsaAesCodec {
    pub(crate) params: Arc<CodecParams>,
    pub(crate) mode: CipherMode,
}

impl RsaAesCodec {
    /// Cipher mode of the channels this codec builds.
    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// Plaintext bytes in front of the length prefix.
    fn header_len(&self) -> usize {
        let config = &self.params.config;
        let route_info = match config.routing {
            RoutingMode::SourceRouted => NEXT_HOP_LEN,
            RoutingMode::Cascade => 0,
        };
        config.establish_secret_len() + TIMESTAMP_LEN + route_info
    }

    /// Plaintext length of one hop given the size of what it wraps.
    fn layer_plaintext_len(&self, inner_len: usize) -> usize {
        let a_pt = self.params.config.crypto.asymmetric_plaintext_len();
        let unaligned = self.header_len() + LENGTH_PREFIX_LEN + inner_len;
        a_pt + align_up(unaligned.saturating_sub(a_pt), BLOCK_SIZE)
    }

    /// Length of an establish message that still carries `layers` layers.
    pub fn establish_message_len(&self, layers: usize) -> usize {
        let crypto = &self.params.config.crypto;
        let a_pt = crypto.asymmetric_plaintext_len();
        let a_ct = crypto.asymmetric_ciphertext_len();
        let mut len = self.params.config.max_payload;
        for _ in 0..layers {
            len = a_ct + (self.layer_plaintext_len(len) - a_pt) + self.mode.overhead();
        }
        len
    }

    /// Builds the establish message and the client-side state of every hop.
    pub(crate) fn build_establish(&self, route: &Route, payload: &[u8]) -> Result<(Vec<u8>, Vec<ClientHop>)> {
        let config = &self.params.config;
        let mac_len = config.crypto.mac_len;
        let a_pt = config.crypto.asymmetric_plaintext_len();
        let algorithm = config.crypto.symmetric;
        let timestamp = self.params.clock.now_millis();

        let keys: Vec<ChannelKeys> = route.hops().iter().map(|_| ChannelKeys::random(config)).collect();
        let mut hops = keys
            .iter()
            .map(|k| ClientHop::from_keys(k, self.mode, algorithm))
            .collect::<Result<Vec<_>>>()?;

        let last = route.len() - 1;
        let mut inner = payload.to_vec();
        for index in (0..route.len()).rev() {
            let public_key = match &route.hops()[index].public_key {
                MixPublicKey::Rsa(key) => key,
                MixPublicKey::Sphinx(_) => {
                    return Err(MixError::Configuration(format!(
                        "{} has no RSA key",
                        route.hops()[index].address
                    )))
                }
            };

            let mut plaintext = Zeroizing::new(vec![0u8; mac_len]);
            keys[index].encode_into(&mut plaintext);
            plaintext.extend_from_slice(&timestamp.to_be_bytes());
            if config.routing == RoutingMode::SourceRouted {
                let next = route.hops().get(index + 1).map(|hop| hop.address);
                plaintext.extend_from_slice(&MixAddress::encode(next).to_be_bytes());
            }

            let framed_start = plaintext.len();
            push_length_prefixed(&mut plaintext, &inner)?;
            if index == last {
                pad_random(&mut plaintext, framed_start + LENGTH_PREFIX_LEN + config.max_payload);
            }
            let target = self.layer_plaintext_len(plaintext.len() - framed_start - LENGTH_PREFIX_LEN);
            pad_random(&mut plaintext, target);

            let mac = compute_mac(&keys[index].mac_key, &[&plaintext[mac_len..]], mac_len)?;
            plaintext[..mac_len].copy_from_slice(&mac);

            let mut wire = encrypt_block(public_key, &plaintext[..a_pt])?;
            wire.extend_from_slice(&hops[index].request.seal(plaintext[a_pt..].to_vec())?);
            inner = wire;
        }

        Ok((inner, hops))
    }

    /// Relay side: decrypts and verifies one establish layer. Nothing is
    /// committed to the channel here.
    pub(crate) fn open_establish(&self, keypair: &RsaKeyPair, mut wire: Vec<u8>) -> Result<OpenedEstablish> {
        let config = &self.params.config;
        let mac_len = config.crypto.mac_len;
        let a_ct = keypair.modulus_len();
        if wire.len() < a_ct {
            return Err(CryptoError::MalformedEnvelope(format!(
                "establish message of {} bytes is shorter than the RSA block",
                wire.len()
            ))
            .into());
        }

        let symmetric = wire.split_off(a_ct);
        let mut plaintext = Zeroizing::new(keypair.decrypt_block(&wire)?);
        if plaintext.len() != config.crypto.asymmetric_plaintext_len() {
            return Err(CryptoError::MalformedEnvelope(format!(
                "RSA block carries {} bytes, expected {}",
                plaintext.len(),
                config.crypto.asymmetric_plaintext_len()
            ))
            .into());
        }

        let (mac, keys) = {
            let mut cursor = &plaintext[..];
            let mac = take(&mut cursor, mac_len, "MAC")?.to_vec();
            let keys = ChannelKeys::decode_from(&mut cursor, config)?;
            (mac, keys)
        };
        let mut state = super::layers::channel_state_from_keys(&keys, self.mode, config.crypto.symmetric)?;

        let cipher = state
            .request_cipher
            .as_mut()
            .ok_or_else(|| MixError::Protocol("establish produced no request cipher".to_string()))?;
        let opened = Zeroizing::new(cipher.open(symmetric)?);
        plaintext.extend_from_slice(&opened);
        verify_mac(&keys.mac_key, &[&plaintext[mac_len..]], &mac)?;

        let mut cursor = &plaintext[mac_len + keys.encoded_len()..];
        let timestamp = take_u64(&mut cursor, "timestamp")?;
        let next = match config.routing {
            RoutingMode::SourceRouted => match MixAddress::decode(take_u32(&mut cursor, "next hop")?) {
                Some(address) => NextHop::Forward(address),
                None => NextHop::Exit,
            },
            RoutingMode::Cascade => NextHop::Unspecified,
        };
        let payload = padding::read_length_prefixed(cursor)?.to_vec();

        Ok(OpenedEstablish {
            state,
            replay_id: keys.mac_key[..IDENTIFIER_LEN].to_vec(),
            timestamp: Some(timestamp),
            next,
            payload,
        })
    }
}
