//! Sphinx channel establishment.
//!
//! The establish message is a fixed-size header followed by the payload:
//!
//! ```text
//! alpha (32) ‖ beta (max_hops · 32) ‖ gamma (16) ‖ delta (4 + max_payload)
//! ```
//!
//! Each relay derives `s = alpha · y` from its secret `y`, checks gamma over
//! beta and delta, peels one routing block off beta, strips its pi layer off
//! delta and blinds alpha for the next hop. The message keeps the same length
//! at every hop. Channel keys are derived from `s`, so later messages use the
//! common channel layer with no asymmetric step.

use super::layers::{ClientHop, CipherMode};
use super::{CodecParams, NextHop, OpenedEstablish};
use crate::config::MixConfig;
use crate::crypto::key_derivation::{expand, labels};
use crate::crypto::kx::{blind_public, blinding_factor, KX_PUBLIC_SIZE};
use crate::crypto::padding::{self, pad_random, push_length_prefixed, LENGTH_PREFIX_LEN};
use crate::crypto::symmetric::{keystream, xor_in_place};
use crate::crypto::{compute_mac, verify_mac, ChannelKeys, KxPublic, KxSecret, SharedSecret};
use crate::directory::{MixPublicKey, Route};
use crate::error::{CryptoError, MixError, Result};
use crate::types::MixAddress;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Size of one routing block in beta.
pub const ROUTING_BLOCK_LEN: usize = 32;
/// Truncated header MAC.
pub const GAMMA_LEN: usize = 16;

const FLAG_FORWARD: u8 = 0x01;
const FLAG_EXIT: u8 = 0x02;
const STREAM_KEY_LEN: usize = 16;
const MU_KEY_LEN: usize = 32;
const TAG_LEN: usize = 8;

/// Sphinx codec.
#[derive(Debug, Clone)]
pub struct SphinxCodec {
    pub(crate) params: Arc<CodecParams>,
}

/// Keys one hop derives from its shared secret.
struct HopSecrets {
    rho: Vec<u8>,
    mu: Zeroizing<Vec<u8>>,
    pi: Vec<u8>,
}

impl HopSecrets {
    fn derive(shared: &SharedSecret, beta_len: usize, delta_len: usize) -> Result<Self> {
        let secret = shared.as_bytes();
        Ok(Self {
            rho: keystream(&expand(secret, labels::RHO, STREAM_KEY_LEN)?, beta_len + ROUTING_BLOCK_LEN)?,
            mu: expand(secret, labels::MU, MU_KEY_LEN)?,
            pi: keystream(&expand(secret, labels::PI, STREAM_KEY_LEN)?, delta_len)?,
        })
    }
}

fn routing_block(flag: u8, next_hop: u32, gamma: &[u8]) -> [u8; ROUTING_BLOCK_LEN] {
    let mut block = [0u8; ROUTING_BLOCK_LEN];
    block[0] = flag;
    block[1..5].copy_from_slice(&next_hop.to_be_bytes());
    block[ROUTING_BLOCK_LEN - GAMMA_LEN..].copy_from_slice(gamma);
    block
}

impl SphinxCodec {
    fn config(&self) -> &MixConfig {
        &self.params.config
    }

    fn beta_len(&self) -> usize {
        self.config().sphinx.max_hops * ROUTING_BLOCK_LEN
    }

    fn delta_len(&self) -> usize {
        LENGTH_PREFIX_LEN + self.config().max_payload
    }

    /// Length of an establish message; identical at every hop.
    pub fn establish_message_len(&self) -> usize {
        KX_PUBLIC_SIZE + self.beta_len() + GAMMA_LEN + self.delta_len()
    }

    /// Builds the header and payload, and the derived state of every hop.
    pub(crate) fn build_establish(&self, route: &Route, payload: &[u8]) -> Result<(Vec<u8>, Vec<ClientHop>)> {
        let config = self.config();
        let hop_count = route.len();
        let beta_len = self.beta_len();
        let delta_len = self.delta_len();
        if hop_count == 0 || hop_count > config.sphinx.max_hops {
            return Err(MixError::Configuration(format!(
                "Sphinx route of {} hops does not fit a {}-hop header",
                hop_count, config.sphinx.max_hops
            )));
        }

        // Per-hop shared secrets, alpha_0 and the hop secrets
        let mut blinded = KxSecret::generate();
        let alpha_0 = blinded.public();
        let mut shared_secrets = Vec::with_capacity(hop_count);
        for hop in route.hops() {
            let public_key: KxPublic = match &hop.public_key {
                MixPublicKey::Sphinx(key) => *key,
                MixPublicKey::Rsa(_) => {
                    return Err(MixError::Configuration(format!("{} has no Sphinx key", hop.address)))
                }
            };
            let alpha = blinded.public();
            let shared = blinded.shared_with(&public_key);
            if shared.is_degenerate() {
                return Err(CryptoError::KeyDerivation(format!("degenerate shared secret with {}", hop.address)).into());
            }
            blinded = blinded.blind(&blinding_factor(&alpha, &shared));
            shared_secrets.push(shared);
        }
        let secrets = shared_secrets
            .iter()
            .map(|s| HopSecrets::derive(s, beta_len, delta_len))
            .collect::<Result<Vec<_>>>()?;

        // Filler so the tail of beta stays consistent as relays shift it
        let mut filler = Vec::with_capacity(hop_count.saturating_sub(1) * ROUTING_BLOCK_LEN);
        for i in 1..hop_count {
            filler.extend_from_slice(&[0u8; ROUTING_BLOCK_LEN]);
            let start = beta_len - (i - 1) * ROUTING_BLOCK_LEN;
            xor_in_place(&mut filler, &secrets[i - 1].rho[start..beta_len + ROUTING_BLOCK_LEN]);
        }

        let mut delta = Vec::with_capacity(delta_len);
        push_length_prefixed(&mut delta, payload)?;
        pad_random(&mut delta, delta_len);

        let last = hop_count - 1;
        let open_len = beta_len - last * ROUTING_BLOCK_LEN;
        let mut beta = routing_block(FLAG_EXIT, MixAddress::EXIT, &[0u8; GAMMA_LEN]).to_vec();
        pad_random(&mut beta, open_len);
        xor_in_place(&mut beta, &secrets[last].rho[..open_len]);
        beta.extend_from_slice(&filler);

        xor_in_place(&mut delta, &secrets[last].pi);
        let mut gamma = compute_mac(&secrets[last].mu, &[&beta[..], &delta[..]], GAMMA_LEN)?;

        for i in (0..last).rev() {
            let mut outer = routing_block(FLAG_FORWARD, route.hops()[i + 1].address.0, &gamma).to_vec();
            outer.extend_from_slice(&beta[..beta_len - ROUTING_BLOCK_LEN]);
            xor_in_place(&mut outer, &secrets[i].rho[..beta_len]);
            beta = outer;

            xor_in_place(&mut delta, &secrets[i].pi);
            gamma = compute_mac(&secrets[i].mu, &[&beta[..], &delta[..]], GAMMA_LEN)?;
        }

        let mut wire = Vec::with_capacity(self.establish_message_len());
        wire.extend_from_slice(&alpha_0);
        wire.extend_from_slice(&beta);
        wire.extend_from_slice(&gamma);
        wire.extend_from_slice(&delta);

        let hops = shared_secrets
            .iter()
            .map(|s| {
                let keys = ChannelKeys::derive(s.as_bytes(), config)?;
                ClientHop::from_keys(&keys, CipherMode::Stream, config.crypto.symmetric)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((wire, hops))
    }

    /// Relay side: verifies and peels one hop. Nothing is committed here.
    pub(crate) fn open_establish(&self, secret: &KxSecret, wire: Vec<u8>) -> Result<OpenedEstablish> {
        let config = self.config();
        let beta_len = self.beta_len();
        let delta_len = self.delta_len();
        if wire.len() != self.establish_message_len() {
            return Err(CryptoError::MalformedEnvelope(format!(
                "Sphinx message is {} bytes, expected {}",
                wire.len(),
                self.establish_message_len()
            ))
            .into());
        }

        let (alpha_bytes, rest) = wire.split_at(KX_PUBLIC_SIZE);
        let (beta, rest) = rest.split_at(beta_len);
        let (gamma, delta) = rest.split_at(GAMMA_LEN);
        let mut alpha: KxPublic = [0u8; KX_PUBLIC_SIZE];
        alpha.copy_from_slice(alpha_bytes);

        let shared = secret.shared_with(&alpha);
        if shared.is_degenerate() {
            return Err(CryptoError::KeyDerivation("degenerate alpha".to_string()).into());
        }
        let secrets = HopSecrets::derive(&shared, beta_len, delta_len)?;
        verify_mac(&secrets.mu, &[beta, delta], gamma)?;
        let tag = expand(shared.as_bytes(), labels::TAG, TAG_LEN)?;

        let mut shifted = Vec::with_capacity(beta_len + ROUTING_BLOCK_LEN);
        shifted.extend_from_slice(beta);
        shifted.extend_from_slice(&[0u8; ROUTING_BLOCK_LEN]);
        xor_in_place(&mut shifted, &secrets.rho);
        let next_beta = shifted.split_off(ROUTING_BLOCK_LEN);
        let block = shifted;

        let mut next_delta = delta.to_vec();
        xor_in_place(&mut next_delta, &secrets.pi);

        let keys = ChannelKeys::derive(shared.as_bytes(), config)?;
        let state = super::layers::channel_state_from_keys(&keys, CipherMode::Stream, config.crypto.symmetric)?;

        let (next, payload) = match block[0] {
            FLAG_FORWARD => {
                let address = MixAddress(u32::from_be_bytes([block[1], block[2], block[3], block[4]]));
                let next_alpha = blind_public(&alpha, &blinding_factor(&alpha, &shared));
                let mut packet = Vec::with_capacity(wire.len());
                packet.extend_from_slice(&next_alpha);
                packet.extend_from_slice(&next_beta);
                packet.extend_from_slice(&block[ROUTING_BLOCK_LEN - GAMMA_LEN..]);
                packet.extend_from_slice(&next_delta);
                (NextHop::Forward(address), packet)
            }
            FLAG_EXIT => (NextHop::Exit, padding::read_length_prefixed(&next_delta)?.to_vec()),
            flag => return Err(MixError::Protocol(format!("unknown routing flag {:#04x}", flag))),
        };

        Ok(OpenedEstablish {
            state,
            replay_id: tag.to_vec(),
            timestamp: None,
            next,
            payload,
        })
    }
}
