//! Layered recoding: client-side envelope construction and relay-side peeling.
//!
//! A [`LayeredCodec`] is chosen once from configuration. Clients open a
//! [`ClientChannel`] per route and call
//! [`ClientChannel::apply_layered_encryption`]; the first call produces a
//! channel-establish message and later calls produce channel messages. Each
//! relay runs a [`Recoder`], which either establishes the channel from the
//! incoming envelope or peels one layer of an established channel.
//!
//! Cryptographic failures never escape a relay. [`Recoder::recode_message`]
//! and [`Recoder::recode_reply`] log the reason and return `None`, so a bad
//! message cannot stall the worker that owns the channel.

pub mod layers;
pub mod rsa_aes;
pub mod sphinx;

pub use layers::CipherMode;
pub use rsa_aes::RsaAesCodec;
pub use sphinx::SphinxCodec;

use crate::channel::ChannelData;
use crate::config::{MixConfig, SchemeKind};
use crate::directory::{MixIdentity, MixSecret, Route};
use crate::error::{MixError, Result};
use crate::replay::{Clock, ReplayDetector, ReplayPolicy, SystemClock};
use crate::types::{ChannelId, Direction, MixAddress, Reply, Request};
use layers::ClientHop;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Configuration and clock shared by every channel of a codec.
pub(crate) struct CodecParams {
    pub config: MixConfig,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CodecParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecParams")
            .field("scheme", &self.config.scheme)
            .field("max_payload", &self.config.max_payload)
            .finish_non_exhaustive()
    }
}

/// Where an establish layer says the message goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextHop {
    Forward(MixAddress),
    Exit,
    /// Cascade routing: the relay's role decides
    Unspecified,
}

/// A verified establish layer, not yet committed to the channel.
pub(crate) struct OpenedEstablish {
    pub state: ChannelData,
    pub replay_id: Vec<u8>,
    pub timestamp: Option<u64>,
    pub next: NextHop,
    pub payload: Vec<u8>,
}

/// The channel scheme, selected at configuration time.
#[derive(Debug, Clone)]
pub enum LayeredCodec {
    /// RSA establish envelope, stateful AES-CTR channel
    RsaAes(RsaAesCodec),
    /// RSA establish envelope, AES-CBC channel tolerating loss
    RsaAesLossTolerant(RsaAesCodec),
    /// Sphinx establish header, stateful AES-CTR channel
    Sphinx(SphinxCodec),
}

impl LayeredCodec {
    /// Builds the codec for a validated configuration.
    pub fn new(config: MixConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let scheme = config.scheme;
        let params = Arc::new(CodecParams { config, clock });
        Ok(match scheme {
            SchemeKind::RsaAes => LayeredCodec::RsaAes(RsaAesCodec {
                params,
                mode: CipherMode::Stream,
            }),
            SchemeKind::RsaAesLossTolerant => LayeredCodec::RsaAesLossTolerant(RsaAesCodec {
                params,
                mode: CipherMode::ExplicitIv,
            }),
            SchemeKind::Sphinx => LayeredCodec::Sphinx(SphinxCodec { params }),
        })
    }

    /// Builds the codec with the wall clock.
    pub fn from_config(config: MixConfig) -> Result<Self> {
        Self::new(config, Arc::new(SystemClock))
    }

    fn params(&self) -> &CodecParams {
        match self {
            LayeredCodec::RsaAes(codec) | LayeredCodec::RsaAesLossTolerant(codec) => &codec.params,
            LayeredCodec::Sphinx(codec) => &codec.params,
        }
    }

    /// The configuration the codec was built from.
    pub fn config(&self) -> &MixConfig {
        &self.params().config
    }

    /// The scheme.
    pub fn scheme(&self) -> SchemeKind {
        self.config().scheme
    }

    /// Cipher mode of established channels.
    pub fn cipher_mode(&self) -> CipherMode {
        match self {
            LayeredCodec::RsaAes(codec) | LayeredCodec::RsaAesLossTolerant(codec) => codec.mode,
            LayeredCodec::Sphinx(_) => CipherMode::Stream,
        }
    }

    /// Opens a client channel over `route`. Keys are generated on the first
    /// message.
    pub fn open_channel(&self, route: Route) -> Result<ClientChannel> {
        let scheme = self.scheme();
        if let Some(hop) = route.hops().iter().find(|hop| !hop.public_key.supports(scheme)) {
            return Err(MixError::Configuration(format!(
                "{} has no key for scheme {:?}",
                hop.address, scheme
            )));
        }
        if scheme == SchemeKind::Sphinx && route.len() > self.config().sphinx.max_hops {
            return Err(MixError::Configuration(format!(
                "route of {} hops exceeds sphinx.max_hops {}",
                route.len(),
                self.config().sphinx.max_hops
            )));
        }
        debug!("Opened client channel over {} hops", route.len());
        Ok(ClientChannel {
            codec: self.clone(),
            route,
            hops: Vec::new(),
        })
    }

    /// Size of an establish message that still carries `layers` layers.
    pub fn establish_message_len(&self, layers: usize) -> usize {
        match self {
            LayeredCodec::RsaAes(codec) | LayeredCodec::RsaAesLossTolerant(codec) => {
                codec.establish_message_len(layers)
            }
            LayeredCodec::Sphinx(codec) => codec.establish_message_len(),
        }
    }

    /// Size of a channel message that still carries `layers` layers.
    pub fn channel_message_len(&self, layers: usize) -> usize {
        layers::channel_message_len(self.config(), self.cipher_mode(), layers)
    }

    /// Size of a reply after `layers` relays have sealed it.
    pub fn reply_message_len(&self, layers: usize) -> usize {
        layers::reply_message_len(self.config(), self.cipher_mode(), layers)
    }
}

/// Client end of one channel.
///
/// Holds the per-hop secrets between message construction and reply
/// extraction.
pub struct ClientChannel {
    codec: LayeredCodec,
    route: Route,
    hops: Vec<ClientHop>,
}

impl std::fmt::Debug for ClientChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientChannel")
            .field("scheme", &self.codec.scheme())
            .field("route", &self.route.addresses())
            .field("established", &self.is_established())
            .finish()
    }
}

impl ClientChannel {
    /// Wraps `payload` in one layer per hop, innermost hop first.
    ///
    /// Fails with [`MixError::PayloadTooLarge`] when the payload exceeds
    /// [`ClientChannel::max_payload_for_next_message`].
    pub fn apply_layered_encryption(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let max = self.max_payload_for_next_message();
        if payload.len() > max {
            return Err(MixError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        if self.is_established() {
            return layers::seal_channel_message(&mut self.hops, payload, self.codec.config());
        }

        let (wire, hops) = match &self.codec {
            LayeredCodec::RsaAes(codec) | LayeredCodec::RsaAesLossTolerant(codec) => {
                codec.build_establish(&self.route, payload)?
            }
            LayeredCodec::Sphinx(codec) => codec.build_establish(&self.route, payload)?,
        };
        self.hops = hops;
        trace!("Built establish message of {} bytes", wire.len());
        Ok(wire)
    }

    /// Peels every reply layer and returns the exit relay's payload.
    pub fn extract_payload(&mut self, reply: &[u8]) -> Result<Vec<u8>> {
        if !self.is_established() {
            return Err(MixError::Protocol("reply on a channel that was never established".to_string()));
        }
        if !self.codec.config().duplex {
            return Err(MixError::Protocol("reply on a simplex channel".to_string()));
        }
        layers::open_reply(&mut self.hops, reply)
    }

    /// Largest payload the next request may carry.
    pub fn max_payload_for_next_message(&self) -> usize {
        self.codec.config().max_payload
    }

    /// Largest payload a reply may carry.
    pub fn max_payload_for_next_reply(&self) -> usize {
        if self.codec.config().duplex {
            self.codec.config().max_payload
        } else {
            0
        }
    }

    /// Whether the establish message has been built.
    pub fn is_established(&self) -> bool {
        !self.hops.is_empty()
    }

    /// The route of this channel.
    pub fn route(&self) -> &Route {
        &self.route
    }
}

/// Position of a cascade relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayRole {
    /// Forwards to the next mix
    Intermediate,
    /// Terminates the route
    Exit,
}

/// Relay-side recoding for one mix.
pub struct Recoder {
    codec: LayeredCodec,
    identity: MixIdentity,
    replay: Option<Arc<ReplayDetector>>,
    role: RelayRole,
}

impl std::fmt::Debug for Recoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recoder")
            .field("scheme", &self.codec.scheme())
            .field("address", &self.identity.address)
            .field("replay_detection", &self.replay.is_some())
            .field("role", &self.role)
            .finish()
    }
}

impl Recoder {
    /// Creates the recoder of a mix.
    ///
    /// The identity must hold a key for the codec's scheme and the replay
    /// detector's policy must match it.
    pub fn new(
        codec: LayeredCodec,
        identity: MixIdentity,
        replay: Option<Arc<ReplayDetector>>,
        role: RelayRole,
    ) -> Result<Self> {
        let config = codec.config();
        match (&identity.secret, config.scheme) {
            (MixSecret::Rsa(pair), SchemeKind::RsaAes | SchemeKind::RsaAesLossTolerant) => {
                if pair.modulus_len() != config.crypto.asymmetric_ciphertext_len() {
                    return Err(MixError::Configuration(format!(
                        "{} has a {}-bit key, configuration expects {}",
                        identity.address,
                        pair.modulus_len() * 8,
                        config.crypto.rsa_key_bits
                    )));
                }
            }
            (MixSecret::Sphinx(_), SchemeKind::Sphinx) => {}
            (_, scheme) => {
                return Err(MixError::Configuration(format!(
                    "{} has no key for scheme {:?}",
                    identity.address, scheme
                )))
            }
        }
        if let Some(detector) = &replay {
            let timed = matches!(detector.policy(), ReplayPolicy::TimeWindow { .. });
            if timed != (config.scheme != SchemeKind::Sphinx) {
                return Err(MixError::Configuration(format!(
                    "replay policy {:?} does not fit scheme {:?}",
                    detector.policy(),
                    config.scheme
                )));
            }
        }
        Ok(Self {
            codec,
            identity,
            replay,
            role,
        })
    }

    /// The codec in use.
    pub fn codec(&self) -> &LayeredCodec {
        &self.codec
    }

    /// Address of this mix.
    pub fn address(&self) -> MixAddress {
        self.identity.address
    }

    /// Removes this mix's layer from a request.
    ///
    /// Returns `None` when the message must be dropped.
    pub fn recode_message(&self, request: Request, channel: &mut ChannelData) -> Option<Request> {
        let channel_id = request.channel_id;
        let result = if channel.is_established() {
            self.recode_channel_message(request, channel)
        } else {
            self.establish(request, channel)
        };
        self.drop_on_error(channel_id, Direction::Request, result)
    }

    /// Adds this mix's layer to a reply.
    ///
    /// Returns `None` when the reply must be dropped.
    pub fn recode_reply(&self, mut reply: Reply, channel: &mut ChannelData) -> Option<Reply> {
        let channel_id = reply.channel_id;
        let result = layers::seal_reply(channel, std::mem::take(&mut reply.payload), self.codec.config()).map(|payload| {
            reply.payload = payload;
            reply
        });
        self.drop_on_error(channel_id, Direction::Reply, result)
    }

    fn establish(&self, mut request: Request, channel: &mut ChannelData) -> Result<Request> {
        let wire = std::mem::take(&mut request.payload);
        let opened = match (&self.codec, &self.identity.secret) {
            (LayeredCodec::RsaAes(codec) | LayeredCodec::RsaAesLossTolerant(codec), MixSecret::Rsa(pair)) => {
                codec.open_establish(pair, wire)?
            }
            (LayeredCodec::Sphinx(codec), MixSecret::Sphinx(secret)) => codec.open_establish(secret, wire)?,
            _ => return Err(MixError::Configuration("identity does not match scheme".to_string())),
        };

        if let Some(detector) = &self.replay {
            detector.check(&opened.replay_id, opened.timestamp)?;
        }

        let mut state = opened.state;
        match opened.next {
            NextHop::Forward(address) => state.next_hop = Some(address),
            NextHop::Exit => state.is_exit = true,
            NextHop::Unspecified => state.is_exit = self.role == RelayRole::Exit,
        }
        *channel = state;
        debug!(
            "Established channel {} at {} (exit: {})",
            request.channel_id, self.identity.address, channel.is_exit
        );

        Ok(self.forward(request, opened.payload, channel))
    }

    fn recode_channel_message(&self, mut request: Request, channel: &mut ChannelData) -> Result<Request> {
        let wire = std::mem::take(&mut request.payload);
        let payload = layers::open_channel_message(channel, wire, self.codec.config())?;
        Ok(self.forward(request, payload, channel))
    }

    fn forward(&self, mut request: Request, payload: Vec<u8>, channel: &ChannelData) -> Request {
        request.dummy = channel.is_exit && payload.is_empty();
        request.next_hop = channel.next_hop;
        request.payload = payload;
        request
    }

    fn drop_on_error<T>(&self, channel_id: ChannelId, direction: Direction, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(MixError::Replay(reason)) => {
                warn!(
                    "Dropping {} on channel {} at {}: replay ({})",
                    direction, channel_id, self.identity.address, reason
                );
                None
            }
            Err(e) => {
                debug!(
                    "Dropping {} on channel {} at {}: {} ({})",
                    direction,
                    channel_id,
                    self.identity.address,
                    e.observable_type(),
                    e.classify()
                );
                None
            }
        }
    }
}
