//! Core message and addressing types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a channel (one per user circuit) as seen by a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Address of a mix as published in the key directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MixAddress(pub u32);

impl MixAddress {
    /// Wire marker meaning "this hop terminates the route".
    pub const EXIT: u32 = u32::MAX;

    /// Whether this address collides with the exit marker and cannot be routed to.
    pub fn is_reserved(self) -> bool {
        self.0 == Self::EXIT
    }

    /// Encodes an optional next hop into its wire form.
    pub fn encode(next: Option<MixAddress>) -> u32 {
        next.map(|a| a.0).unwrap_or(Self::EXIT)
    }

    /// Decodes the wire form; `None` means exit.
    pub fn decode(raw: u32) -> Option<MixAddress> {
        if raw == Self::EXIT {
            None
        } else {
            Some(MixAddress(raw))
        }
    }
}

impl fmt::Display for MixAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mix-{}", self.0)
    }
}

/// Processing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Client towards the last mix
    Request,
    /// Last mix back towards the client
    Reply,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => write!(f, "request"),
            Direction::Reply => write!(f, "reply"),
        }
    }
}

/// A request travelling from the client through the route.
///
/// The payload is rewritten in place at every hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Channel the message belongs to
    pub channel_id: ChannelId,
    /// Opaque bytes: ciphertext on the wire, plaintext after recoding
    pub payload: Vec<u8>,
    /// Next hop, set by relays when the route is source-routed
    pub next_hop: Option<MixAddress>,
    /// Set by the exit relay when the extracted payload was empty
    pub dummy: bool,
}

impl Request {
    /// Creates a request as it arrives from the transport.
    pub fn new(channel_id: ChannelId, payload: Vec<u8>) -> Self {
        Self {
            channel_id,
            payload,
            next_hop: None,
            dummy: false,
        }
    }
}

/// A reply travelling from the exit relay back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Channel the reply belongs to
    pub channel_id: ChannelId,
    /// Opaque bytes
    pub payload: Vec<u8>,
}

impl Reply {
    /// Creates a reply as it arrives from the transport.
    pub fn new(channel_id: ChannelId, payload: Vec<u8>) -> Self {
        Self { channel_id, payload }
    }
}
