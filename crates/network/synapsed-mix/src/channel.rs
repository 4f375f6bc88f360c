//! Relay-side channel state and the registry that owns it.
//!
//! A [`ChannelData`] may only be touched by the worker holding its slot's
//! mutex, and that worker processes the channel's messages in arrival order.

use crate::crypto::ChannelCipher;
use crate::types::{ChannelId, MixAddress, Reply, Request};
use crossbeam_channel::{bounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

/// Cryptographic context of one channel at one relay.
#[derive(Default)]
pub struct ChannelData {
    /// MAC key of this hop, set once the channel is established
    pub mac_key: Option<Zeroizing<Vec<u8>>>,
    /// Cipher for requests
    pub request_cipher: Option<ChannelCipher>,
    /// Cipher for replies, absent on simplex channels
    pub reply_cipher: Option<ChannelCipher>,
    /// Where requests go next when the route is source-routed
    pub next_hop: Option<MixAddress>,
    /// Whether this relay terminates the route
    pub is_exit: bool,
}

impl std::fmt::Debug for ChannelData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelData")
            .field("established", &self.is_established())
            .field("duplex", &self.reply_cipher.is_some())
            .field("next_hop", &self.next_hop)
            .field("is_exit", &self.is_exit)
            .finish()
    }
}

impl ChannelData {
    /// Fresh, unestablished state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the establish message has been processed.
    pub fn is_established(&self) -> bool {
        self.mac_key.is_some()
    }
}

/// A channel's state together with its per-channel work queues.
pub struct ChannelSlot {
    id: ChannelId,
    data: Mutex<ChannelData>,
    requests: (Sender<Request>, Receiver<Request>),
    replies: (Sender<Reply>, Receiver<Reply>),
}

impl std::fmt::Debug for ChannelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSlot")
            .field("id", &self.id)
            .field("pending_requests", &self.requests.1.len())
            .field("pending_replies", &self.replies.1.len())
            .finish()
    }
}

impl ChannelSlot {
    /// Creates an unestablished slot with bounded queues.
    pub fn new(id: ChannelId, queue_capacity: usize) -> Self {
        Self {
            id,
            data: Mutex::new(ChannelData::new()),
            requests: bounded(queue_capacity),
            replies: bounded(queue_capacity),
        }
    }

    /// Channel id.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// The processing lock.
    pub fn data(&self) -> &Mutex<ChannelData> {
        &self.data
    }

    /// Producer side of the pending-request queue.
    pub fn request_sender(&self) -> &Sender<Request> {
        &self.requests.0
    }

    /// Consumer side of the pending-request queue.
    pub fn request_receiver(&self) -> &Receiver<Request> {
        &self.requests.1
    }

    /// Producer side of the pending-reply queue.
    pub fn reply_sender(&self) -> &Sender<Reply> {
        &self.replies.0
    }

    /// Consumer side of the pending-reply queue.
    pub fn reply_receiver(&self) -> &Receiver<Reply> {
        &self.replies.1
    }
}

/// Channels known to a relay, created lazily on the first message.
#[derive(Debug)]
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, Arc<ChannelSlot>>,
    queue_capacity: usize,
}

impl ChannelRegistry {
    /// Creates a registry whose slots have queues of `queue_capacity`.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// The slot for `id`, created if this is the first message of the channel.
    pub fn get_or_create(&self, id: ChannelId) -> Arc<ChannelSlot> {
        self.channels
            .entry(id)
            .or_insert_with(|| {
                debug!("Created channel {}", id);
                Arc::new(ChannelSlot::new(id, self.queue_capacity))
            })
            .clone()
    }

    /// The slot for `id`, if it exists.
    pub fn get(&self, id: ChannelId) -> Option<Arc<ChannelSlot>> {
        self.channels.get(&id).map(|slot| slot.clone())
    }

    /// Tears a channel down. Keys are wiped once the last worker lets go of the slot.
    pub fn remove(&self, id: ChannelId) -> Option<Arc<ChannelSlot>> {
        let removed = self.channels.remove(&id).map(|(_, slot)| slot);
        if removed.is_some() {
            debug!("Removed channel {}", id);
        }
        removed
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel exists.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
