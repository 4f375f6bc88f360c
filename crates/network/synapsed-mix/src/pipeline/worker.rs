//! Distributor and worker loops of one direction.
//!
//! The distributor files each message into its channel's queue and then
//! announces the channel on the shared ready queue. A worker takes a channel,
//! locks it and drains its queue, so one channel is only ever processed by
//! one worker at a time and always in arrival order. Output is handed on
//! while the lock is still held, which keeps the order intact downstream.

use super::stats::PipelineStats;
use crate::channel::{ChannelData, ChannelRegistry, ChannelSlot};
use crate::codec::Recoder;
use crate::transport::{MessageSource, OutputStrategy};
use crate::types::{ChannelId, Direction, Reply, Request};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A message type the pipeline can carry.
pub trait PipelineMessage: Send + Sized + 'static {
    /// Direction this type travels in.
    const DIRECTION: Direction;

    /// Owning channel.
    fn channel_id(&self) -> ChannelId;

    /// The channel's pending queue for this direction.
    fn queue(slot: &ChannelSlot) -> (&Sender<Self>, &Receiver<Self>);

    /// Runs the recoder; `None` drops the message.
    fn recode(self, recoder: &Recoder, channel: &mut ChannelData) -> Option<Self>;

    /// Hands the recoded message downstream.
    fn deliver(self, output: &dyn OutputStrategy);
}

impl PipelineMessage for Request {
    const DIRECTION: Direction = Direction::Request;

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn queue(slot: &ChannelSlot) -> (&Sender<Self>, &Receiver<Self>) {
        (slot.request_sender(), slot.request_receiver())
    }

    fn recode(self, recoder: &Recoder, channel: &mut ChannelData) -> Option<Self> {
        recoder.recode_message(self, channel)
    }

    fn deliver(self, output: &dyn OutputStrategy) {
        output.add_request(self);
    }
}

impl PipelineMessage for Reply {
    const DIRECTION: Direction = Direction::Reply;

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn queue(slot: &ChannelSlot) -> (&Sender<Self>, &Receiver<Self>) {
        (slot.reply_sender(), slot.reply_receiver())
    }

    fn recode(self, recoder: &Recoder, channel: &mut ChannelData) -> Option<Self> {
        recoder.recode_reply(self, channel)
    }

    fn deliver(self, output: &dyn OutputStrategy) {
        output.add_reply(self);
    }
}

/// Pulls from the source until it closes. Dropping `ready` on return lets the
/// workers finish once the ready queue is drained.
pub(crate) fn run_distributor<M: PipelineMessage>(
    mut source: Box<dyn MessageSource<M>>,
    registry: Arc<ChannelRegistry>,
    ready: Sender<Arc<ChannelSlot>>,
    stats: Arc<PipelineStats>,
) {
    let stats = stats.direction(M::DIRECTION);
    while let Some(batch) = source.next_batch() {
        for message in batch {
            stats.record_received();
            let slot = registry.get_or_create(message.channel_id());
            if M::queue(&slot).0.send(message).is_err() {
                warn!("{} queue of channel {} closed", M::DIRECTION, slot.id());
                continue;
            }
            if ready.send(slot).is_err() {
                warn!("{} workers are gone, stopping distributor", M::DIRECTION);
                return;
            }
        }
    }
    info!("{} source closed, distributor exiting", M::DIRECTION);
}

/// Processes ready channels until the distributor hangs up.
pub(crate) fn run_worker<M: PipelineMessage>(
    worker: usize,
    ready: Receiver<Arc<ChannelSlot>>,
    recoder: Arc<Recoder>,
    output: Arc<dyn OutputStrategy>,
    stats: Arc<PipelineStats>,
) {
    let stats = stats.direction(M::DIRECTION);
    while let Ok(slot) = ready.recv() {
        let (mut channel, contended) = match slot.data().try_lock() {
            Some(guard) => (guard, false),
            None => (slot.data().lock(), true),
        };
        stats.record_lock(contended);

        let pending = M::queue(&slot).1;
        loop {
            match pending.try_recv() {
                Ok(message) => match message.recode(&recoder, &mut channel) {
                    Some(recoded) => {
                        stats.record_outcome(true);
                        recoded.deliver(output.as_ref());
                    }
                    None => stats.record_outcome(false),
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
    debug!("{} worker {} exiting", M::DIRECTION, worker);
}
