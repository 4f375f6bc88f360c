//! Boundary with the transport: where raw messages come from and where
//! recoded messages go.

use crate::types::{Reply, Request};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use tracing::trace;

/// Pull-based inbound queue.
pub trait MessageSource<M>: Send {
    /// Blocks for the next batch. `None` once the source is closed and drained.
    fn next_batch(&mut self) -> Option<Vec<M>>;
}

/// Consumer of successfully recoded messages (scheduling and forwarding).
pub trait OutputStrategy: Send + Sync {
    /// Hands a recoded request downstream.
    fn add_request(&self, request: Request);

    /// Hands a recoded reply downstream.
    fn add_reply(&self, reply: Reply);
}

/// [`MessageSource`] over a crossbeam channel. Closes when every sender is dropped.
#[derive(Debug)]
pub struct QueueSource<M> {
    receiver: Receiver<M>,
    max_batch: usize,
}

impl<M: Send> QueueSource<M> {
    /// Default number of messages returned per batch.
    pub const DEFAULT_BATCH: usize = 64;

    /// Wraps an existing receiver.
    pub fn new(receiver: Receiver<M>) -> Self {
        Self {
            receiver,
            max_batch: Self::DEFAULT_BATCH,
        }
    }

    /// Creates a bounded queue and returns its producer side with the source.
    pub fn bounded(capacity: usize) -> (Sender<M>, Self) {
        let (sender, receiver) = bounded(capacity);
        (sender, Self::new(receiver))
    }

    /// Creates an unbounded queue and returns its producer side with the source.
    pub fn unbounded() -> (Sender<M>, Self) {
        let (sender, receiver) = unbounded();
        (sender, Self::new(receiver))
    }

    /// Caps the batch size.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }
}

impl<M: Send> MessageSource<M> for QueueSource<M> {
    fn next_batch(&mut self) -> Option<Vec<M>> {
        let first = self.receiver.recv().ok()?;
        let mut batch = vec![first];
        while batch.len() < self.max_batch {
            match self.receiver.try_recv() {
                Ok(message) => batch.push(message),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        trace!("Pulled batch of {} messages", batch.len());
        Some(batch)
    }
}

/// [`OutputStrategy`] that pushes into unbounded crossbeam queues.
#[derive(Debug, Clone)]
pub struct QueueOutput {
    requests: Sender<Request>,
    replies: Sender<Reply>,
}

impl QueueOutput {
    /// Creates the output and the receivers the next stage reads from.
    pub fn channels() -> (Self, Receiver<Request>, Receiver<Reply>) {
        let (requests, request_rx) = unbounded();
        let (replies, reply_rx) = unbounded();
        (Self { requests, replies }, request_rx, reply_rx)
    }
}

impl OutputStrategy for QueueOutput {
    fn add_request(&self, request: Request) {
        if self.requests.send(request).is_err() {
            trace!("Request output closed, discarding");
        }
    }

    fn add_reply(&self, reply: Reply) {
        if self.replies.send(reply).is_err() {
            trace!("Reply output closed, discarding");
        }
    }
}
