//! Pipeline counters and the optional contention reporter.

use crate::types::Direction;
use crossbeam_channel::{select, tick, Receiver};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Counters of one direction.
#[derive(Debug, Default)]
pub struct DirectionStats {
    /// Messages taken from the source
    pub received: AtomicU64,
    /// Messages recoded and forwarded
    pub processed: AtomicU64,
    /// Messages the recoder dropped
    pub dropped: AtomicU64,
    /// Channel locks taken by workers
    pub lock_acquisitions: AtomicU64,
    /// Channel locks that were already held by another worker
    pub contended_acquisitions: AtomicU64,
}

impl DirectionStats {
    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, forwarded: bool) {
        if forwarded {
            self.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_lock(&self, contended: bool) {
        self.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
        if contended {
            self.contended_acquisitions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy.
    pub fn snapshot(&self) -> DirectionSnapshot {
        DirectionSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            lock_acquisitions: self.lock_acquisitions.load(Ordering::Relaxed),
            contended_acquisitions: self.contended_acquisitions.load(Ordering::Relaxed),
        }
    }
}

/// Counters of both directions.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Request direction
    pub request: DirectionStats,
    /// Reply direction
    pub reply: DirectionStats,
}

impl PipelineStats {
    /// Counters of `direction`.
    pub fn direction(&self, direction: Direction) -> &DirectionStats {
        match direction {
            Direction::Request => &self.request,
            Direction::Reply => &self.reply,
        }
    }

    /// Point-in-time copy of both directions.
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            request: self.request.snapshot(),
            reply: self.reply.snapshot(),
        }
    }
}

/// Copy of [`DirectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectionSnapshot {
    /// Messages taken from the source
    pub received: u64,
    /// Messages recoded and forwarded
    pub processed: u64,
    /// Messages the recoder dropped
    pub dropped: u64,
    /// Channel locks taken by workers
    pub lock_acquisitions: u64,
    /// Channel locks that were already held
    pub contended_acquisitions: u64,
}

impl DirectionSnapshot {
    /// Share of lock acquisitions that had to wait.
    pub fn contention_ratio(&self) -> f64 {
        if self.lock_acquisitions == 0 {
            0.0
        } else {
            self.contended_acquisitions as f64 / self.lock_acquisitions as f64
        }
    }
}

/// Copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    /// Request direction
    pub request: DirectionSnapshot,
    /// Reply direction
    pub reply: DirectionSnapshot,
}

/// Logs contention ratios every `interval` until `shutdown` disconnects.
pub(crate) fn run_reporter(stats: Arc<PipelineStats>, interval: Duration, shutdown: Receiver<()>) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                let snapshot = stats.snapshot();
                info!(
                    "Pipeline contention: requests {:.3} ({} processed, {} dropped), replies {:.3} ({} processed, {} dropped)",
                    snapshot.request.contention_ratio(),
                    snapshot.request.processed,
                    snapshot.request.dropped,
                    snapshot.reply.contention_ratio(),
                    snapshot.reply.processed,
                    snapshot.reply.dropped
                );
            }
            recv(shutdown) -> _ => break,
        }
    }
}
