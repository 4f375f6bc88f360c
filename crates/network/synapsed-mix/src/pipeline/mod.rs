//! Multi-channel worker pipeline.
//!
//! Each direction runs one distributor thread and a fixed pool of workers
//! connected by a bounded ready queue. Channels are processed in parallel;
//! messages of one channel are processed strictly in arrival order.

pub mod stats;
pub mod worker;

pub use stats::{DirectionSnapshot, DirectionStats, PipelineStats, PipelineStatsSnapshot};
pub use worker::PipelineMessage;

use crate::channel::{ChannelRegistry, ChannelSlot};
use crate::codec::Recoder;
use crate::config::MixConfig;
use crate::error::{MixError, Result};
use crate::transport::{MessageSource, OutputStrategy};
use crate::types::{Reply, Request};
use crossbeam_channel::{bounded, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::info;

/// Entry point for starting a recoding pipeline.
#[derive(Debug)]
pub struct RecodingPipeline;

impl RecodingPipeline {
    /// Spawns the distributor and worker threads of both directions.
    ///
    /// The request direction always runs. The reply direction runs when a
    /// reply source is given, which requires a duplex configuration. Threads
    /// exit once their source is closed and every queued message has been
    /// processed.
    pub fn start(
        config: &MixConfig,
        registry: Arc<ChannelRegistry>,
        recoder: Arc<Recoder>,
        request_source: Box<dyn MessageSource<Request>>,
        reply_source: Option<Box<dyn MessageSource<Reply>>>,
        output: Arc<dyn OutputStrategy>,
    ) -> Result<PipelineHandle> {
        config.validate()?;
        if reply_source.is_some() && !config.duplex {
            return Err(MixError::Configuration(
                "reply processing requires a duplex configuration".to_string(),
            ));
        }

        let pipeline = &config.pipeline;
        let stats = Arc::new(PipelineStats::default());
        let mut threads = Vec::new();

        spawn_direction(
            "request",
            pipeline.request_workers,
            pipeline.ready_queue_capacity,
            request_source,
            &registry,
            &recoder,
            &output,
            &stats,
            &mut threads,
        )?;
        if let Some(reply_source) = reply_source {
            spawn_direction(
                "reply",
                pipeline.reply_workers,
                pipeline.ready_queue_capacity,
                reply_source,
                &registry,
                &recoder,
                &output,
                &stats,
                &mut threads,
            )?;
        }

        let reporter = match pipeline.stats_interval {
            Some(interval) => {
                let (shutdown, shutdown_rx) = bounded::<()>(0);
                let stats = stats.clone();
                let handle = thread::Builder::new()
                    .name("mix-stats".to_string())
                    .spawn(move || stats::run_reporter(stats, interval, shutdown_rx))?;
                Some((shutdown, handle))
            }
            None => None,
        };

        info!(
            "Recoding pipeline started at {} with {} threads",
            recoder.address(),
            threads.len()
        );
        Ok(PipelineHandle {
            threads,
            reporter,
            stats,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_direction<M: PipelineMessage>(
    name: &str,
    workers: usize,
    ready_capacity: usize,
    source: Box<dyn MessageSource<M>>,
    registry: &Arc<ChannelRegistry>,
    recoder: &Arc<Recoder>,
    output: &Arc<dyn OutputStrategy>,
    stats: &Arc<PipelineStats>,
    threads: &mut Vec<JoinHandle<()>>,
) -> Result<()> {
    let (ready_tx, ready_rx) = bounded::<Arc<ChannelSlot>>(ready_capacity);

    for index in 0..workers {
        let ready_rx = ready_rx.clone();
        let recoder = recoder.clone();
        let output = output.clone();
        let stats = stats.clone();
        threads.push(
            thread::Builder::new()
                .name(format!("mix-{}-worker-{}", name, index))
                .spawn(move || worker::run_worker::<M>(index, ready_rx, recoder, output, stats))?,
        );
    }

    let registry = registry.clone();
    let stats = stats.clone();
    threads.push(
        thread::Builder::new()
            .name(format!("mix-{}-distributor", name))
            .spawn(move || worker::run_distributor::<M>(source, registry, ready_tx, stats))?,
    );
    Ok(())
}

/// Running pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    threads: Vec<JoinHandle<()>>,
    reporter: Option<(Sender<()>, JoinHandle<()>)>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    /// Current counters.
    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Waits for every thread to exit. Sources must be closed first.
    pub fn join(self) -> Result<PipelineStatsSnapshot> {
        let mut panicked = 0;
        for handle in self.threads {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if let Some((shutdown, handle)) = self.reporter {
            drop(shutdown);
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(MixError::Pipeline(format!("{} pipeline threads panicked", panicked)));
        }

        let snapshot = self.stats.snapshot();
        info!(
            "Recoding pipeline stopped: {} requests and {} replies forwarded",
            snapshot.request.processed, snapshot.reply.processed
        );
        Ok(snapshot)
    }
}
