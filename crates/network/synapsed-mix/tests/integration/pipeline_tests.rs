//! Worker pipeline: parallel channels, per-channel ordering and shutdown.

use crate::test_utils::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use synapsed_mix::{
    ChannelId, ChannelRegistry, MixAddress, MixConfig, MixError, QueueOutput, QueueSource, RecodingPipeline,
    Reply, Request, SchemeKind,
};

const MESSAGES_PER_CHANNEL: usize = 20;

fn pipeline_config(scheme: SchemeKind) -> MixConfig {
    let mut config = config_for(scheme);
    config.pipeline.request_workers = 4;
    config.pipeline.reply_workers = 2;
    config.pipeline.stats_interval = Some(Duration::from_millis(5));
    config
}

#[test]
fn test_parallel_channels_keep_their_order() {
    let net = TestNetwork::new(pipeline_config(SchemeKind::RsaAes));
    let entry = net.relay(MixAddress(0));
    let channels = [ChannelId(1), ChannelId(2)];
    let mut clients: Vec<_> = channels.iter().map(|_| net.open_cascade()).collect();

    let (requests, source) = QueueSource::unbounded();
    let (output, recoded, _replies) = QueueOutput::channels();
    let handle = RecodingPipeline::start(
        &net.config,
        entry.channels.clone(),
        entry.recoder.clone(),
        Box::new(source.with_max_batch(3)),
        None,
        Arc::new(output),
    )
    .unwrap();

    // Interleave the channels so both are in flight at once
    for n in 0..=MESSAGES_PER_CHANNEL {
        for (client, id) in clients.iter_mut().zip(channels) {
            let payload = format!("{}:{}", id, n);
            let wire = client.apply_layered_encryption(payload.as_bytes()).unwrap();
            requests.send(Request::new(id, wire)).unwrap();
        }
    }
    drop(requests);
    let stats = handle.join().unwrap();

    assert_eq!(stats.request.received, 42);
    assert_eq!(stats.request.processed, 42);
    assert_eq!(stats.request.dropped, 0);
    assert!(stats.request.lock_acquisitions >= 2);
    assert_eq!(stats.reply, Default::default());

    let mut per_channel: BTreeMap<ChannelId, Vec<Request>> = BTreeMap::new();
    for request in recoded.try_iter() {
        per_channel.entry(request.channel_id).or_default().push(request);
    }
    assert_eq!(per_channel.len(), 2);

    // The remaining hops only accept the stream in its original order
    let rest = [MixAddress(1), MixAddress(2)];
    for (id, requests) in per_channel {
        assert_eq!(requests.len(), MESSAGES_PER_CHANNEL + 1);
        for (n, request) in requests.into_iter().enumerate() {
            let outputs = net.trace(&rest, request);
            assert_eq!(outputs.len(), 2, "{} message {} dropped", id, n);
            assert_eq!(outputs[1].payload, format!("{}:{}", id, n).as_bytes());
        }
    }
}

#[test]
fn test_bad_messages_are_counted_and_dropped() {
    let net = TestNetwork::new(pipeline_config(SchemeKind::Sphinx));
    let entry = net.relay(MixAddress(0));
    let mut client = net.open_cascade();

    let (requests, source) = QueueSource::bounded(8);
    let (output, recoded, _replies) = QueueOutput::channels();
    let handle = RecodingPipeline::start(
        &net.config,
        entry.channels.clone(),
        entry.recoder.clone(),
        Box::new(source),
        None,
        Arc::new(output),
    )
    .unwrap();

    let wire = client.apply_layered_encryption(b"hello").unwrap();
    requests.send(Request::new(ChannelId(1), wire)).unwrap();
    requests
        .send(Request::new(ChannelId(2), vec![0u8; net.codec.establish_message_len(3)]))
        .unwrap();
    requests.send(Request::new(ChannelId(3), vec![1, 2, 3])).unwrap();
    drop(requests);

    let stats = handle.join().unwrap();
    assert_eq!(stats.request.received, 3);
    assert_eq!(stats.request.processed, 1);
    assert_eq!(stats.request.dropped, 2);
    assert_eq!(recoded.try_iter().count(), 1);
    assert_eq!(entry.channels.len(), 3);
}

#[test]
fn test_exit_pipeline_handles_replies() {
    let net = TestNetwork::new(pipeline_config(SchemeKind::Sphinx));
    let exit = net.relay(MixAddress(2));
    let mut client = net.open_cascade();
    let id = ChannelId(11);

    let (requests, request_source) = QueueSource::unbounded();
    let (replies, reply_source) = QueueSource::unbounded();
    let (output, recoded, sealed) = QueueOutput::channels();
    let handle = RecodingPipeline::start(
        &net.config,
        exit.channels.clone(),
        exit.recoder.clone(),
        Box::new(request_source),
        Some(Box::new(reply_source)),
        Arc::new(output),
    )
    .unwrap();

    // The first two hops run outside the pipeline
    let wire = client.apply_layered_encryption(b"hello").unwrap();
    let outputs = net.trace(&[MixAddress(0), MixAddress(1)], Request::new(id, wire));
    requests.send(outputs[1].clone()).unwrap();

    let delivered = recoded.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(delivered.payload, b"hello");

    replies.send(Reply::new(id, b"welcome".to_vec())).unwrap();
    let reply = sealed.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(reply.payload.len(), net.codec.reply_message_len(1));

    drop(requests);
    drop(replies);
    let stats = handle.join().unwrap();
    assert_eq!(stats.request.processed, 1);
    assert_eq!(stats.reply.processed, 1);

    let mut reply = reply;
    for address in [MixAddress(1), MixAddress(0)] {
        reply = net.relay(address).recode_reply(reply).unwrap();
    }
    assert_eq!(client.extract_payload(&reply.payload).unwrap(), b"welcome");
}

#[test]
fn test_reply_source_requires_duplex() {
    let mut config = pipeline_config(SchemeKind::Sphinx);
    config.duplex = false;
    let net = TestNetwork::new(config);
    let relay = net.relay(MixAddress(0));

    let (_requests, request_source) = QueueSource::<Request>::unbounded();
    let (_replies, reply_source) = QueueSource::<Reply>::unbounded();
    let (output, _, _) = QueueOutput::channels();
    let result = RecodingPipeline::start(
        &net.config,
        Arc::new(ChannelRegistry::new(16)),
        relay.recoder.clone(),
        Box::new(request_source),
        Some(Box::new(reply_source)),
        Arc::new(output),
    );
    assert!(matches!(result, Err(MixError::Configuration(_))));
}

#[test]
fn test_idle_pipeline_shuts_down() {
    let net = TestNetwork::new(pipeline_config(SchemeKind::Sphinx));
    let relay = net.relay(MixAddress(1));

    let (requests, source) = QueueSource::<Request>::unbounded();
    let (output, _, _) = QueueOutput::channels();
    let handle = RecodingPipeline::start(
        &net.config,
        relay.channels.clone(),
        relay.recoder.clone(),
        Box::new(source),
        None,
        Arc::new(output),
    )
    .unwrap();
    assert_eq!(handle.stats().request.received, 0);

    drop(requests);
    let stats = handle.join().unwrap();
    assert_eq!(stats, Default::default());
}
