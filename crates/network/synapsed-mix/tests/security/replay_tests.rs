//! Replay detection as seen through the recoder.

use crate::test_utils::*;
use std::sync::Arc;
use std::time::Duration;
use synapsed_mix::{ChannelId, LayeredCodec, ManualClock, MixAddress, MixConfig, Request, SchemeKind};

#[test]
fn test_replayed_establish_dropped() {
    for scheme in [SchemeKind::RsaAes, SchemeKind::RsaAesLossTolerant, SchemeKind::Sphinx] {
        let net = TestNetwork::new(config_for(scheme));
        let mut client = net.open_cascade();
        let entry = net.relay(MixAddress(0));

        let wire = client.apply_layered_encryption(b"hello").unwrap();
        assert!(entry.recode_request(Request::new(ChannelId(1), wire.clone())).is_some());

        // Same bytes on a fresh channel
        assert!(
            entry.recode_request(Request::new(ChannelId(2), wire)).is_none(),
            "{:?}: replay accepted",
            scheme
        );
        let slot = entry.channels.get(ChannelId(2)).unwrap();
        assert!(!slot.data().lock().is_established());
    }
}

#[test]
fn test_replay_detected_at_every_hop() {
    let net = TestNetwork::new(config_for(SchemeKind::Sphinx));
    let mut client = net.open_cascade();
    let wire = client.apply_layered_encryption(b"hello").unwrap();
    let outputs = net.trace(&client.route().addresses(), Request::new(ChannelId(1), wire));

    // Replaying the middle hop's input is caught there
    let middle_input = outputs[0].payload.clone();
    assert!(net
        .relay(MixAddress(1))
        .recode_request(Request::new(ChannelId(2), middle_input))
        .is_none());
}

#[test]
fn test_replay_accepted_when_disabled() {
    let mut config = MixConfig::default();
    config.replay.enabled = false;
    let net = TestNetwork::new(config);
    let mut client = net.open_cascade();
    let route = client.route().addresses();

    let wire = client.apply_layered_encryption(b"hello").unwrap();
    let first = net.trace(&route, Request::new(ChannelId(1), wire.clone()));
    let second = net.trace(&route, Request::new(ChannelId(2), wire));
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 3);
    assert_eq!(second[2].payload, b"hello");
}

#[test]
fn test_expired_establish_dropped() {
    let net = TestNetwork::new(MixConfig::default());
    let mut client = net.open_cascade();
    let wire = client.apply_layered_encryption(b"hello").unwrap();

    // Older than tolerance plus maximum delay
    net.clock.advance(Duration::from_secs(311));
    assert!(net
        .relay(MixAddress(0))
        .recode_request(Request::new(ChannelId(1), wire))
        .is_none());
}

#[test]
fn test_delayed_establish_within_window_accepted() {
    let net = TestNetwork::new(MixConfig::default());
    let mut client = net.open_cascade();
    let wire = client.apply_layered_encryption(b"hello").unwrap();

    net.clock.advance(Duration::from_secs(200));
    let outputs = net.trace(&client.route().addresses(), Request::new(ChannelId(1), wire));
    assert_eq!(outputs.len(), 3);
}

#[test]
fn test_establish_from_the_future_dropped() {
    let net = TestNetwork::new(MixConfig::default());
    let ahead = Arc::new(ManualClock::new(START_MILLIS + 60_000));
    let codec = LayeredCodec::new(net.config.clone(), ahead).unwrap();
    let mut client = codec.open_channel(synapsed_mix::Route::cascade(&net.directory).unwrap()).unwrap();

    let wire = client.apply_layered_encryption(b"hello").unwrap();
    assert!(net
        .relay(MixAddress(0))
        .recode_request(Request::new(ChannelId(1), wire))
        .is_none());
}

#[test]
fn test_sphinx_tags_do_not_expire() {
    let net = TestNetwork::new(config_for(SchemeKind::Sphinx));
    let mut client = net.open_cascade();
    let entry = net.relay(MixAddress(0));
    let wire = client.apply_layered_encryption(b"hello").unwrap();
    assert!(entry.recode_request(Request::new(ChannelId(1), wire.clone())).is_some());

    net.clock.advance(Duration::from_secs(24 * 3600));
    assert!(entry.recode_request(Request::new(ChannelId(2), wire)).is_none());
}

#[test]
fn test_channel_messages_bypass_replay_detection() {
    // Only establish messages carry identifiers; a replayed channel message
    // fails on the stream cipher instead
    let net = TestNetwork::new(MixConfig::default());
    let mut client = net.open_cascade();
    let id = ChannelId(1);
    assert!(net.send(&mut client, id, b"hello").is_some());

    let wire = client.apply_layered_encryption(b"world").unwrap();
    let entry = net.relay(MixAddress(0));
    assert!(entry.recode_request(Request::new(id, wire.clone())).is_some());
    assert!(entry.recode_request(Request::new(id, wire)).is_none());
}
