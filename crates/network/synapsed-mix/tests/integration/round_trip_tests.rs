//! End-to-end recoding through a three-mix network.

use crate::test_utils::*;
use synapsed_mix::{ChannelId, MixAddress, MixConfig, MixError, Reply, Request, Route, RoutingMode, SchemeKind};

fn assert_hello_world(scheme: SchemeKind) {
    let net = TestNetwork::new(config_for(scheme));
    let mut client = net.open_cascade();
    let route = client.route().addresses();
    let id = ChannelId(1);

    let wire = client.apply_layered_encryption(b"hello").unwrap();
    assert_eq!(wire.len(), net.codec.establish_message_len(3));
    let outputs = net.trace(&route, Request::new(id, wire));
    assert_eq!(outputs.len(), 3);
    assert_eq!(outputs[0].payload.len(), net.codec.establish_message_len(2));
    assert_eq!(outputs[1].payload.len(), net.codec.establish_message_len(1));
    assert_eq!(outputs[2].payload, b"hello");
    assert!(!outputs[2].dummy);

    for round in 0..3 {
        let message = format!("world {}", round);
        let wire = client.apply_layered_encryption(message.as_bytes()).unwrap();
        assert_eq!(wire.len(), net.codec.channel_message_len(3));
        let outputs = net.trace(&route, Request::new(id, wire));
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].payload.len(), net.codec.channel_message_len(2));
        assert_eq!(outputs[1].payload.len(), net.codec.channel_message_len(1));
        assert_eq!(outputs[2].payload, message.as_bytes());

        let answer = format!("reply {}", round);
        let mut reply = Reply::new(id, answer.clone().into_bytes());
        for (sealed, address) in route.iter().rev().enumerate() {
            reply = net.relay(*address).recode_reply(reply).unwrap();
            assert_eq!(reply.payload.len(), net.codec.reply_message_len(sealed + 1));
        }
        assert_eq!(client.extract_payload(&reply.payload).unwrap(), answer.as_bytes());
    }
}

#[test]
fn test_hello_world_rsa_aes() {
    assert_hello_world(SchemeKind::RsaAes);
}

#[test]
fn test_hello_world_loss_tolerant() {
    assert_hello_world(SchemeKind::RsaAesLossTolerant);
}

#[test]
fn test_hello_world_sphinx() {
    assert_hello_world(SchemeKind::Sphinx);
}

#[test]
fn test_sphinx_header_keeps_its_size() {
    let net = TestNetwork::new(config_for(SchemeKind::Sphinx));
    let mut client = net.open_cascade();
    let wire = client.apply_layered_encryption(b"hello").unwrap();
    let size = wire.len();
    // 32 + 5 * 32 + 16 + 4 + 1024
    assert_eq!(size, 1236);

    let outputs = net.trace(&client.route().addresses(), Request::new(ChannelId(1), wire));
    assert_eq!(outputs[0].payload.len(), size);
    assert_eq!(outputs[1].payload.len(), size);
}

#[test]
fn test_empty_payload_marks_dummy_at_exit() {
    for scheme in [SchemeKind::RsaAes, SchemeKind::Sphinx] {
        let net = TestNetwork::new(config_for(scheme));
        let mut client = net.open_cascade();
        let route = client.route().addresses();

        let wire = client.apply_layered_encryption(&[]).unwrap();
        let outputs = net.trace(&route, Request::new(ChannelId(7), wire));
        assert_eq!(outputs.len(), 3);
        assert!(!outputs[0].dummy);
        assert!(!outputs[1].dummy);
        assert!(outputs[2].dummy);
        assert!(outputs[2].payload.is_empty());

        let exit = net.send(&mut client, ChannelId(7), &[]).unwrap();
        assert!(exit.dummy);

        let exit = net.send(&mut client, ChannelId(7), b"real").unwrap();
        assert!(!exit.dummy);
    }
}

#[test]
fn test_payload_size_limit() {
    let net = TestNetwork::new(MixConfig::default());
    let mut client = net.open_cascade();
    assert_eq!(client.max_payload_for_next_message(), 1024);

    let err = client.apply_layered_encryption(&vec![0u8; 1025]).unwrap_err();
    assert!(matches!(err, MixError::PayloadTooLarge { size: 1025, max: 1024 }));
    assert!(err.is_fatal());
    assert!(!client.is_established());

    let full = vec![0x5a; 1024];
    let exit = net.send(&mut client, ChannelId(1), &full).unwrap();
    assert_eq!(exit.payload, full);
    let exit = net.send(&mut client, ChannelId(1), &full).unwrap();
    assert_eq!(exit.payload, full);
}

#[test]
fn test_channel_message_on_unknown_channel_dropped() {
    let net = TestNetwork::new(MixConfig::default());
    let mut client = net.open_cascade();
    assert!(net.send(&mut client, ChannelId(1), b"hello").is_some());

    let wire = client.apply_layered_encryption(b"world").unwrap();
    let entry = net.relay(MixAddress(0));
    assert!(entry.recode_request(Request::new(ChannelId(2), wire)).is_none());

    let slot = entry.channels.get(ChannelId(2)).unwrap();
    assert!(!slot.data().lock().is_established());
}

#[test]
fn test_reply_on_unknown_channel_dropped() {
    let net = TestNetwork::new(MixConfig::default());
    let exit = net.relay(MixAddress(2));
    assert!(exit.recode_reply(Reply::new(ChannelId(9), b"orphan".to_vec())).is_none());
}

#[test]
fn test_oversized_reply_dropped_at_exit() {
    let net = TestNetwork::new(config_for(SchemeKind::Sphinx));
    let mut client = net.open_cascade();
    assert!(net.send(&mut client, ChannelId(1), b"hello").is_some());

    let route = client.route().addresses();
    assert!(net.reply(&route, ChannelId(1), &vec![0u8; 1025]).is_none());
}

#[test]
fn test_source_routed_next_hops() {
    let config = MixConfig {
        routing: RoutingMode::SourceRouted,
        ..MixConfig::default()
    };
    let net = TestNetwork::new(config);
    let route = [MixAddress(2), MixAddress(0), MixAddress(1)];
    let mut client = net.open_route(&route);
    let id = ChannelId(3);

    let wire = client.apply_layered_encryption(b"hello").unwrap();
    assert_eq!(wire.len(), net.codec.establish_message_len(3));
    let outputs = net.trace(&route, Request::new(id, wire));
    assert_eq!(outputs.len(), 3);
    assert_eq!(outputs[0].next_hop, Some(MixAddress(0)));
    assert_eq!(outputs[1].next_hop, Some(MixAddress(1)));
    assert_eq!(outputs[2].next_hop, None);
    assert_eq!(outputs[2].payload, b"hello");

    // Later messages follow the hops stored at establishment
    let wire = client.apply_layered_encryption(b"world").unwrap();
    let outputs = net.trace(&route, Request::new(id, wire));
    assert_eq!(outputs[0].next_hop, Some(MixAddress(0)));
    assert_eq!(outputs[1].next_hop, Some(MixAddress(1)));
    assert_eq!(outputs[2].payload, b"world");

    let reply = net.reply(&route, id, b"back").unwrap();
    assert_eq!(client.extract_payload(&reply).unwrap(), b"back");
}

#[test]
fn test_sphinx_random_route() {
    let net = TestNetwork::new(config_for(SchemeKind::Sphinx));
    let route = Route::random(&net.directory, 3, &mut rand::thread_rng()).unwrap();
    let addresses = route.addresses();
    let mut client = net.codec.open_channel(route).unwrap();

    let wire = client.apply_layered_encryption(b"hello").unwrap();
    let outputs = net.trace(&addresses, Request::new(ChannelId(1), wire));
    assert_eq!(outputs.len(), 3);
    assert_eq!(outputs[0].next_hop, Some(addresses[1]));
    assert_eq!(outputs[1].next_hop, Some(addresses[2]));
    assert_eq!(outputs[2].payload, b"hello");
}

#[test]
fn test_simplex_channel_has_no_replies() {
    let config = MixConfig {
        duplex: false,
        ..MixConfig::default()
    };
    let net = TestNetwork::new(config);
    let mut client = net.open_cascade();
    assert_eq!(client.max_payload_for_next_reply(), 0);

    let exit = net.send(&mut client, ChannelId(1), b"hello").unwrap();
    assert_eq!(exit.payload, b"hello");
    let exit = net.send(&mut client, ChannelId(1), b"world").unwrap();
    assert_eq!(exit.payload, b"world");

    let route = client.route().addresses();
    assert!(net.reply(&route, ChannelId(1), b"nope").is_none());
    assert!(client.extract_payload(&[0u8; 64]).is_err());
}

fn deliver_after_loss(scheme: SchemeKind) -> Option<Request> {
    let net = TestNetwork::new(config_for(scheme));
    let mut client = net.open_cascade();
    let id = ChannelId(5);
    net.send(&mut client, id, b"hello")?;

    let _lost = client.apply_layered_encryption(b"lost in transit").unwrap();
    net.send(&mut client, id, b"after")
}

#[test]
fn test_loss_tolerant_channel_survives_lost_message() {
    let exit = deliver_after_loss(SchemeKind::RsaAesLossTolerant).unwrap();
    assert_eq!(exit.payload, b"after");
}

#[test]
fn test_stateful_channel_drops_after_lost_message() {
    assert!(deliver_after_loss(SchemeKind::RsaAes).is_none());
}

#[test]
fn test_loss_tolerant_channel_accepts_reordering() {
    let net = TestNetwork::new(config_for(SchemeKind::RsaAesLossTolerant));
    let mut client = net.open_cascade();
    let route = client.route().addresses();
    let id = ChannelId(6);
    assert!(net.send(&mut client, id, b"hello").is_some());

    let first = client.apply_layered_encryption(b"first").unwrap();
    let second = client.apply_layered_encryption(b"second").unwrap();
    let outputs = net.trace(&route, Request::new(id, second));
    assert_eq!(outputs[2].payload, b"second");
    let outputs = net.trace(&route, Request::new(id, first));
    assert_eq!(outputs[2].payload, b"first");
}

#[test]
fn test_identical_payloads_are_unlinkable() {
    let net = TestNetwork::new(MixConfig::default());
    let mut a = net.open_cascade();
    let mut b = net.open_cascade();
    let wire_a = a.apply_layered_encryption(b"same").unwrap();
    let wire_b = b.apply_layered_encryption(b"same").unwrap();
    assert_eq!(wire_a.len(), wire_b.len());
    assert_ne!(wire_a, wire_b);

    let route = a.route().addresses();
    let out_a = net.trace(&route, Request::new(ChannelId(1), wire_a));
    let out_b = net.trace(&route, Request::new(ChannelId(2), wire_b));
    assert_ne!(out_a[0].payload, out_b[0].payload);
    assert_eq!(out_a[2].payload, out_b[2].payload);
}

#[test]
fn test_single_mix_route() {
    let net = TestNetwork::with_size(config_for(SchemeKind::Sphinx), 1);
    let mut client = net.open_cascade();
    assert_eq!(client.route().len(), 1);

    let exit = net.send(&mut client, ChannelId(1), b"hello").unwrap();
    assert_eq!(exit.payload, b"hello");
    assert_eq!(exit.next_hop, None);

    let reply = net.reply(&[MixAddress(0)], ChannelId(1), b"hi").unwrap();
    assert_eq!(reply.len(), net.codec.reply_message_len(1));
    assert_eq!(client.extract_payload(&reply).unwrap(), b"hi");
}
