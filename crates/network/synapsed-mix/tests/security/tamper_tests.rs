//! Modified, truncated and misdirected messages must be dropped without
//! touching channel state.

use crate::test_utils::*;
use synapsed_mix::{ChannelId, MixAddress, MixConfig, Request, SchemeKind};

fn flip(mut wire: Vec<u8>, index: usize) -> Vec<u8> {
    wire[index] ^= 0x01;
    wire
}

#[test]
fn test_tampered_establish_dropped_and_not_committed() {
    for scheme in [SchemeKind::RsaAes, SchemeKind::RsaAesLossTolerant, SchemeKind::Sphinx] {
        let net = TestNetwork::new(config_for(scheme));
        let mut client = net.open_cascade();
        let entry = net.relay(MixAddress(0));
        let id = ChannelId(1);

        let wire = client.apply_layered_encryption(b"hello").unwrap();
        let last = wire.len() - 1;
        for index in [0, 300, last] {
            let tampered = flip(wire.clone(), index);
            assert!(
                entry.recode_request(Request::new(id, tampered)).is_none(),
                "{:?}: flip at {} accepted",
                scheme,
                index
            );
            let slot = entry.channels.get(id).unwrap();
            assert!(!slot.data().lock().is_established());
        }

        // The intact message still establishes the channel afterwards
        let outputs = net.trace(&client.route().addresses(), Request::new(id, wire));
        assert_eq!(outputs.len(), 3, "{:?}", scheme);
        assert_eq!(outputs[2].payload, b"hello");
    }
}

#[test]
fn test_tampering_between_hops_detected() {
    for scheme in [SchemeKind::RsaAes, SchemeKind::Sphinx] {
        let net = TestNetwork::new(config_for(scheme));
        let mut client = net.open_cascade();
        let id = ChannelId(2);

        let wire = client.apply_layered_encryption(b"hello").unwrap();
        let first = net.relay(MixAddress(0)).recode_request(Request::new(id, wire)).unwrap();
        let middle = first.payload.len() / 2;
        let tampered = Request::new(id, flip(first.payload, middle));
        assert!(net.relay(MixAddress(1)).recode_request(tampered).is_none(), "{:?}", scheme);
    }
}

#[test]
fn test_tampered_channel_message_dropped() {
    for scheme in [SchemeKind::RsaAes, SchemeKind::RsaAesLossTolerant, SchemeKind::Sphinx] {
        let net = TestNetwork::new(config_for(scheme));
        let mut client = net.open_cascade();
        let id = ChannelId(3);
        assert!(net.send(&mut client, id, b"hello").is_some());

        let wire = client.apply_layered_encryption(b"world").unwrap();
        let tampered = flip(wire, 40);
        assert!(
            net.relay(MixAddress(0)).recode_request(Request::new(id, tampered)).is_none(),
            "{:?}",
            scheme
        );
    }
}

#[test]
fn test_truncated_messages_dropped() {
    for scheme in [SchemeKind::RsaAes, SchemeKind::RsaAesLossTolerant, SchemeKind::Sphinx] {
        let net = TestNetwork::new(config_for(scheme));
        let mut client = net.open_cascade();
        let entry = net.relay(MixAddress(0));

        let mut wire = client.apply_layered_encryption(b"hello").unwrap();
        wire.truncate(wire.len() - 16);
        assert!(entry.recode_request(Request::new(ChannelId(4), wire)).is_none());
        assert!(entry.recode_request(Request::new(ChannelId(5), Vec::new())).is_none());
        assert!(entry.recode_request(Request::new(ChannelId(6), vec![0u8; 10])).is_none());
    }
}

#[test]
fn test_message_for_another_mix_dropped() {
    let net = TestNetwork::new(MixConfig::default());
    let mut client = net.open_cascade();
    let wire = client.apply_layered_encryption(b"hello").unwrap();

    // Layer 0 is encrypted for mix 0 only
    assert!(net
        .relay(MixAddress(1))
        .recode_request(Request::new(ChannelId(1), wire))
        .is_none());
}

#[test]
fn test_sphinx_header_swap_detected() {
    let net = TestNetwork::new(config_for(SchemeKind::Sphinx));
    let mut a = net.open_cascade();
    let mut b = net.open_cascade();
    let wire_a = a.apply_layered_encryption(b"alpha").unwrap();
    let wire_b = b.apply_layered_encryption(b"bravo").unwrap();

    // Header of one message with the payload of the other
    let header = 32 + 5 * 32 + 16;
    let mut spliced = wire_a[..header].to_vec();
    spliced.extend_from_slice(&wire_b[header..]);
    assert!(net
        .relay(MixAddress(0))
        .recode_request(Request::new(ChannelId(1), spliced))
        .is_none());
}

#[test]
fn test_failed_channel_message_keeps_loss_tolerant_channel_usable() {
    let net = TestNetwork::new(config_for(SchemeKind::RsaAesLossTolerant));
    let mut client = net.open_cascade();
    let id = ChannelId(8);
    assert!(net.send(&mut client, id, b"hello").is_some());

    let bad = flip(client.apply_layered_encryption(b"bad").unwrap(), 20);
    assert!(net.relay(MixAddress(0)).recode_request(Request::new(id, bad)).is_none());

    let exit = net.send(&mut client, id, b"good").unwrap();
    assert_eq!(exit.payload, b"good");
}

#[test]
fn test_injected_garbage_does_not_desync_stream_channel() {
    for scheme in [SchemeKind::RsaAes, SchemeKind::Sphinx] {
        let net = TestNetwork::new(config_for(scheme));
        let mut client = net.open_cascade();
        let id = ChannelId(9);
        assert!(net.send(&mut client, id, b"hello").is_some());

        let entry = net.relay(MixAddress(0));
        assert!(entry.recode_request(Request::new(id, vec![0x42; 7])).is_none());
        let forged = vec![0x42; net.codec.channel_message_len(3)];
        assert!(entry.recode_request(Request::new(id, forged)).is_none());

        for round in 0..5u8 {
            let payload = [round; 12];
            let exit = net.send(&mut client, id, &payload);
            assert_eq!(exit.map(|r| r.payload), Some(payload.to_vec()), "{:?} round {}", scheme, round);
        }
    }
}
