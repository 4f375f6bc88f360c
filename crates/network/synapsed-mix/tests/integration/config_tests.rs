//! Configuration loading and the checks performed when wiring components together.

use crate::test_utils::*;
use std::sync::Arc;
use std::time::Duration;
use synapsed_mix::{
    LayeredCodec, ManualClock, MixAddress, MixConfig, MixError, MixIdentity, Recoder, RelayRole, ReplayDetector,
    ReplayPolicy, Route, SchemeKind, SystemClock,
};

#[test]
fn test_toml_round_trip() {
    let mut config = config_for(SchemeKind::Sphinx);
    config.max_payload = 512;
    config.sphinx.max_hops = 4;
    config.pipeline.stats_interval = Some(Duration::from_secs(30));

    let text = config.to_toml_string().unwrap();
    assert!(text.contains("scheme = \"Sphinx\""));
    let parsed = MixConfig::from_toml_str(&text).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_invalid_toml_rejected() {
    let text = MixConfig::default().to_toml_string().unwrap();
    let broken = text.replace("max_payload = 1024", "max_payload = 0");
    assert_ne!(text, broken);
    assert!(matches!(MixConfig::from_toml_str(&broken), Err(MixError::Configuration(_))));
    assert!(matches!(MixConfig::from_toml_str("scheme = 3"), Err(MixError::Configuration(_))));
}

#[test]
fn test_codec_validates_config() {
    let mut config = MixConfig::default();
    config.crypto.mac_len = 8;
    assert!(matches!(
        LayeredCodec::new(config, Arc::new(SystemClock)),
        Err(MixError::Configuration(_))
    ));

    let mut config = MixConfig::default();
    config.pipeline.request_workers = 0;
    assert!(LayeredCodec::from_config(config).is_err());
}

#[test]
fn test_cipher_mode_follows_scheme() {
    let baseline = LayeredCodec::from_config(MixConfig::default())
        .unwrap()
        .channel_message_len(1);
    for scheme in [SchemeKind::RsaAes, SchemeKind::RsaAesLossTolerant, SchemeKind::Sphinx] {
        let codec = LayeredCodec::from_config(config_for(scheme)).unwrap();
        assert_eq!(codec.scheme(), scheme);
        // Loss tolerance costs one random block per layer
        let overhead = codec.channel_message_len(1) - baseline;
        match scheme {
            SchemeKind::RsaAesLossTolerant => assert_eq!(overhead, 16),
            _ => assert_eq!(overhead, 0),
        }
    }
}

#[test]
fn test_recoder_rejects_identity_for_other_scheme() {
    let sphinx = config_for(SchemeKind::Sphinx);
    let identity = MixIdentity::generate(MixAddress(0), &sphinx).unwrap();
    let codec = LayeredCodec::from_config(MixConfig::default()).unwrap();
    assert!(matches!(
        Recoder::new(codec, identity, None, RelayRole::Exit),
        Err(MixError::Configuration(_))
    ));
}

#[test]
fn test_recoder_rejects_wrong_key_size() {
    let mut config = MixConfig::default();
    config.crypto.rsa_key_bits = 3072;
    let codec = LayeredCodec::from_config(config).unwrap();
    let identity = identities(&MixConfig::default(), 1).remove(0);
    assert!(Recoder::new(codec, identity, None, RelayRole::Exit).is_err());
}

#[test]
fn test_recoder_rejects_mismatched_replay_policy() {
    let config = MixConfig::default();
    let codec = LayeredCodec::from_config(config).unwrap();
    let identity = identities(&MixConfig::default(), 1).remove(0);
    let detector = Arc::new(ReplayDetector::new(ReplayPolicy::TagSet, Arc::new(ManualClock::new(0))));
    assert!(Recoder::new(codec, identity, Some(detector), RelayRole::Exit).is_err());
}

#[test]
fn test_disabled_replay_yields_no_detector() {
    let mut config = MixConfig::default();
    config.replay.enabled = false;
    assert!(ReplayDetector::from_config(&config, Arc::new(SystemClock)).is_none());
    config.replay.enabled = true;
    let detector = ReplayDetector::from_config(&config, Arc::new(SystemClock)).unwrap();
    assert!(matches!(detector.policy(), ReplayPolicy::TimeWindow { .. }));
}

#[test]
fn test_open_channel_checks_route() {
    let net = TestNetwork::new(MixConfig::default());

    let sphinx = LayeredCodec::from_config(config_for(SchemeKind::Sphinx)).unwrap();
    let route = Route::cascade(&net.directory).unwrap();
    assert!(matches!(sphinx.open_channel(route), Err(MixError::Configuration(_))));

    let mut short = config_for(SchemeKind::Sphinx);
    short.sphinx.max_hops = 2;
    short.route_length = 2;
    let sphinx_net = TestNetwork::new(config_for(SchemeKind::Sphinx));
    let codec = LayeredCodec::from_config(short).unwrap();
    let route = Route::cascade(&sphinx_net.directory).unwrap();
    assert_eq!(route.len(), 3);
    assert!(codec.open_channel(route).is_err());
}
