//! Configuration types for the recoding engine.

use crate::error::{MixError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size of the AES block, which is also the only supported IV length.
pub const BLOCK_SIZE: usize = 16;

/// OAEP with SHA-256 costs `2 * 32 + 2` bytes of every RSA block.
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

/// Main configuration of a mix or client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixConfig {
    /// Channel scheme used for layered recoding
    pub scheme: SchemeKind,

    /// How routes are chosen and encoded
    pub routing: RoutingMode,

    /// Number of hops for free routes
    pub route_length: usize,

    /// Largest payload a client may send in one message
    pub max_payload: usize,

    /// Whether channels carry replies
    pub duplex: bool,

    /// Cryptographic parameters
    pub crypto: CryptoConfig,

    /// Replay detection
    pub replay: ReplayConfig,

    /// Sphinx header parameters
    pub sphinx: SphinxConfig,

    /// Worker pipeline
    pub pipeline: PipelineConfig,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            scheme: SchemeKind::RsaAes,
            routing: RoutingMode::Cascade,
            route_length: 3,
            max_payload: 1024,
            duplex: true,
            crypto: CryptoConfig::default(),
            replay: ReplayConfig::default(),
            sphinx: SphinxConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Channel scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemeKind {
    /// RSA establish envelope, stateful AES-CTR channel
    RsaAes,
    /// RSA establish envelope, AES-CBC channel with a random first block per message
    RsaAesLossTolerant,
    /// Sphinx establish header, stateful AES-CTR channel
    Sphinx,
}

/// Routing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingMode {
    /// Every client uses the same fixed sequence of mixes
    Cascade,
    /// Each client picks its route and encodes it into the envelope
    SourceRouted,
}

/// Symmetric block cipher used by channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymmetricAlgorithm {
    /// AES with a 128-bit key
    Aes128,
    /// AES with a 256-bit key
    Aes256,
}

impl SymmetricAlgorithm {
    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes256 => 32,
        }
    }
}

/// Cryptographic parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// RSA modulus size in bits
    pub rsa_key_bits: usize,
    /// Channel cipher
    pub symmetric: SymmetricAlgorithm,
    /// IV length in bytes
    pub iv_len: usize,
    /// MAC key length in bytes
    pub mac_key_len: usize,
    /// Truncated MAC length in bytes
    pub mac_len: usize,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            rsa_key_bits: 2048,
            symmetric: SymmetricAlgorithm::Aes128,
            iv_len: BLOCK_SIZE,
            mac_key_len: 32,
            mac_len: 32,
        }
    }
}

impl CryptoConfig {
    /// Bytes of RSA ciphertext per establish envelope.
    pub fn asymmetric_ciphertext_len(&self) -> usize {
        self.rsa_key_bits / 8
    }

    /// Bytes of plaintext carried inside the RSA block.
    pub fn asymmetric_plaintext_len(&self) -> usize {
        self.asymmetric_ciphertext_len()
            .saturating_sub(OAEP_SHA256_OVERHEAD)
    }
}

/// Replay detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Whether relays check establish messages for replays
    pub enabled: bool,
    /// Allowed clock skew between client and relay
    pub tolerance: Duration,
    /// Maximum delay a message may accumulate before reaching a relay
    pub max_delay: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tolerance: Duration::from_secs(10),
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Sphinx header parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphinxConfig {
    /// Number of routing blocks in every header
    pub max_hops: usize,
}

impl Default for SphinxConfig {
    fn default() -> Self {
        Self { max_hops: 5 }
    }
}

/// Worker pipeline parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Worker threads recoding requests
    pub request_workers: usize,
    /// Worker threads recoding replies
    pub reply_workers: usize,
    /// Capacity of each per-channel queue
    pub channel_queue_capacity: usize,
    /// Capacity of the shared ready queue
    pub ready_queue_capacity: usize,
    /// Interval of the contention report, disabled when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_interval: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_workers: 4,
            reply_workers: 2,
            channel_queue_capacity: 256,
            ready_queue_capacity: 4096,
            stats_interval: None,
        }
    }
}

impl MixConfig {
    /// Loads a configuration record from TOML and validates it.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: MixConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Bytes of secret material that must travel inside the RSA block.
    pub fn establish_secret_len(&self) -> usize {
        let session = self.crypto.symmetric.key_len() + self.crypto.iv_len;
        let directions = if self.duplex { 2 } else { 1 };
        self.crypto.mac_len + self.crypto.mac_key_len + session * directions
    }

    /// Rejects scheme, routing and size combinations the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.max_payload == 0 || self.max_payload > u32::MAX as usize {
            return Err(MixError::Configuration(format!(
                "max_payload must be in 1..={}, got {}",
                u32::MAX,
                self.max_payload
            )));
        }

        if self.route_length == 0 {
            return Err(MixError::Configuration("route_length must be at least 1".to_string()));
        }

        if !(16..=32).contains(&self.crypto.mac_len) {
            return Err(MixError::Configuration(format!(
                "mac_len must be in 16..=32, got {}",
                self.crypto.mac_len
            )));
        }

        if self.crypto.mac_key_len < 16 {
            return Err(MixError::Configuration(format!(
                "mac_key_len must be at least 16, got {}",
                self.crypto.mac_key_len
            )));
        }

        if self.crypto.iv_len != BLOCK_SIZE {
            return Err(MixError::Configuration(format!(
                "iv_len must be {}, got {}",
                BLOCK_SIZE, self.crypto.iv_len
            )));
        }

        match self.scheme {
            SchemeKind::RsaAes | SchemeKind::RsaAesLossTolerant => {
                if self.crypto.rsa_key_bits % 8 != 0 || self.crypto.rsa_key_bits < 1024 {
                    return Err(MixError::Configuration(format!(
                        "rsa_key_bits must be a multiple of 8 and at least 1024, got {}",
                        self.crypto.rsa_key_bits
                    )));
                }
                let capacity = self.crypto.asymmetric_plaintext_len();
                let needed = self.establish_secret_len();
                if capacity < needed {
                    return Err(MixError::Configuration(format!(
                        "RSA block carries {} bytes but the establish secrets need {}",
                        capacity, needed
                    )));
                }
            }
            SchemeKind::Sphinx => {
                if self.sphinx.max_hops == 0 {
                    return Err(MixError::Configuration("sphinx.max_hops must be at least 1".to_string()));
                }
                if self.route_length > self.sphinx.max_hops {
                    return Err(MixError::Configuration(format!(
                        "route_length {} exceeds sphinx.max_hops {}",
                        self.route_length, self.sphinx.max_hops
                    )));
                }
            }
        }

        if self.replay.enabled && self.replay.max_delay.is_zero() {
            return Err(MixError::Configuration(
                "replay.max_delay must be non-zero when replay detection is enabled".to_string(),
            ));
        }

        let pipeline = &self.pipeline;
        if pipeline.request_workers == 0 {
            return Err(MixError::Configuration("pipeline.request_workers must be at least 1".to_string()));
        }
        if self.duplex && pipeline.reply_workers == 0 {
            return Err(MixError::Configuration("pipeline.reply_workers must be at least 1".to_string()));
        }
        if pipeline.channel_queue_capacity == 0 || pipeline.ready_queue_capacity == 0 {
            return Err(MixError::Configuration("pipeline queue capacities must be non-zero".to_string()));
        }

        Ok(())
    }
}
