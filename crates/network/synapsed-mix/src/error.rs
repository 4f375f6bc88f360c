//! Error types for the recoding engine.

use std::fmt;
use thiserror::Error;

/// Type alias for Results in this crate.
pub type Result<T> = std::result::Result<T, MixError>;

/// Main error type for mix operations.
///
/// Per-message variants ([`MixError::Crypto`], [`MixError::Replay`],
/// [`MixError::Protocol`]) never leave the relay-side recoder: they are logged
/// and turned into a dropped message. The remaining variants are raised to the
/// caller because they indicate a programming or configuration mistake.
#[derive(Error, Debug)]
pub enum MixError {
    /// Cryptographic processing failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Replay detection rejected an identifier
    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Payload exceeds what the channel can carry
    #[error("Payload too large: {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Size that was requested
        size: usize,
        /// Maximum supported size
        max: usize,
    },

    /// Malformed envelope or unexpected channel state
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Worker pipeline errors
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Cryptography-specific errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Encryption failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Decryption failed
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Layer MAC did not match
    #[error("MAC verification failed")]
    MacMismatch,

    /// Key or IV of the wrong size
    #[error("Invalid key length: {0}")]
    InvalidKeyLength(String),

    /// Key generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Key derivation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Envelope could not be parsed
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Replay-detection errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// Identifier already seen
    #[error("Identifier already seen")]
    Replayed,

    /// Timestamp lies beyond the clock tolerance
    #[error("Timestamp {timestamp} is ahead of local clock {now}")]
    FromTheFuture {
        /// Timestamp carried by the message
        timestamp: u64,
        /// Local clock
        now: u64,
    },

    /// Timestamp older than the detector remembers
    #[error("Timestamp {timestamp} expired (oldest accepted {oldest})")]
    Expired {
        /// Timestamp carried by the message
        timestamp: u64,
        /// Oldest timestamp still accepted
        oldest: u64,
    },

    /// Identifier shorter than the replay key
    #[error("Identifier too short: {0} bytes")]
    IdentifierTooShort(usize),
}

impl MixError {
    /// Returns the severity of this error for observability purposes.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MixError::Crypto(_) => ErrorSeverity::Minor,
            MixError::Replay(_) => ErrorSeverity::Major,
            MixError::Configuration(_) => ErrorSeverity::Critical,
            MixError::PayloadTooLarge { .. } => ErrorSeverity::Critical,
            MixError::Protocol(_) => ErrorSeverity::Minor,
            MixError::Pipeline(_) => ErrorSeverity::Critical,
            MixError::Io(_) => ErrorSeverity::Major,
            MixError::Other(_) => ErrorSeverity::Major,
        }
    }

    /// Returns an observable error type that doesn't leak sensitive information.
    pub fn observable_type(&self) -> &'static str {
        match self {
            MixError::Crypto(_) => "crypto",
            MixError::Replay(_) => "replay",
            MixError::Configuration(_) => "configuration",
            MixError::PayloadTooLarge { .. } => "payload_too_large",
            MixError::Protocol(_) => "protocol",
            MixError::Pipeline(_) => "pipeline",
            MixError::Io(_) => "io",
            MixError::Other(_) => "other",
        }
    }

    /// Classifies the error for metrics without revealing details.
    pub fn classify(&self) -> ErrorClass {
        match self {
            MixError::Crypto(CryptoError::MacMismatch) => ErrorClass::Tampered,
            MixError::Crypto(_) | MixError::Protocol(_) => ErrorClass::Malformed,
            MixError::Replay(_) => ErrorClass::Replay,
            MixError::Configuration(_) | MixError::PayloadTooLarge { .. } => ErrorClass::ConfigError,
            _ => ErrorClass::Other,
        }
    }

    /// Whether the error is a caller or configuration bug rather than a
    /// per-message failure that should just drop the message.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MixError::Configuration(_) | MixError::PayloadTooLarge { .. } | MixError::Pipeline(_)
        )
    }
}

/// Error severity levels for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Major errors that impact functionality
    Major,
    /// Minor errors that can be recovered from
    Minor,
}

/// Error classification for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorClass {
    /// MAC did not verify
    Tampered,
    /// Envelope could not be parsed or decrypted
    Malformed,
    /// Replay detector rejected the message
    Replay,
    /// Configuration error
    ConfigError,
    /// Other error
    Other,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Tampered => write!(f, "tampered"),
            ErrorClass::Malformed => write!(f, "malformed"),
            ErrorClass::Replay => write!(f, "replay"),
            ErrorClass::ConfigError => write!(f, "config_error"),
            ErrorClass::Other => write!(f, "other"),
        }
    }
}

impl From<rsa::Error> for MixError {
    fn from(err: rsa::Error) -> Self {
        MixError::Crypto(CryptoError::Decryption(format!("RSA error: {}", err)))
    }
}

impl From<toml::de::Error> for MixError {
    fn from(err: toml::de::Error) -> Self {
        MixError::Configuration(format!("Invalid TOML: {}", err))
    }
}

impl From<toml::ser::Error> for MixError {
    fn from(err: toml::ser::Error) -> Self {
        MixError::Configuration(format!("Cannot serialize configuration: {}", err))
    }
}
