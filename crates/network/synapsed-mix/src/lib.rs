//! # Synapsed-Mix
//!
//! Layered recoding engine for Chaumian mixes in the Synapsed ecosystem.
//!
//! A client wraps every message in one cryptographic layer per mix of its
//! route. Each mix removes exactly one layer, checks it for integrity and
//! replays, and hands the result to the next hop. Replies travel back the
//! same channel and gain one layer per mix, which only the client can remove.
//!
//! ## Architecture
//!
//! - **Codec**: the three channel schemes ([`LayeredCodec`]), the client end
//!   ([`ClientChannel`]) and the relay end ([`Recoder`])
//! - **Channel state**: per-channel keys and ciphers ([`ChannelData`]) kept
//!   in a concurrent [`ChannelRegistry`]
//! - **Replay detection**: a two-generation identifier cache
//!   ([`ReplayDetector`])
//! - **Pipeline**: distributor and worker threads that recode many channels in
//!   parallel while keeping each channel in order ([`RecodingPipeline`])
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use synapsed_mix::{
//!     LayeredCodec, MixAddress, MixConfig, MixIdentity, Recoder, RelayRole, ReplayDetector, Route,
//!     StaticKeyDirectory, SystemClock,
//! };
//!
//! # fn main() -> synapsed_mix::Result<()> {
//! let config = MixConfig::default();
//! let identity = MixIdentity::generate(MixAddress(0), &config)?;
//! let directory = StaticKeyDirectory::new();
//! directory.publish_identity(&identity);
//!
//! let codec = LayeredCodec::from_config(config.clone())?;
//! let mut channel = codec.open_channel(Route::cascade(&directory)?)?;
//! let wire = channel.apply_layered_encryption(b"hello")?;
//!
//! let replay = ReplayDetector::from_config(&config, Arc::new(SystemClock));
//! let recoder = Recoder::new(codec, identity, replay, RelayRole::Exit)?;
//! # let _ = (wire, recoder);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channel;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod pipeline;
pub mod replay;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use channel::{ChannelData, ChannelRegistry, ChannelSlot};
pub use codec::{CipherMode, ClientChannel, LayeredCodec, Recoder, RelayRole};
pub use config::{MixConfig, RoutingMode, SchemeKind, SymmetricAlgorithm};
pub use directory::{Hop, KeyDirectory, MixIdentity, MixPublicKey, MixSecret, Route, StaticKeyDirectory};
pub use error::{CryptoError, MixError, ReplayError, Result};
pub use pipeline::{PipelineHandle, PipelineStatsSnapshot, RecodingPipeline};
pub use replay::{Clock, ManualClock, ReplayDetector, ReplayPolicy, SystemClock};
pub use transport::{MessageSource, OutputStrategy, QueueOutput, QueueSource};
pub use types::{ChannelId, Direction, MixAddress, Reply, Request};
