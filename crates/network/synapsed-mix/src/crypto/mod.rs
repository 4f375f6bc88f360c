//! Transform primitives: pure functions over byte buffers and keys.

pub mod asymmetric;
pub mod key_derivation;
pub mod kx;
pub mod mac;
pub mod padding;
pub mod symmetric;

pub use asymmetric::RsaKeyPair;
pub use key_derivation::ChannelKeys;
pub use kx::{KxPublic, KxSecret, SharedSecret};
pub use mac::{compute_mac, verify_mac};
pub use symmetric::{ChannelCipher, Checkpoint};
