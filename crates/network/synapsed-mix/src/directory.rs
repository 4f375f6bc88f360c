//! Mix identities, the public key directory and route selection.

use crate::config::{MixConfig, SchemeKind};
use crate::crypto::{KxPublic, KxSecret, RsaKeyPair};
use crate::error::{MixError, Result};
use crate::types::MixAddress;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use rsa::RsaPublicKey;
use std::collections::BTreeMap;
use tracing::debug;

/// Public key a mix publishes for clients.
#[derive(Debug, Clone, PartialEq)]
pub enum MixPublicKey {
    /// RSA key for the hybrid channel schemes
    Rsa(RsaPublicKey),
    /// Group element for Sphinx
    Sphinx(KxPublic),
}

impl MixPublicKey {
    /// Scheme the key can be used with.
    pub fn supports(&self, scheme: SchemeKind) -> bool {
        matches!(
            (self, scheme),
            (MixPublicKey::Rsa(_), SchemeKind::RsaAes | SchemeKind::RsaAesLossTolerant)
                | (MixPublicKey::Sphinx(_), SchemeKind::Sphinx)
        )
    }
}

/// Private half of a mix identity.
#[derive(Debug, Clone)]
pub enum MixSecret {
    /// RSA key pair
    Rsa(RsaKeyPair),
    /// Sphinx secret scalar
    Sphinx(KxSecret),
}

/// A mix: its address and private key.
#[derive(Debug, Clone)]
pub struct MixIdentity {
    /// Address published in the directory
    pub address: MixAddress,
    /// Private key
    pub secret: MixSecret,
}

impl MixIdentity {
    /// Generates an identity suitable for the configured scheme.
    pub fn generate(address: MixAddress, config: &MixConfig) -> Result<Self> {
        let secret = match config.scheme {
            SchemeKind::RsaAes | SchemeKind::RsaAesLossTolerant => {
                MixSecret::Rsa(RsaKeyPair::generate(config.crypto.rsa_key_bits)?)
            }
            SchemeKind::Sphinx => MixSecret::Sphinx(KxSecret::generate()),
        };
        debug!("Generated identity for {}", address);
        Ok(Self { address, secret })
    }

    /// The key to publish.
    pub fn public_key(&self) -> MixPublicKey {
        match &self.secret {
            MixSecret::Rsa(pair) => MixPublicKey::Rsa(pair.public_key().clone()),
            MixSecret::Sphinx(secret) => MixPublicKey::Sphinx(secret.public()),
        }
    }
}

/// Lookup service for mix public keys.
pub trait KeyDirectory: Send + Sync {
    /// Key published by `address`.
    fn public_key(&self, address: MixAddress) -> Option<MixPublicKey>;

    /// All known mixes in address order.
    fn mixes(&self) -> Vec<MixAddress>;
}

/// In-memory directory.
#[derive(Debug, Default)]
pub struct StaticKeyDirectory {
    keys: RwLock<BTreeMap<MixAddress, MixPublicKey>>,
}

impl StaticKeyDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes or replaces the key of a mix.
    pub fn publish(&self, address: MixAddress, key: MixPublicKey) {
        self.keys.write().insert(address, key);
    }

    /// Publishes the public half of an identity.
    pub fn publish_identity(&self, identity: &MixIdentity) {
        self.publish(identity.address, identity.public_key());
    }

    /// Removes a mix.
    pub fn withdraw(&self, address: MixAddress) -> Option<MixPublicKey> {
        self.keys.write().remove(&address)
    }
}

impl KeyDirectory for StaticKeyDirectory {
    fn public_key(&self, address: MixAddress) -> Option<MixPublicKey> {
        self.keys.read().get(&address).cloned()
    }

    fn mixes(&self) -> Vec<MixAddress> {
        self.keys.read().keys().copied().collect()
    }
}

/// One hop of a route.
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    /// Mix address
    pub address: MixAddress,
    /// Key the client encrypts this hop's layer for
    pub public_key: MixPublicKey,
}

/// Ordered sequence of mixes a channel passes through. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    hops: Vec<Hop>,
}

impl Route {
    /// The cascade: every known mix in address order.
    pub fn cascade(directory: &dyn KeyDirectory) -> Result<Self> {
        Self::from_hops(directory, &directory.mixes())
    }

    /// A free route of `length` distinct mixes chosen at random.
    pub fn random<R: Rng + ?Sized>(directory: &dyn KeyDirectory, length: usize, rng: &mut R) -> Result<Self> {
        let mut available = directory.mixes();
        available.retain(|address| !address.is_reserved());
        if available.len() < length {
            return Err(MixError::Configuration(format!(
                "Not enough mixes for route: {} < {}",
                available.len(),
                length
            )));
        }
        available.shuffle(rng);
        available.truncate(length);
        Self::from_hops(directory, &available)
    }

    /// A route through the given addresses, in order.
    pub fn from_hops(directory: &dyn KeyDirectory, addresses: &[MixAddress]) -> Result<Self> {
        if addresses.is_empty() {
            return Err(MixError::Configuration("Route must contain at least one mix".to_string()));
        }
        if let Some(reserved) = addresses.iter().find(|address| address.is_reserved()) {
            return Err(MixError::Configuration(format!(
                "Address {} is reserved as the exit marker",
                reserved
            )));
        }
        let hops = addresses
            .iter()
            .map(|&address| {
                directory
                    .public_key(address)
                    .map(|public_key| Hop { address, public_key })
                    .ok_or_else(|| MixError::Configuration(format!("No public key published for {}", address)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { hops })
    }

    /// Hops from first to last.
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Number of hops.
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Always false for a constructed route.
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// The mix the client hands messages to.
    pub fn entry(&self) -> MixAddress {
        self.hops[0].address
    }

    /// Addresses from first to last.
    pub fn addresses(&self) -> Vec<MixAddress> {
        self.hops.iter().map(|h| h.address).collect()
    }
}
