//! Replay detection for channel-establish messages.
//!
//! Identifiers are stored in two generations. Every call first rotates the
//! generations if the clock has moved past the current window, then checks
//! the timestamp and finally looks the identifier up in both generations.
//! All of this happens under one lock: check-and-insert must be linear or two
//! copies of the same message could both be admitted.

use crate::config::{MixConfig, SchemeKind};
use crate::error::ReplayError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Bytes of an identifier that are stored.
pub const IDENTIFIER_LEN: usize = 8;

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now_millis(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to, for simulations and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Starts at `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            now: AtomicU64::new(millis),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Sets the clock.
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// How identifiers age out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPolicy {
    /// Identifiers come with a timestamp and are remembered for a sliding window.
    TimeWindow {
        /// Allowed clock skew
        tolerance: Duration,
        /// Maximum in-network delay
        max_delay: Duration,
    },
    /// Identifiers are tags without timestamps; only set membership applies.
    TagSet,
}

impl ReplayPolicy {
    /// The policy matching a scheme: Sphinx tags carry no timestamp.
    pub fn for_config(config: &MixConfig) -> Self {
        match config.scheme {
            SchemeKind::Sphinx => ReplayPolicy::TagSet,
            SchemeKind::RsaAes | SchemeKind::RsaAesLossTolerant => ReplayPolicy::TimeWindow {
                tolerance: config.replay.tolerance,
                max_delay: config.replay.max_delay,
            },
        }
    }
}

/// One half of the replay database.
#[derive(Default)]
struct Generation {
    entries: HashMap<u32, Vec<[u8; IDENTIFIER_LEN]>>,
    /// Newest timestamp admitted into this generation
    newest: u64,
}

impl Generation {
    fn contains(&self, key: u32, value: &[u8; IDENTIFIER_LEN]) -> bool {
        self.entries.get(&key).is_some_and(|values| values.contains(value))
    }

    fn insert(&mut self, key: u32, value: [u8; IDENTIFIER_LEN], timestamp: u64) {
        self.entries.entry(key).or_default().push(value);
        self.newest = self.newest.max(timestamp);
    }

    /// Whether every identifier in here would now be rejected as expired.
    fn is_expired(&self, oldest: u64) -> bool {
        self.entries.is_empty() || self.newest < oldest
    }

    fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

struct ReplayDb {
    active: Generation,
    stale: Generation,
    last_switch: u64,
}

impl ReplayDb {
    fn contains(&self, key: u32, value: &[u8; IDENTIFIER_LEN]) -> bool {
        self.active.contains(key, value) || self.stale.contains(key, value)
    }
}

/// Replay detector shared by all workers of a mix.
pub struct ReplayDetector {
    policy: ReplayPolicy,
    clock: Arc<dyn Clock>,
    db: Mutex<ReplayDb>,
}

impl std::fmt::Debug for ReplayDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayDetector")
            .field("policy", &self.policy)
            .field("entries", &self.len())
            .finish()
    }
}

impl ReplayDetector {
    /// Creates an empty detector.
    pub fn new(policy: ReplayPolicy, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            policy,
            clock,
            db: Mutex::new(ReplayDb {
                active: Generation::default(),
                stale: Generation::default(),
                last_switch: now,
            }),
        }
    }

    /// A detector for `config`, or `None` when replay detection is disabled.
    pub fn from_config(config: &MixConfig, clock: Arc<dyn Clock>) -> Option<Arc<Self>> {
        config
            .replay
            .enabled
            .then(|| Arc::new(Self::new(ReplayPolicy::for_config(config), clock)))
    }

    /// The policy in force.
    pub fn policy(&self) -> ReplayPolicy {
        self.policy
    }

    /// Returns `true` when the identifier must be rejected.
    pub fn is_replay(&self, identifier: &[u8], timestamp: Option<u64>) -> bool {
        match self.check(identifier, timestamp) {
            Ok(()) => false,
            Err(ReplayError::Replayed) => {
                warn!("Replay detected");
                true
            }
            Err(reason) => {
                debug!("Replay check rejected identifier: {}", reason);
                true
            }
        }
    }

    /// Checks and records an identifier, reporting why it was rejected.
    ///
    /// Under [`ReplayPolicy::TagSet`] the timestamp is ignored.
    pub fn check(&self, identifier: &[u8], timestamp: Option<u64>) -> Result<(), ReplayError> {
        if identifier.len() < IDENTIFIER_LEN {
            return Err(ReplayError::IdentifierTooShort(identifier.len()));
        }
        let key = u32::from_be_bytes([identifier[0], identifier[1], identifier[2], identifier[3]]);
        let mut value = [0u8; IDENTIFIER_LEN];
        value.copy_from_slice(&identifier[..IDENTIFIER_LEN]);

        let mut db = self.db.lock();
        let mut admitted_at = 0;

        if let ReplayPolicy::TimeWindow { tolerance, max_delay } = self.policy {
            let now = self.clock.now_millis();
            let tolerance = tolerance.as_millis() as u64;
            let max_delay = max_delay.as_millis() as u64;
            let oldest = now.saturating_sub(tolerance).saturating_sub(max_delay);

            Self::rotate(&mut db, now, oldest, tolerance, max_delay);

            let timestamp = timestamp.unwrap_or(0);
            if timestamp > now.saturating_add(tolerance) {
                return Err(ReplayError::FromTheFuture { timestamp, now });
            }
            if timestamp < oldest {
                return Err(ReplayError::Expired { timestamp, oldest });
            }
            admitted_at = timestamp;
        }

        if db.contains(key, &value) {
            return Err(ReplayError::Replayed);
        }
        db.active.insert(key, value, admitted_at);
        Ok(())
    }

    /// Swaps generations once the window has passed.
    ///
    /// A generation is only discarded when all of its timestamps have fallen
    /// behind `oldest`, so no identifier that could still pass the timestamp
    /// check is ever forgotten. After a long idle period both generations may
    /// be expired at once and are cleared together.
    fn rotate(db: &mut ReplayDb, now: u64, oldest: u64, tolerance: u64, max_delay: u64) {
        if now.saturating_sub(db.last_switch).saturating_sub(tolerance) < max_delay.max(1) {
            return;
        }
        if !db.stale.is_expired(oldest) {
            debug!(
                "Replay rotation deferred, stale generation still holds timestamps up to {}",
                db.stale.newest
            );
            return;
        }
        if db.active.is_expired(oldest) {
            db.active = Generation::default();
            db.stale = Generation::default();
            db.last_switch = now;
            debug!("Replay database cleared, every identifier older than {}", oldest);
        } else {
            db.stale = std::mem::take(&mut db.active);
            db.last_switch = now;
            debug!("Replay database rotated, {} identifiers now stale", db.stale.len());
        }
    }

    /// Number of identifiers currently remembered.
    pub fn len(&self) -> usize {
        let db = self.db.lock();
        db.active.len() + db.stale.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
