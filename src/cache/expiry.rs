//! Expiry Evaluator Module
//!
//! Per-entry expiry bookkeeping and policy evaluation. Pure functions over
//! timestamps taken from an injected clock.
//!
//! All time arithmetic is done in nanoseconds: stored timestamps and policy
//! thresholds use the same unit, never mixed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// == Clock ==
/// Monotonic-enough time source injected at cache construction.
///
/// Returns nanoseconds. The engine only ever compares differences between
/// readings, so the epoch is irrelevant as long as one clock is used
/// consistently for a cache instance.
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> u64 + Send + Sync>);

impl Clock {
    /// Creates a clock from an arbitrary nanosecond source.
    pub fn new(source: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self(Arc::new(source))
    }

    /// The default wall clock, in nanoseconds since the Unix epoch.
    pub fn system() -> Self {
        Self::new(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("Time went backwards")
                .as_nanos() as u64
        })
    }

    /// Current reading in nanoseconds.
    pub fn now(&self) -> u64 {
        (self.0)()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Clock").finish()
    }
}

// == Manual Clock ==
/// Hand-advanced clock for deterministic expiry tests.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a manual clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a [`Clock`] backed by this manual source.
    pub fn clock(&self) -> Clock {
        let now = self.now.clone();
        Clock::new(move || now.load(Ordering::SeqCst))
    }

    /// Advances the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.now
            .fetch_add(delta.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Current reading in nanoseconds.
    pub fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// == Expiry Policy ==
/// Time-based expiry policy, one per cache instance.
///
/// Each variant (except `Eternal`) carries the duration after which an entry
/// is considered expired, measured from the variant's relevant timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Entries never expire
    Eternal,
    /// Expire `Duration` after first insertion
    Created(Duration),
    /// Expire `Duration` after the last read
    Accessed(Duration),
    /// Expire `Duration` after the last write (creation or update)
    Modified(Duration),
    /// Expire `Duration` after the last touch of any kind
    Touched(Duration),
}

// == Expiry Data ==
/// Per-entry timestamps consulted by the expiry policy.
///
/// `created` is always set; `accessed` and `updated` stay `None` until the
/// first read and first update respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryData {
    /// Timestamp at first insertion (nanoseconds)
    pub created: u64,
    /// Timestamp of last read, None until first read
    pub accessed: Option<u64>,
    /// Timestamp of last value change, None until first update
    pub updated: Option<u64>,
}

impl ExpiryData {
    // == Constructor ==
    /// Creates fresh expiry data stamped at `now`.
    pub fn new(now: u64) -> Self {
        Self {
            created: now,
            accessed: None,
            updated: None,
        }
    }

    // == Access Touch ==
    /// Records a read at `now`.
    pub fn access(&mut self, now: u64) {
        self.accessed = Some(now);
    }

    // == Update Touch ==
    /// Records a value change at `now`.
    pub fn update(&mut self, now: u64) {
        self.updated = Some(now);
    }

    // == Expired ==
    /// Evaluates the policy against these timestamps at `now`.
    ///
    /// An entry is expired when more than the policy's threshold has elapsed
    /// since the most recent of the policy's relevant timestamps.
    ///
    /// Edge case: under `Accessed`, an entry that has never been read is not
    /// yet expirable; the window only opens on the first access.
    pub fn expired(&self, policy: &ExpiryPolicy, now: u64) -> bool {
        match policy {
            ExpiryPolicy::Eternal => false,
            ExpiryPolicy::Created(threshold) => elapsed_exceeds(now, self.created, *threshold),
            ExpiryPolicy::Accessed(threshold) => match self.accessed {
                Some(accessed) => elapsed_exceeds(now, accessed, *threshold),
                None => false,
            },
            ExpiryPolicy::Modified(threshold) => {
                let last = self.created.max(self.updated.unwrap_or(0));
                elapsed_exceeds(now, last, *threshold)
            }
            ExpiryPolicy::Touched(threshold) => {
                let last = self
                    .created
                    .max(self.updated.unwrap_or(0))
                    .max(self.accessed.unwrap_or(0));
                elapsed_exceeds(now, last, *threshold)
            }
        }
    }
}

/// True when strictly more than `threshold` has elapsed since `since`.
fn elapsed_exceeds(now: u64, since: u64, threshold: Duration) -> bool {
    now.saturating_sub(since) > threshold.as_nanos() as u64
}
