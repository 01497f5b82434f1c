//! Injectable time source.
//!
//! Deadlines, retry sleeps and the checkpoint time-gate all read time through
//! a [`Clock`], so tests can drive them with a [`ManualClock`] instead of
//! waiting on the wall clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A source of wall-clock time that can also suspend the caller.
#[async_trait]
pub trait Clock: std::fmt::Debug + Send + Sync + 'static {
    /// Current wall-clock time. No guarantees are made about monotonicity.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Convert a std duration into a chrono one for timestamp arithmetic.
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

/// A [`Clock`] backed by [`Utc::now`] and `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A [`Clock`] whose time only moves when told to.
///
/// `sleep` advances the clock by the requested duration and returns
/// immediately.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
    sleeps: AtomicU64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
            sleeps: AtomicU64::new(0),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.now.write() = time;
    }

    pub fn advance(&self, duration: Duration) -> DateTime<Utc> {
        let mut now = self.now.write();
        *now = *now + to_chrono(duration);
        *now
    }

    /// Number of `sleep` calls observed.
    pub fn sleep_count(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(duration);
    }
}
