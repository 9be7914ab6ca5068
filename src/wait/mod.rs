//! Bounded waits
//!
//! Two families live here. [`wait_until`] polls a condition on a fixed
//! [`PollSchedule`]; the [`watch`] waits subscribe to change notifications
//! and resolve on the first matching event. [`retry_fixed`] is the small
//! fixed-backoff retry used for session opens, label re-checks and kills.

pub mod conditions;
pub mod watch;

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};

pub use conditions::{ClusterExpectation, EventMatcher, OnlineCount, PodPhase};
pub use watch::WatchSubscription;

/// Interval substituted for a zero interval so a schedule always advances
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Total budget and spacing of a polling wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    timeout: Duration,
    interval: Duration,
}

impl PollSchedule {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn from_secs(timeout: u64, interval: u64) -> Self {
        Self::new(Duration::from_secs(timeout), Duration::from_secs(interval))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of times the condition is evaluated before giving up.
    pub fn attempts(&self) -> u32 {
        let timeout = self.timeout.as_nanos();
        let interval = self.interval.as_nanos();
        u32::try_from(timeout.div_ceil(interval)).unwrap_or(u32::MAX)
    }
}

/// Evaluate `condition` immediately and then once per interval until it
/// returns `Ok(true)`.
///
/// Elapsed time is the sum of the intervals slept, not wall-clock time, so a
/// slow condition stretches the real duration. An `Err` from the condition
/// aborts the wait unchanged. When the summed intervals reach the timeout the
/// wait fails with [`Error::Timeout`].
pub async fn wait_until<F, Fut>(what: &str, schedule: PollSchedule, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut elapsed = Duration::ZERO;
    let mut attempt: u32 = 0;

    while elapsed < schedule.timeout {
        attempt += 1;
        if condition().await? {
            debug!(what, attempt, ?elapsed, "Condition met");
            return Ok(());
        }
        tokio::time::sleep(schedule.interval).await;
        elapsed += schedule.interval;
    }

    Err(Error::Timeout {
        what: what.to_string(),
        after: schedule.timeout,
    })
}

/// Run `op` up to `attempts` times with a fixed pause between failures.
///
/// The closure receives the 1-based attempt number. The last error is
/// returned once the attempts are exhausted.
pub async fn retry_fixed<T, E, F, Fut>(
    what: &str,
    attempts: u32,
    backoff: Duration,
    mut op: F,
) -> std::result::Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(what, attempt, attempts, error = %e, "Attempt failed, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
