//! Sleep-based polling shared by blocking reads and write backpressure.

use std::thread;
use std::time::{Duration, Instant};

/// How often to re-check a condition and for how long at most.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

/// Why a wait ended. A timeout is not a failure: the caller carries on with
/// whatever state the store is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
}

/// Check `predicate` immediately and then once per `policy.interval`,
/// suspending the calling thread in between, until it holds or the timeout
/// elapses. Errors from the predicate end the wait and are returned as-is.
pub fn wait_until<E>(
    policy: &PollPolicy,
    mut predicate: impl FnMut() -> Result<bool, E>,
) -> Result<WaitOutcome, E> {
    let started = Instant::now();
    loop {
        if predicate()? {
            return Ok(WaitOutcome::Satisfied);
        }
        let sleep_for = match policy.timeout {
            Some(timeout) => {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    return Ok(WaitOutcome::TimedOut);
                }
                policy.interval.min(timeout - elapsed)
            }
            None => policy.interval,
        };
        thread::sleep(sleep_for);
    }
}

/// Backpressure is satisfied once the partition holds at most `threshold`
/// deliverable messages.
pub fn within_threshold(count: usize, threshold: usize) -> bool {
    count <= threshold
}

/// Whether this write should pay for the backpressure count query, given the
/// configured probability and a uniform draw from `[0, 1)`.
pub fn should_check(probability: Option<f64>, draw: f64) -> bool {
    probability.map_or(true, |p| draw < p)
}
