//! Polling with optional backoff and deadlines.
//!
//! Every blocking wait in a job (operation status, group removal, group
//! completion) goes through `poll_until`. Defaults poll at a fixed interval
//! with no deadline; `with_backoff` and `with_jitter` turn on exponential
//! growth of the delay, capped at `max_interval`.

use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

/// Poll schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Delay before the second attempt.
    pub interval: Duration,
    /// Upper bound for the delay when backing off.
    pub max_interval: Duration,
    /// Growth factor per attempt (1.0 = fixed interval).
    pub multiplier: f64,
    /// Randomize each delay to 0.5x..1.5x.
    pub jitter: bool,
    /// Give up once this much time has passed. `None` waits forever.
    pub deadline: Option<Duration>,
}

impl PollConfig {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            multiplier: 1.0,
            jitter: false,
            deadline: None,
        }
    }

    pub fn with_backoff(mut self, max_interval: Duration, multiplier: f64) -> Self {
        self.max_interval = max_interval.max(self.interval);
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn next_delay(&self, current: Duration) -> Duration {
        let grown = current.as_secs_f64() * self.multiplier;
        Duration::from_secs_f64(grown.min(self.max_interval.as_secs_f64()))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }
}

/// Why polling stopped without a result.
#[derive(Debug)]
pub enum PollError<E> {
    /// The deadline passed before the condition held.
    DeadlineExceeded { elapsed: Duration },
    /// An attempt failed; polling stops at the first failure.
    Failed(E),
}

/// Call `attempt` until it yields a value, sleeping between attempts.
///
/// `what` names the wait in debug logs.
pub fn poll_until<T, E, F>(
    config: &PollConfig,
    what: &str,
    mut attempt: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Result<Option<T>, E>,
{
    let started = Instant::now();
    let mut delay = config.interval;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let Some(value) = attempt().map_err(PollError::Failed)? {
            return Ok(value);
        }

        let elapsed = started.elapsed();
        let mut sleep_for = config.jittered(delay);
        if let Some(deadline) = config.deadline {
            if elapsed >= deadline {
                return Err(PollError::DeadlineExceeded { elapsed });
            }
            sleep_for = sleep_for.min(deadline - elapsed);
        }

        debug!(
            what,
            attempts,
            delay_ms = sleep_for.as_millis() as u64,
            "not finished yet, polling again"
        );
        thread::sleep(sleep_for);
        delay = config.next_delay(delay);
    }
}

/// Optional overall time limit for a caller-side wait.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.limit.map(|limit| limit.saturating_sub(self.elapsed()))
    }

    pub fn is_expired(&self) -> bool {
        match self.limit {
            Some(limit) => self.elapsed() > limit,
            None => false,
        }
    }

    /// `wait` capped by the remaining time.
    pub fn cap(&self, wait: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => wait.min(remaining),
            None => wait,
        }
    }
}
