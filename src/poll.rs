// ABOUTME: Cooperative polling primitive with a fixed interval and deadline.
// ABOUTME: Drives rollout and reversion convergence; testable with a paused clock.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Interval and deadline for one convergence loop.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub deadline: Duration,
}

/// How a polling loop ended. Exceeding the deadline is a normal, expected
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Converged { value: T, elapsed: Duration },
    DeadlineExceeded { elapsed: Duration },
}

/// Probe at a fixed interval until the probe reports convergence or the
/// deadline elapses. The first probe runs immediately; probe errors
/// propagate and end the loop.
///
/// Repeated probing must not mutate the observed system; the probe is a
/// read-only status query.
pub async fn poll_until<T, E, F, Fut>(config: PollConfig, mut probe: F) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();
    let deadline = start + config.deadline;

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // First tick completes immediately.
        let tick = ticker.tick().await;

        if let Some(value) = probe().await? {
            return Ok(PollOutcome::Converged {
                value,
                elapsed: start.elapsed(),
            });
        }

        if tick >= deadline || Instant::now() + config.interval > deadline {
            return Ok(PollOutcome::DeadlineExceeded {
                elapsed: start.elapsed(),
            });
        }
    }
}
