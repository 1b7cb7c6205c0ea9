//! Bounded, fixed-interval condition polling
//!
//! Every wait in the bring-up sequence goes through [`poll_until`]: the check
//! runs immediately, then once per interval, until it reports `true` or the
//! attempt budget runs out. Attempts run one after another on the calling
//! task. There is no cancellation other than the budget itself.
//!
//! A check returns `Result<bool>`:
//! - `Ok(true)` - the condition holds, stop
//! - `Ok(false)` - not yet, try again
//! - `Err(e)` with `e.is_fatal()` - abort the poll and propagate `e`
//! - any other `Err` - handled by the poll's [`ErrorPolicy`]

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::DEFAULT_POLL_INTERVAL;

/// What to do when a check raises a non-fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Treat the error as "condition not yet true" and keep polling
    #[default]
    Continue,
    /// Treat the error as "condition satisfied" and stop
    ///
    /// Used for checks like "has this stopped", where a failing probe most
    /// likely means the thing is already gone.
    AssumeSatisfied,
}

/// Description of a bounded wait
#[derive(Debug, Clone)]
pub struct PollSpec {
    /// Human-readable subject, used in logs and the timeout error
    pub subject: String,
    pub max_attempts: u32,
    pub interval: Duration,
    pub on_error: ErrorPolicy,
}

impl PollSpec {
    pub fn new(subject: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            subject: subject.into(),
            max_attempts,
            interval: DEFAULT_POLL_INTERVAL,
            on_error: ErrorPolicy::Continue,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn assume_satisfied_on_error(self) -> Self {
        self.on_error(ErrorPolicy::AssumeSatisfied)
    }

    /// Upper bound on the time spent sleeping between attempts
    pub fn wall_clock_bound(&self) -> Duration {
        self.interval * self.max_attempts
    }

    /// Run the poll with this spec
    pub async fn run<F, Fut>(&self, check: F) -> Result<u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        poll_until(self, check).await
    }
}

/// Poll `check` until it reports `true`
///
/// Returns the number of attempts used. Fails with [`Error::PollTimeout`]
/// naming the subject and attempt count when the budget is exhausted.
pub async fn poll_until<F, Fut>(spec: &PollSpec, mut check: F) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut attempts = 0;

    while attempts < spec.max_attempts {
        attempts += 1;

        match check().await {
            Ok(true) => {
                tracing::debug!(
                    "{} satisfied after {}/{} attempts",
                    spec.subject,
                    attempts,
                    spec.max_attempts
                );
                return Ok(attempts);
            }
            Ok(false) => {
                tracing::trace!(
                    "{} not yet satisfied ({}/{})",
                    spec.subject,
                    attempts,
                    spec.max_attempts
                );
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("{} aborted on attempt {}: {}", spec.subject, attempts, e);
                return Err(e);
            }
            Err(e) => match spec.on_error {
                ErrorPolicy::AssumeSatisfied => {
                    tracing::debug!(
                        "{} check failed ({}), assuming satisfied",
                        spec.subject,
                        e
                    );
                    return Ok(attempts);
                }
                ErrorPolicy::Continue => {
                    tracing::debug!(
                        "{} check failed on attempt {}/{}: {}",
                        spec.subject,
                        attempts,
                        spec.max_attempts,
                        e
                    );
                }
            },
        }

        if attempts < spec.max_attempts {
            tokio::time::sleep(spec.interval).await;
        }
    }

    tracing::warn!(
        "Timed out waiting for {} after {} attempts",
        spec.subject,
        attempts
    );
    Err(Error::poll_timeout(spec.subject.clone(), attempts))
}
