use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Pacing between polling attempts.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay after the first failed attempt.
    pub initial_interval: Duration,
    /// Upper bound on the delay between attempts.
    pub max_interval: Duration,
    /// Multiplier applied to the delay after each attempt (1.0 = fixed).
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.0].
    pub jitter: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

impl PollPolicy {
    /// Poll at a constant interval with no jitter.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Jittered exponential backoff from `initial` up to `max`.
    pub fn backoff(initial: Duration, max: Duration) -> Self {
        Self {
            initial_interval: initial,
            max_interval: max,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Delay after the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = base.min(self.max_interval.as_secs_f64());
        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }
}

/// Attempt count and elapsed time of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub attempts: u32,
    pub elapsed: Duration,
}

/// What a single attempt decided.
#[derive(Debug)]
pub enum Step<T, E> {
    /// Terminal success.
    Done(T),
    /// Not there yet; poll again. Carries what was observed, if anything.
    Retry(Option<String>),
    /// Terminal assertion failure; no further attempts.
    Fail(E),
}

/// Why a polling loop stopped without success.
#[derive(Debug)]
pub enum PollError<E> {
    TimedOut {
        progress: Progress,
        last_observed: Option<String>,
    },
    Failed { error: E, progress: Progress },
}

/// Run `attempt` until it returns [`Step::Done`] or [`Step::Fail`], or the
/// budget elapses.
///
/// The first attempt always runs to completion, so a zero budget means
/// exactly one attempt. Later attempts are cut off when the budget runs out
/// and the loop reports [`PollError::TimedOut`]. `attempt` receives the
/// 1-based attempt number and the time elapsed before it started.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    budget: Duration,
    mut attempt: F,
) -> Result<(T, Progress), PollError<E>>
where
    F: FnMut(Progress) -> Fut,
    Fut: Future<Output = Step<T, E>>,
{
    let start = Instant::now();
    let deadline = start + budget;
    let mut last_observed = None;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let fut = attempt(Progress {
            attempts,
            elapsed: start.elapsed(),
        });

        let step = if attempts == 1 {
            fut.await
        } else {
            match tokio::time::timeout_at(deadline, fut).await {
                Ok(step) => step,
                Err(_) => {
                    return Err(PollError::TimedOut {
                        progress: Progress {
                            attempts,
                            elapsed: start.elapsed(),
                        },
                        last_observed,
                    })
                }
            }
        };

        let progress = Progress {
            attempts,
            elapsed: start.elapsed(),
        };

        match step {
            Step::Done(value) => return Ok((value, progress)),
            Step::Fail(error) => return Err(PollError::Failed { error, progress }),
            Step::Retry(observed) => {
                if observed.is_some() {
                    last_observed = observed;
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::TimedOut {
                progress,
                last_observed,
            });
        }

        let delay = policy
            .delay_for_attempt(attempts - 1)
            .min(deadline.saturating_duration_since(now));
        tracing::debug!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "attempt did not succeed, polling again"
        );
        tokio::time::sleep(delay).await;
    }
}
