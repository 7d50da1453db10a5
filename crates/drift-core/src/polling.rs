//! Generic polling loop with bounded backoff.
//!
//! Remote jobs are observed by repeatedly probing their status. The wait
//! between probes grows exponentially up to a ceiling and carries random
//! jitter so that many pollers started together spread out over time.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    /// Terminal value; polling stops.
    Ready(T),
    /// Not finished yet; sleep and probe again.
    Pending,
}

/// Why [`poll_until`] stopped without a terminal value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStopped<E> {
    /// The probe itself failed.
    Probe(E),
    /// Shutdown was requested while waiting.
    Cancelled,
    /// The attempt ceiling was reached.
    Exhausted { attempts: u32 },
}

/// Bounded exponential backoff.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use drift_core::polling::Backoff;
///
/// let backoff = Backoff {
///     initial_ms: 100,
///     max_ms: 1_000,
///     multiplier: 2.0,
///     jitter_ms: 0,
///     max_attempts: None,
/// };
/// assert_eq!(backoff.delay(0), Duration::from_millis(100));
/// assert_eq!(backoff.delay(3), Duration::from_millis(800));
/// assert_eq!(backoff.delay(10), Duration::from_millis(1_000));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Backoff {
    /// Delay before the second probe.
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    /// Delay ceiling.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    /// Growth factor per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound of random jitter added to every delay.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Maximum number of probes; `None` polls until a terminal value.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_initial_ms() -> u64 {
    1_000
}

fn default_max_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_jitter_ms() -> u64 {
    500
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
            multiplier: default_multiplier(),
            jitter_ms: default_jitter_ms(),
            max_attempts: None,
        }
    }
}

impl Backoff {
    /// Delay to wait after probe number `attempt` (zero based), without jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_ms as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Delay after probe `attempt` with jitter applied.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        self.delay(attempt) + random_jitter(self.jitter_ms)
    }
}

/// Generate a random jitter duration up to the specified maximum milliseconds.
pub fn random_jitter(max_ms: u64) -> Duration {
    if max_ms > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_ms))
    } else {
        Duration::ZERO
    }
}

/// Probe until a terminal value, sleeping with `backoff` between probes.
///
/// Stops early when the probe errors, when `shutdown` is cancelled, or when
/// `backoff.max_attempts` probes returned [`Poll::Pending`].
pub async fn poll_until<T, E, F, Fut>(
    backoff: &Backoff,
    shutdown: &CancellationToken,
    mut probe: F,
) -> Result<T, PollStopped<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>, E>>,
{
    let mut attempt: u32 = 0;

    loop {
        if shutdown.is_cancelled() {
            return Err(PollStopped::Cancelled);
        }

        match probe().await.map_err(PollStopped::Probe)? {
            Poll::Ready(value) => return Ok(value),
            Poll::Pending => {}
        }

        attempt = attempt.saturating_add(1);
        if backoff.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(PollStopped::Exhausted { attempts: attempt });
        }

        let wait = backoff.jittered_delay(attempt - 1);
        trace!(attempt, wait_ms = wait.as_millis(), "Still pending, backing off");
        if shutdown
            .run_until_cancelled(tokio::time::sleep(wait))
            .await
            .is_none()
        {
            return Err(PollStopped::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> Backoff {
        Backoff {
            initial_ms: 10,
            max_ms: 40,
            multiplier: 2.0,
            jitter_ms: 0,
            max_attempts: None,
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = fast();
        assert_eq!(backoff.delay(0), Duration::from_millis(10));
        assert_eq!(backoff.delay(1), Duration::from_millis(20));
        assert_eq!(backoff.delay(2), Duration::from_millis(40));
        assert_eq!(backoff.delay(30), Duration::from_millis(40));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(40));
    }

    #[test]
    fn test_random_jitter_bounds() {
        assert_eq!(random_jitter(0), Duration::ZERO);
        for _ in 0..100 {
            assert!(random_jitter(10) < Duration::from_millis(10));
        }
    }

    #[test]
    fn test_backoff_serde_defaults() {
        let backoff: Backoff = serde_yaml::from_str("initial_ms: 5").unwrap();
        assert_eq!(backoff.initial_ms, 5);
        assert_eq!(backoff.max_ms, 60_000);
        assert_eq!(backoff.max_attempts, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_ready_after_pending() {
        let calls = &AtomicU32::new(0);
        let result: Result<&str, PollStopped<()>> =
            poll_until(&fast(), &CancellationToken::new(), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Ok(Poll::Pending)
                } else {
                    Ok(Poll::Ready("done"))
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_probe_error() {
        let result: Result<(), PollStopped<&str>> =
            poll_until(&fast(), &CancellationToken::new(), || async { Err("boom") }).await;
        assert_eq!(result, Err(PollStopped::Probe("boom")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_exhausted() {
        let backoff = Backoff {
            max_attempts: Some(3),
            ..fast()
        };
        let result: Result<(), PollStopped<()>> =
            poll_until(&backoff, &CancellationToken::new(), || async { Ok(Poll::Pending) }).await;
        assert_eq!(result, Err(PollStopped::Exhausted { attempts: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_cancelled() {
        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();
        let calls = &AtomicU32::new(0);

        let result: Result<(), PollStopped<()>> = poll_until(&fast(), &shutdown, move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                canceller.cancel();
            }
            async { Ok(Poll::Pending) }
        })
        .await;

        assert_eq!(result, Err(PollStopped::Cancelled));
    }
}
