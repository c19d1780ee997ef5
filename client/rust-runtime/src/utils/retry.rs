use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Backoff policy for calls to the remote side.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total tries, including the first one.
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            jitter_max: Some(Duration::from_millis(100)),
        }
    }
}

impl RetryConfig {
    /// Single try; for callers that already retry on their own schedule.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter_max: None,
        }
    }

    /// Wait before the `retry`-th retry (0-based), jitter excluded.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn jitter(&self) -> Duration {
        match self.jitter_max {
            Some(max) if !max.is_zero() => {
                let extra = rand::rng().random_range(0..=max.as_millis() as u64);
                Duration::from_millis(extra)
            }
            _ => Duration::ZERO,
        }
    }
}

/// Runs `f` until it succeeds, `should_retry` rejects the error, or the
/// attempts run out. The last error is returned as is.
pub async fn retry_when<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut should_retry: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: FnMut(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0usize;

    loop {
        let err = match f().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        attempt += 1;
        if attempt >= max_attempts || !should_retry(&err) {
            return Err(err);
        }

        let wait = config.backoff_for((attempt - 1) as u32) + config.jitter();
        tracing::debug!(
            "Attempt {}/{} failed ({}), retrying in {:?}",
            attempt,
            max_attempts,
            err,
            wait
        );
        tokio::time::sleep(wait).await;
    }
}

/// [`retry_when`] that retries every error.
pub async fn retry_async_with_config<F, Fut, T, E>(config: RetryConfig, f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_when(&config, |_| true, f).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter_max: None,
        }
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let config = RetryConfig {
            jitter_max: None,
            ..RetryConfig::default()
        };
        assert_eq!(config.backoff_for(0), Duration::from_millis(200));
        assert_eq!(config.backoff_for(1), Duration::from_millis(400));
        assert_eq!(config.backoff_for(3), Duration::from_millis(1600));
        assert_eq!(config.backoff_for(4), Duration::from_secs(2));
        assert_eq!(config.backoff_for(40), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let counter = AtomicUsize::new(0);

        let res: Result<usize, &'static str> = retry_async_with_config(fast(), || async {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("flaky")
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(res, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicUsize::new(0);

        let res: Result<(), &'static str> = retry_async_with_config(fast(), || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("down")
        })
        .await;

        assert_eq!(res, Err("down"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_stops_immediately() {
        let counter = AtomicUsize::new(0);

        let res: Result<(), &'static str> = retry_when(
            &fast(),
            |e: &&str| *e != "not found",
            || async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("not found")
            },
        )
        .await;

        assert_eq!(res, Err("not found"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_retry_tries_once() {
        let counter = AtomicUsize::new(0);

        let res: Result<(), &'static str> =
            retry_async_with_config(RetryConfig::no_retry(), || async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("nope")
            })
            .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
