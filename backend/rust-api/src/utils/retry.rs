use std::time::Duration;

/// Bounded exponential backoff with optional random jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    fn delay(&self, backoff: Duration) -> Duration {
        let Some(jitter_max) = self.jitter_max else {
            return backoff;
        };
        let jitter_ms = jitter_max.as_millis() as u64;
        if jitter_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
    }
}

/// Retries `f` while `should_retry` accepts the error and attempts remain.
/// The last error is returned unchanged.
pub async fn retry_async_when<F, Fut, T, E, P>(
    config: RetryConfig,
    should_retry: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempts_left = config.max_attempts.max(1);
    let mut backoff = config.base_backoff;

    loop {
        let err = match f().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        attempts_left -= 1;
        if attempts_left == 0 || !should_retry(&err) {
            return Err(err);
        }

        let wait = config.delay(backoff);
        tracing::debug!("Retrying after {:?} ({} attempts left)", wait, attempts_left);
        tokio::time::sleep(wait).await;
        backoff = std::cmp::min(backoff * 2, config.max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter_max: None,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let res: Result<usize, &'static str> = retry_async_when(fast(3), |_| true, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("busy")
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(res, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let res: Result<(), &'static str> = retry_async_when(fast(2), |_| true, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("busy")
        })
        .await;

        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let res: Result<(), &'static str> =
            retry_async_when(fast(3), |e| *e == "transient", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("permanent")
            })
            .await;

        assert_eq!(res, Err("permanent"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let config = RetryConfig {
            jitter_max: Some(Duration::from_millis(5)),
            ..fast(1)
        };
        for _ in 0..50 {
            let wait = config.delay(Duration::from_millis(10));
            assert!(wait >= Duration::from_millis(10) && wait <= Duration::from_millis(15));
        }
    }
}
