use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::source::{DataSource, ObservationRequest, Segment, SourceError};

/// Retries a [`DataSource`] on retryable errors with exponential backoff.
///
/// Contract: at most `retries + 1` calls per fetch; after failed attempt `n`
/// (0-based) it sleeps `backoff_factor * 2^n` seconds. Errors for which
/// [`SourceError::is_retryable`] is false are returned immediately.
pub struct RetryingSource<S> {
    inner: S,
    retries: u32,
    backoff_factor: f64,
}

impl<S> RetryingSource<S> {
    pub fn new(inner: S, retries: u32, backoff_factor: f64) -> Self {
        Self {
            inner,
            retries,
            backoff_factor: backoff_factor.max(0.0),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.backoff_factor * 2f64.powi(attempt as i32))
    }
}

#[async_trait]
impl<S: DataSource> DataSource for RetryingSource<S> {
    async fn fetch(&self, request: &ObservationRequest) -> Result<Vec<Segment>, SourceError> {
        let mut attempt = 0;
        loop {
            match self.inner.fetch(request).await {
                Ok(segments) => return Ok(segments),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        retries = self.retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Location;
    use crate::variable::Variable;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with `error` for the first `failures` calls, then succeeds.
    struct FlakySource {
        calls: AtomicUsize,
        failures: usize,
        error: SourceError,
    }

    #[async_trait]
    impl DataSource for FlakySource {
        async fn fetch(&self, _request: &ObservationRequest) -> Result<Vec<Segment>, SourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(vec![Segment::default()])
            }
        }
    }

    fn flaky(failures: usize, error: SourceError) -> FlakySource {
        FlakySource {
            calls: AtomicUsize::new(0),
            failures,
            error,
        }
    }

    fn request() -> ObservationRequest {
        ObservationRequest {
            location: Location {
                latitude: 0.0,
                longitude: 0.0,
            },
            variables: BTreeSet::from([Variable::Pm2_5]),
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let source = RetryingSource::new(flaky(2, SourceError::Timeout), 5, 0.0);

        let segments = source.fetch(&request()).await.unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_configured_retries() {
        let source = RetryingSource::new(flaky(10, SourceError::Timeout), 2, 0.0);

        let err = source.fetch(&request()).await.unwrap_err();

        assert_eq!(err, SourceError::Timeout);
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let bad_request = SourceError::Status {
            status: 400,
            body: "Parameter 'hourly' is invalid".to_string(),
        };
        let source = RetryingSource::new(flaky(10, bad_request.clone()), 5, 0.0);

        assert_eq!(source.fetch(&request()).await.unwrap_err(), bad_request);
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let source = RetryingSource::new(flaky(0, SourceError::Timeout), 5, 0.2);

        assert_eq!(source.backoff(0), Duration::from_secs_f64(0.2));
        assert_eq!(source.backoff(1), Duration::from_secs_f64(0.4));
        assert_eq!(source.backoff(2), Duration::from_secs_f64(0.8));
    }
}
