use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{PacingSection, RetrySection};

use super::error::{BrowserError, BrowserResult};
use super::metrics::BrowserMetrics;
use super::page::SitePage;
use super::telemetry::{
    categorize, note_failure, FailureCategory, FailureRecord, HarvestTelemetry, RemediationAction,
};

/// Errors the pacer knows how to classify.
pub trait RetryClass: Display {
    /// Permanent conditions are surfaced on the first failure.
    fn is_transient(&self) -> bool;
    fn failure_category(&self) -> FailureCategory;
}

impl RetryClass for BrowserError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            BrowserError::Cdp(_)
                | BrowserError::Timeout(_)
                | BrowserError::Network(_)
                | BrowserError::Io(_)
        )
    }

    fn failure_category(&self) -> FailureCategory {
        categorize(self)
    }
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

/// Randomized inter-request pacing plus bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPacer {
    delay_min: Duration,
    delay_max: Duration,
    max_attempts: usize,
    backoff_base: u64,
    telemetry: Option<Arc<HarvestTelemetry>>,
    metrics: Arc<Mutex<BrowserMetrics>>,
}

impl RetryPacer {
    pub fn new(
        pacing: &PacingSection,
        retry: &RetrySection,
        metrics: Arc<Mutex<BrowserMetrics>>,
    ) -> Self {
        let (low, high) = if pacing.delay_min_ms <= pacing.delay_max_ms {
            (pacing.delay_min_ms, pacing.delay_max_ms)
        } else {
            (pacing.delay_max_ms, pacing.delay_min_ms)
        };
        Self {
            delay_min: Duration::from_millis(low),
            delay_max: Duration::from_millis(high),
            max_attempts: retry.max_attempts.max(1),
            backoff_base: retry.backoff_base_seconds,
            telemetry: None,
            metrics,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<HarvestTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn telemetry(&self) -> Option<&HarvestTelemetry> {
        self.telemetry.as_deref()
    }

    pub fn metrics(&self) -> Arc<Mutex<BrowserMetrics>> {
        Arc::clone(&self.metrics)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn pacing_delay(&self) -> Duration {
        if self.delay_max <= self.delay_min {
            return self.delay_min;
        }
        let millis = rand::thread_rng()
            .gen_range(self.delay_min.as_millis() as u64..=self.delay_max.as_millis() as u64);
        Duration::from_millis(millis)
    }

    /// Sleeps for a uniformly drawn delay inside the configured window.
    pub async fn pace(&self) {
        let delay = self.pacing_delay();
        debug!(delay_ms = delay.as_millis() as u64, "pacing");
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    /// Wait before the retry that follows failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
        Duration::from_secs(self.backoff_base.saturating_pow(exponent))
    }

    pub async fn run<F, Fut, T, E>(&self, url: &str, mut operation: F) -> Result<RetryOutcome<T>, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClass,
    {
        let mut attempt = 1usize;
        loop {
            match operation(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt,
                    })
                }
                Err(error) => {
                    let final_attempt = attempt >= self.max_attempts || !error.is_transient();
                    let delay = self.backoff_for(attempt);
                    let action = if final_attempt {
                        RemediationAction::Abort
                    } else {
                        RemediationAction::RetryScheduled {
                            delay_seconds: delay.as_secs(),
                        }
                    };
                    note_failure(
                        self.telemetry(),
                        FailureRecord::new(
                            url,
                            error.failure_category(),
                            error.to_string(),
                            attempt,
                            action,
                        ),
                    );
                    if final_attempt {
                        warn!(url, attempt, error = %error, "giving up");
                        return Err(error);
                    }
                    if let Ok(mut metrics) = self.metrics.lock() {
                        metrics.record_retry();
                    }
                    warn!(url, attempt, delay_secs = delay.as_secs(), error = %error, "attempt failed, backing off");
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Navigates with retry, then applies the pacing delay.
    pub async fn navigate<P>(&self, page: &P, url: &str) -> BrowserResult<()>
    where
        P: SitePage + ?Sized,
    {
        info!(url, "navigating");
        self.run(url, move |_| page.goto(url)).await?;
        self.pace().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use tempfile::tempdir;
    use tokio::time::Instant;

    fn pacer(max_attempts: usize, delay: [u64; 2]) -> RetryPacer {
        RetryPacer::new(
            &PacingSection {
                delay_min_ms: delay[0],
                delay_max_ms: delay[1],
                ..PacingSection::default()
            },
            &RetrySection {
                max_attempts,
                backoff_base_seconds: 2,
            },
            Arc::new(Mutex::new(BrowserMetrics::default())),
        )
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let pacer = pacer(3, [0, 0]);
        assert_eq!(pacer.backoff_for(1), Duration::from_secs(2));
        assert_eq!(pacer.backoff_for(2), Duration::from_secs(4));
        assert_eq!(pacer.backoff_for(3), Duration::from_secs(8));
    }

    #[test]
    fn pacing_delay_stays_in_window() {
        let pacer = pacer(3, [2_000, 5_000]);
        for _ in 0..64 {
            let delay = pacer.pacing_delay();
            assert!(delay >= Duration::from_millis(2_000));
            assert!(delay <= Duration::from_millis(5_000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_after_backoff() {
        let dir = tempdir().unwrap();
        let telemetry = Arc::new(
            HarvestTelemetry::new(
                dir.path().join("failures.jsonl"),
                dir.path().join("ledger.sqlite"),
            )
            .unwrap(),
        );
        let pacer = pacer(3, [0, 0]).with_telemetry(Arc::clone(&telemetry));
        let started = Instant::now();
        let outcome = pacer
            .run("https://example.test/1/", |attempt| async move {
                if attempt == 1 {
                    Err(BrowserError::Timeout("navigation".into()))
                } else {
                    Ok::<_, BrowserError>("ok")
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result, "ok");
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(pacer.metrics().lock().unwrap().retries, 1);

        let conn = Connection::open(telemetry.database_path()).unwrap();
        let failures: i64 = conn
            .query_row("SELECT COUNT(*) FROM harvest_failures", [], |row| row.get(0))
            .unwrap();
        assert_eq!(failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn error_propagates_after_final_attempt() {
        let pacer = pacer(3, [0, 0]);
        let mut calls = 0usize;
        let result = pacer
            .run("https://example.test/2/", |_| {
                calls += 1;
                async { Err::<(), _>(BrowserError::Network("net::ERR_CONNECTION_RESET".into())) }
            })
            .await;
        assert!(matches!(result, Err(BrowserError::Network(_))));
        assert_eq!(calls, 3);
        assert_eq!(pacer.metrics().lock().unwrap().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let pacer = pacer(3, [0, 0]);
        let mut calls = 0usize;
        let result = pacer
            .run("https://example.test/3/", |_| {
                calls += 1;
                async { Err::<(), _>(BrowserError::Configuration("bad url".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
