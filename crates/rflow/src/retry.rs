//! 🔄 Retry policy: exponential backoff for things that said "try again later".
//!
//! Only errors classified as [`FlowError::Transient`](crate::error::FlowError::Transient)
//! get another go. Everything else surfaces on the first failure. Backoff sleeps race
//! the caller's cancellation token, so a retry loop never outlives its deadline by
//! more than the attempt already in flight.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{self, FlowError};

/// ⏱️ Exponential backoff with an attempt cap and an optional cumulative budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    /// 🔢 total attempts, the first one included
    pub max_attempts: u32,
    /// ⏳ give up once this much time has passed since the first attempt
    pub max_elapsed: Option<Duration>,
}

impl RetryPolicy {
    /// 📡 Batched build fetches: 200 ms, doubling, 10 retries, 10 s per sleep at most.
    pub fn fetch_default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            multiplier: 2,
            max_delay: Duration::from_secs(10),
            max_attempts: 11,
            max_elapsed: None,
        }
    }

    /// 📥 Warehouse inserts: 50 ms, doubling, 50 attempts or 45 s, whichever comes first.
    pub fn insert_default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            multiplier: 2,
            max_delay: Duration::from_secs(10),
            max_attempts: 50,
            max_elapsed: Some(Duration::from_secs(45)),
        }
    }

    /// ⏱️ Sleep before attempt `failed + 1`, given `failed` failures so far (≥ 1).
    pub fn delay_after(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// 🔁 Run `op` until it succeeds, fails non-transiently, or the policy gives up.
    ///
    /// `op` receives the 1-based attempt number. Cancellation during a backoff sleep
    /// returns [`FlowError::Cancelled`].
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !error::is_transient(&err) => return Err(err),
                Err(err) => err,
            };

            if attempt >= self.max_attempts {
                return Err(err.context(format!("💀 {label}: still failing after {attempt} attempts")));
            }
            let delay = self.delay_after(attempt);
            if let Some(budget) = self.max_elapsed {
                if started.elapsed() + delay > budget {
                    return Err(err.context(format!(
                        "💀 {label}: retry budget of {budget:?} spent after {attempt} attempts"
                    )));
                }
            }

            warn!(attempt, ?delay, "🔄 {label} failed transiently, backing off: {err:#}");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(anyhow::Error::new(FlowError::Cancelled(format!("{label} backoff")))
                        .context(format!("last error: {err:#}")));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn the_one_where_the_delays_double_and_then_hit_the_ceiling() {
        let policy = RetryPolicy::fetch_default();
        let delays: Vec<_> = (1..=8).map(|n| policy.delay_after(n).as_millis()).collect();
        assert_eq!(delays, vec![200, 400, 800, 1600, 3200, 6400, 10_000, 10_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_transient_failures_eventually_succeed() -> Result<()> {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let value = RetryPolicy::fetch_default()
            .run(&CancellationToken::new(), "flaky fetch", move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(FlowError::Transient("503".into()).into())
                    } else {
                        Ok("🎉")
                    }
                }
            })
            .await?;
        assert_eq!(value, "🎉");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_permanent_failures_get_one_shot() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = RetryPolicy::insert_default()
            .run(&CancellationToken::new(), "insert", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(FlowError::Permanent("403".into()).into()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_attempt_cap_is_respected() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = RetryPolicy::fetch_default()
            .run(&CancellationToken::new(), "fetch", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(FlowError::Transient("still 503".into()).into()) }
            })
            .await;
        let err = result.unwrap_err();
        assert!(crate::error::is_transient(&err), "classification survives the give-up context");
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_insert_budget_runs_out_before_the_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();
        let result: Result<()> = RetryPolicy::insert_default()
            .run(&CancellationToken::new(), "insert", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(FlowError::Transient("503".into()).into()) }
            })
            .await;
        assert!(result.is_err());
        assert!(calls.load(Ordering::SeqCst) < 50);
        assert!(started.elapsed() <= Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_cancellation_cuts_the_nap_short() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = RetryPolicy::fetch_default()
            .run(&cancel, "fetch", |_| async { Err(FlowError::Transient("503".into()).into()) })
            .await;
        let err = result.unwrap_err();
        assert!(crate::error::is_deadline(&err));
    }
}
