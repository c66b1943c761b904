//! Composable failure handling: exponential backoff and a circuit breaker.
//!
//! Neither is applied implicitly; wrap the calls that should have them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;

use crate::{BlobError, BlobResult};

type RetryObserver = Arc<dyn Fn(u32, &BlobError) + Send + Sync>;

/// Backoff schedule for [`RetryPolicy::retry`].
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Extra random delay, as a fraction of the computed delay.
    pub jitter: f64,
    on_retry: Option<RetryObserver>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: 0.1,
            on_retry: None,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }

    /// Called with the 1-based retry number before each retry.
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(u32, &BlobError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Delay before retry number `attempt + 1`, without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay + delay.mul_f64(extra)
    }

    /// Run `op` until it succeeds, fails with a non-retriable error, or the
    /// retries are used up. The last error is returned.
    pub async fn retry<T, F, Fut>(&self, mut op: F) -> BlobResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BlobResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_retries || !e.is_retriable() => return Err(e),
                Err(e) => {
                    let delay = self.jittered(self.delay_for(attempt));
                    attempt += 1;
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    if let Some(observer) = &self.on_retry {
                        observer(attempt, &e);
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Frees the half-open trial slot however the trial call ends, including
/// when its future is dropped.
struct TrialSlot<'a>(&'a Mutex<Breaker>);

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        self.0.lock().trial_in_flight = false;
    }
}

/// Stops calling a failing dependency for a cool-down period.
///
/// Closed → Open after `failure_threshold` consecutive failures; Open →
/// HalfOpen once `reset_timeout` has passed; one trial call then closes or
/// reopens it, and other callers get `CircuitOpen` while it runs.
/// Cancellations are not counted as failures.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Breaker>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(Breaker {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub async fn call<T, Fut>(&self, fut: Fut) -> BlobResult<T>
    where
        Fut: Future<Output = BlobResult<T>>,
    {
        let trial = self.admit()?;
        let _slot = trial.then(|| TrialSlot(&self.inner));
        let result = fut.await;
        match &result {
            Ok(_) => self.on_success(),
            Err(e) if e.is_cancelled() => {}
            Err(_) => self.on_failure(),
        }
        result
    }

    /// Whether the call may go ahead, and if so whether it is the single
    /// half-open trial.
    fn admit(&self) -> BlobResult<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => return Ok(false),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if !cooled {
                    return Err(BlobError::CircuitOpen);
                }
                inner.state = CircuitState::HalfOpen;
                tracing::debug!("circuit half-open");
            }
            CircuitState::HalfOpen if inner.trial_in_flight => return Err(BlobError::CircuitOpen),
            CircuitState::HalfOpen => {}
        }
        inner.trial_in_flight = true;
        Ok(true)
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.failures = 0;
        inner.opened_at = None;
        inner.state = CircuitState::Closed;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures += 1;
        if inner.state == CircuitState::HalfOpen || inner.failures >= self.failure_threshold {
            if inner.state != CircuitState::Open {
                tracing::warn!(failures = inner.failures, "circuit opened");
            }
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let observed = Arc::new(AtomicU32::new(0));
        let seen = observed.clone();
        let policy = RetryPolicy::default().on_retry(move |attempt, _| seen.store(attempt, Ordering::SeqCst));

        let value = policy
            .retry(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BlobError::upstream(503, "busy"))
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(observed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: BlobResult<()> = RetryPolicy::default()
            .retry(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BlobError::network("down"))
            })
            .await;
        assert!(matches!(result, Err(BlobError::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn never_retries_non_retriable() {
        let calls = AtomicU32::new(0);
        let result: BlobResult<()> = RetryPolicy::default()
            .retry(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BlobError::cancelled("Upload"))
            })
            .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_and_recovers() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        for _ in 0..2 {
            let _ = breaker.call(async { Err::<(), _>(BlobError::network("down")) }).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = breaker.call(async { Ok(()) }).await;
        assert!(matches!(rejected, Err(BlobError::CircuitOpen)));

        tokio::time::advance(Duration::from_secs(61)).await;
        let _ = breaker.call(async { Err::<(), _>(BlobError::network("still down")) }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;
        breaker.call(async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_trial() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let _ = breaker.call(async { Err::<(), _>(BlobError::network("down")) }).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let trial = breaker.call(async {
            let _ = wait.await;
            Ok::<_, BlobError>(())
        });
        tokio::pin!(trial);
        assert!(futures::poll!(&mut trial).is_pending());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let second = breaker.call(async { Ok(()) }).await;
        assert!(matches!(second, Err(BlobError::CircuitOpen)));

        release.send(()).unwrap();
        trial.await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trial_frees_the_slot() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let _ = breaker.call(async { Err::<(), _>(BlobError::network("down")) }).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        {
            let trial = breaker.call(futures::future::pending::<BlobResult<()>>());
            tokio::pin!(trial);
            assert!(futures::poll!(&mut trial).is_pending());
        }

        breaker.call(async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
