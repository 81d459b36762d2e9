//! Retry Policy
//!
//! Every remote call made during a scan goes through [`Retrier::call`]:
//! throttled calls are retried with capped exponential backoff plus jitter,
//! anything else is returned to the caller on the first failure.

use super::errors::ErrorClassifier;
use crate::aws::ApiFault;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Backoff parameters. Attempt `n` (0-based) waits
/// `min(initial_backoff * 2^n + U(0,1)s, max_backoff)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound on a single attempt; `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            call_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt`, given a jitter sample in `[0, 1)`.
    pub fn backoff(&self, attempt: u32, jitter: f64) -> Duration {
        let exp = self.initial_backoff.as_secs_f64() * 2f64.powi(attempt as i32);
        let secs = (exp + jitter).min(self.max_backoff.as_secs_f64());
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(self.max_backoff)
    }
}

/// Where backoff delays are spent. Tests swap in a recorder.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Retry combinator shared by every collector.
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    classifier: Arc<ErrorClassifier>,
    sleeper: Arc<dyn Sleeper>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy, classifier: Arc<ErrorClassifier>) -> Self {
        Self::with_sleeper(policy, classifier, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        policy: RetryPolicy,
        classifier: Arc<ErrorClassifier>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            policy,
            classifier,
            sleeper,
        }
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op`, retrying only throttled failures. Once `max_retries`
    /// retries are spent the last fault is returned.
    pub async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ApiFault>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ApiFault>> + Send,
    {
        let mut retries = 0u32;
        loop {
            let outcome = match self.policy.call_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(ApiFault::Timeout),
                },
                None => op().await,
            };

            let fault = match outcome {
                Ok(value) => return Ok(value),
                Err(fault) => fault,
            };

            if !self.classifier.classify(&fault).is_retryable() || retries >= self.policy.max_retries {
                return Err(fault);
            }

            let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
            let delay = self.policy.backoff(retries, jitter);
            retries += 1;
            tracing::warn!(
                "{} throttled, retrying in {:.2}s (attempt {}/{})",
                label,
                delay.as_secs_f64(),
                retries,
                self.policy.max_retries
            );
            self.sleeper.sleep(delay).await;
        }
    }
}
