//! Retry of the connect step.
//!
//! A [`RetryStrategy`] is shared and stateless; every call to
//! [`RetryHandler::run`] starts a fresh [`RetryAttempts`] from it, so
//! overlapping calls never share a counter. Only retryable errors
//! (see [`AssetError::is_retryable`]) are retried.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{AssetError, AssetResult};
use crate::events::Subject;

/// Attempt budget of one run.
pub trait RetryAttempts: Send {
    /// Delay before the next attempt, or `None` once exhausted.
    fn next_delay(&mut self) -> Option<Duration>;
}

/// Source of per-run attempt budgets.
pub trait RetryStrategy: fmt::Debug + Send + Sync {
    fn start(&self) -> Box<dyn RetryAttempts>;
}

/// Exponential backoff with full jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Backoff {
    /// Upper bound of the delay before retry number `retry` (1-based).
    fn ceiling(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    fn delay(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling(retry).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// Retry up to `max_retries` times.
#[derive(Debug, Clone)]
pub struct CountingRetryStrategy {
    max_retries: u32,
    backoff: Option<Backoff>,
}

impl CountingRetryStrategy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, initial: Duration, multiplier: f64, max: Duration) -> Self {
        self.backoff = Some(Backoff {
            initial,
            multiplier,
            max,
        });
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

struct CountingAttempts {
    max_retries: u32,
    retries: u32,
    backoff: Option<Backoff>,
}

impl RetryAttempts for CountingAttempts {
    fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            return None;
        }
        self.retries += 1;
        Some(
            self.backoff
                .map(|b| b.delay(self.retries))
                .unwrap_or(Duration::ZERO),
        )
    }
}

impl RetryStrategy for CountingRetryStrategy {
    fn start(&self) -> Box<dyn RetryAttempts> {
        Box::new(CountingAttempts {
            max_retries: self.max_retries,
            retries: 0,
            backoff: self.backoff,
        })
    }
}

/// Never retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetryStrategy;

impl RetryStrategy for NoRetryStrategy {
    fn start(&self) -> Box<dyn RetryAttempts> {
        Box::new(CountingAttempts {
            max_retries: 0,
            retries: 0,
            backoff: None,
        })
    }
}

/// How a retried run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Success,
    Failure,
}

impl fmt::Display for RetryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Failure => write!(f, "Failure"),
        }
    }
}

/// Runs an operation under a strategy and reports retries.
///
/// `on_retrying` receives the 1-based retry number before each retry.
/// `on_retried` receives the outcome once, at the end of a run that retried
/// at least once.
#[derive(Debug)]
pub struct RetryHandler {
    strategy: Arc<dyn RetryStrategy>,
    on_retrying: Subject<u32>,
    on_retried: Subject<RetryOutcome>,
}

impl RetryHandler {
    pub fn new(strategy: Arc<dyn RetryStrategy>) -> Self {
        Self {
            strategy,
            on_retrying: Subject::new(),
            on_retried: Subject::new(),
        }
    }

    pub fn on_retrying(&self) -> &Subject<u32> {
        &self.on_retrying
    }

    pub fn on_retried(&self) -> &Subject<RetryOutcome> {
        &self.on_retried
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> AssetResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AssetResult<T>>,
    {
        let mut attempts = self.strategy.start();
        let mut retries = 0u32;

        loop {
            let err: AssetError = match op().await {
                Ok(value) => {
                    self.finish(retries, RetryOutcome::Success);
                    return Ok(value);
                }
                Err(e) => e,
            };

            let delay = if err.is_retryable() {
                attempts.next_delay()
            } else {
                None
            };

            let Some(delay) = delay else {
                self.finish(retries, RetryOutcome::Failure);
                return Err(err);
            };

            retries += 1;
            warn!(
                error = %err,
                retry = retries,
                backoff_ms = delay.as_millis() as u64,
                "retrying connect"
            );
            self.on_retrying.publish(&retries);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    fn finish(&self, retries: u32, outcome: RetryOutcome) {
        if retries > 0 {
            debug!(retries, %outcome, "retry finished");
            self.on_retried.publish(&outcome);
        }
    }

    /// Detach every observer. Runs already in progress still complete.
    pub fn dispose(&self) {
        self.on_retrying.close();
        self.on_retried.close();
    }
}
