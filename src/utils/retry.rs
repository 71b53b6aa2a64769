// erpload/src/utils/retry.rs
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::AppError;

/// Result of a single check.
pub enum Poll<T> {
    Ready(T),
    /// Not done yet; the message says what is still in progress.
    Pending(String),
    Failed(AppError),
}

/// Final outcome of a bounded wait.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Done(T),
    Failed(AppError),
    TimedOut {
        attempts: u32,
        elapsed: Duration,
        last_status: String,
    },
}

/// Repeats a check until it is ready, fails, or the attempt count or the total
/// time budget runs out.
#[derive(Debug, Clone)]
pub struct BoundedRetry {
    pub max_attempts: u32,
    pub budget: Duration,
    pub interval: Duration,
}

impl BoundedRetry {
    pub fn new(max_attempts: u32, budget: Duration, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            budget,
            interval,
        }
    }

    pub async fn run<T, F, Fut>(&self, mut check: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Poll<T>>,
    {
        let started = Instant::now();
        let mut last_status = String::from("not started");
        for attempt in 1..=self.max_attempts {
            match check(attempt).await {
                Poll::Ready(value) => return RetryOutcome::Done(value),
                Poll::Failed(err) => return RetryOutcome::Failed(err),
                Poll::Pending(status) => {
                    tracing::debug!("attempt {}/{} pending: {}", attempt, self.max_attempts, status);
                    last_status = status;
                }
            }
            if attempt == self.max_attempts || started.elapsed() + self.interval > self.budget {
                return RetryOutcome::TimedOut {
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    last_status,
                };
            }
            tokio::time::sleep(self.interval).await;
        }
        RetryOutcome::TimedOut {
            attempts: self.max_attempts,
            elapsed: started.elapsed(),
            last_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(max_attempts: u32) -> BoundedRetry {
        BoundedRetry::new(max_attempts, Duration::from_secs(5), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn returns_value_once_ready() {
        let outcome = quick(5)
            .run(|attempt| async move {
                if attempt < 3 {
                    Poll::Pending(format!("still starting ({})", attempt))
                } else {
                    Poll::Ready(attempt)
                }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Done(3)));
    }

    #[tokio::test]
    async fn failure_stops_immediately() {
        let mut calls = 0;
        let outcome: RetryOutcome<()> = quick(5)
            .run(|_| {
                calls += 1;
                async { Poll::Failed(AppError::Linking("login refused".into())) }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Failed(AppError::Linking(_))));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let outcome: RetryOutcome<()> = quick(4)
            .run(|_| async { Poll::Pending("module update running".into()) })
            .await;
        match outcome {
            RetryOutcome::TimedOut {
                attempts,
                last_status,
                ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_status, "module update running");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn gives_up_when_budget_is_spent() {
        let retry = BoundedRetry::new(1000, Duration::from_millis(20), Duration::from_millis(15));
        let outcome: RetryOutcome<()> = retry.run(|_| async { Poll::Pending("waiting".into()) }).await;
        match outcome {
            RetryOutcome::TimedOut { attempts, .. } => assert!(attempts < 1000),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
