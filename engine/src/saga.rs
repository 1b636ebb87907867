//! Step-by-step driving of multi-row write sequences.
//!
//! The store has no multi-row transactions, so every coordinator operation is
//! a sequence of single-row steps. Each step is driven to completion with
//! bounded retries and reports an explicit [`StepResult`]; the caller decides
//! what compensation, if any, applies to the prefix that already ran.

use crate::error::{StoreError, StoreResult};
use crate::{Error, Projection, ReservationId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// A single store interaction inside a coordinator operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "projection")]
pub enum Step {
    ClaimLock,
    CheckBook,
    Write(Projection),
    Update(Projection),
    Delete(Projection),
    ReleaseLock,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::ClaimLock => f.write_str("claim lock"),
            Step::CheckBook => f.write_str("check book"),
            Step::Write(p) => write!(f, "write {p}"),
            Step::Update(p) => write!(f, "update {p}"),
            Step::Delete(p) => write!(f, "delete {p}"),
            Step::ReleaseLock => f.write_str("release lock"),
        }
    }
}

/// Outcome of driving one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult<T> {
    /// The store acknowledged the step.
    Done { value: T, attempts: u32 },
    /// The retry budget ran out, or the store returned a permanent error.
    Exhausted {
        step: Step,
        attempts: u32,
        error: StoreError,
    },
}

impl<T> StepResult<T> {
    /// Whether the value came back on the first try. A `false` delete result
    /// is only conclusive when no earlier attempt could have applied it.
    pub fn first_attempt(&self) -> bool {
        matches!(self, StepResult::Done { attempts: 1, .. })
    }

    /// Convert into a coordinator result. An exhausted step means the
    /// reservation's projections are left diverged.
    pub fn or_partial(self, reservation_id: ReservationId) -> Result<T, Error> {
        match self {
            StepResult::Done { value, .. } => Ok(value),
            StepResult::Exhausted { step, error, .. } => Err(Error::PartialCommit {
                reservation_id,
                step,
                source: error,
            }),
        }
    }

    /// Convert into a coordinator result for steps that leave nothing
    /// half-written, such as reads.
    pub fn or_store(self) -> Result<T, Error> {
        match self {
            StepResult::Done { value, .. } => Ok(value),
            StepResult::Exhausted { error, .. } => Err(Error::Store(error)),
        }
    }
}

/// Retry budget for a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before the given retry (1-based), doubling up to the cap.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Drive `op` until it succeeds, fails permanently, or the budget is spent.
    pub async fn drive<T, F, Fut>(&self, step: Step, mut op: F) -> StepResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return StepResult::Done { value, attempts },
                Err(error) if error.is_transient() && attempts < max_attempts => {
                    let delay = self.backoff(attempts);
                    tracing::warn!(%step, attempts, ?delay, %error, "retrying step");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return StepResult::Exhausted {
                        step,
                        attempts,
                        error,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = &AtomicU32::new(0);
        let result = fast()
            .drive(Step::Write(Projection::Primary), || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Unavailable("timeout".into()))
                } else {
                    Ok("written")
                }
            })
            .await;

        assert_eq!(
            result,
            StepResult::Done {
                value: "written",
                attempts: 3
            }
        );
        assert!(!result.first_attempt());
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let calls = &AtomicU32::new(0);
        let result: StepResult<()> = fast()
            .drive(Step::ReleaseLock, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Backend("constraint".into()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            StepResult::Exhausted {
                step: Step::ReleaseLock,
                attempts: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn budget_is_bounded() {
        let calls = &AtomicU32::new(0);
        let result: StepResult<()> = fast()
            .drive(Step::Delete(Projection::ByUser), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Unavailable("down".into()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let id = ReservationId::nil();
        assert!(matches!(
            result.or_partial(id),
            Err(Error::PartialCommit {
                step: Step::Delete(Projection::ByUser),
                ..
            })
        ));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(4), Duration::from_millis(50));
        assert_eq!(policy.backoff(40), Duration::from_millis(50));
    }

    #[test]
    fn step_display() {
        assert_eq!(Step::Write(Projection::ByUser).to_string(), "write by-user");
        assert_eq!(Step::ClaimLock.to_string(), "claim lock");
    }
}
