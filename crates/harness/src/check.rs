//! Soft assertions
//!
//! A check is any function returning [`HarnessResult<()>`]. Running it through
//! [`run_check`] never propagates the failure: the raw error goes to the log and
//! the caller-supplied message becomes the surfaced diagnostic. A step collects
//! its results in a [`Checks`] list and decides on its own whether a failure
//! blocks what comes next.

use std::fmt::Debug;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};

/// Outcome of a single soft check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub passed: bool,

    /// Operator-facing diagnostic, set only when the check failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: Some(message.into()),
        }
    }
}

/// Run `check`, converting any error into a failing result carrying `failure_message`
pub fn run_check<F>(check: F, failure_message: impl Into<String>) -> CheckResult
where
    F: FnOnce() -> HarnessResult<()>,
{
    settle(check(), failure_message.into())
}

/// Async counterpart of [`run_check`]
pub async fn run_check_async<F, Fut>(check: F, failure_message: impl Into<String>) -> CheckResult
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = HarnessResult<()>>,
{
    settle(check().await, failure_message.into())
}

fn settle(outcome: HarnessResult<()>, failure_message: String) -> CheckResult {
    match outcome {
        Ok(()) => CheckResult::pass(),
        Err(e) => {
            warn!(error = %e, "check failed: {}", failure_message);
            CheckResult::fail(failure_message)
        }
    }
}

/// Fails with `detail` unless `condition` holds
pub fn ensure(condition: bool, detail: impl Into<String>) -> HarnessResult<()> {
    if condition {
        Ok(())
    } else {
        Err(HarnessError::AssertionFailed(detail.into()))
    }
}

/// Fails unless `left == right`, describing both sides
pub fn ensure_eq<T>(left: T, right: T, what: &str) -> HarnessResult<()>
where
    T: PartialEq + Debug,
{
    if left == right {
        Ok(())
    } else {
        Err(HarnessError::AssertionFailed(format!(
            "{}: expected {:?}, got {:?}",
            what, right, left
        )))
    }
}

/// Ordered results of the checks run during one step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checks {
    results: Vec<CheckResult>,
}

impl Checks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run<F>(&mut self, check: F, failure_message: impl Into<String>) -> &CheckResult
    where
        F: FnOnce() -> HarnessResult<()>,
    {
        self.record(run_check(check, failure_message))
    }

    pub async fn run_async<F, Fut>(
        &mut self,
        check: F,
        failure_message: impl Into<String>,
    ) -> &CheckResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HarnessResult<()>>,
    {
        let result = run_check_async(check, failure_message).await;
        self.record(result)
    }

    pub fn record(&mut self, result: CheckResult) -> &CheckResult {
        debug!(passed = result.passed, "check recorded");
        self.results.push(result);
        &self.results[self.results.len() - 1]
    }

    /// Appends every result of `other`, keeping order
    pub fn extend(&mut self, other: Checks) {
        self.results.extend(other.results);
    }

    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Messages of the failed checks, in the order they ran
    pub fn failures(&self) -> impl Iterator<Item = &str> {
        self.results.iter().filter_map(|r| r.message.as_deref())
    }

    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<CheckResult> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failing_check_returns_supplied_message() {
        let result = run_check(
            || Err(HarnessError::AssertionFailed("left != right".to_string())),
            "We found no matching blocks",
        );
        assert!(!result.passed);
        assert_eq!(result.message.as_deref(), Some("We found no matching blocks"));
    }

    #[test]
    fn test_passing_check_has_no_message() {
        let result = run_check(|| Ok(()), "unused");
        assert_eq!(result, CheckResult::pass());
    }

    #[test]
    fn test_non_assertion_errors_are_caught_too() {
        let result = run_check(
            || {
                let _: serde_json::Value = serde_json::from_str("{not json")?;
                Ok(())
            },
            "body was not JSON",
        );
        assert_eq!(result, CheckResult::fail("body was not JSON"));
    }

    #[tokio::test]
    async fn test_async_check() {
        let result = run_check_async(|| async { ensure(1 + 1 == 3, "math") }, "async failed").await;
        assert_eq!(result.message.as_deref(), Some("async failed"));
    }

    #[test]
    fn test_checks_do_not_short_circuit() {
        let mut checks = Checks::new();
        checks.run(|| ensure(false, "first"), "first failed");
        checks.run(|| Ok(()), "second failed");
        checks.run(|| ensure_eq(0, 1, "length"), "third failed");

        assert_eq!(checks.len(), 3);
        assert!(!checks.passed());
        assert_eq!(
            checks.failures().collect::<Vec<_>>(),
            vec!["first failed", "third failed"]
        );
    }

    #[test]
    fn test_ensure_eq_describes_both_sides() {
        let err = ensure_eq(2, 1, "result count").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Assertion failed: result count: expected 1, got 2"
        );
    }
}
