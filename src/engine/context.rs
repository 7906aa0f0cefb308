//! Run-scoped cancellation boundaries.
//!
//! A `RunContext` pairs a `CancellationToken` with an optional monotonic
//! deadline. Scopes form a tree: cancelling a parent cancels every
//! descendant, and a child deadline can only tighten what it inherits.
//! Dropping a context cancels its own scope, so a boundary is released on
//! every exit path without explicit cleanup.

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A cancellation/deadline boundary for one scope of a run.
#[derive(Debug)]
pub struct RunContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    /// Root context: cancelable by the caller, no deadline.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derive a plain cancelable child scope. The child inherits the
    /// ancestor deadline and is cancelled when this scope is.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child scope with a deadline of now + `timeout`, clamped so it
    /// never extends past an ancestor deadline.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(inherited) => inherited.min(candidate),
            None => candidate,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this scope and all scopes derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that can cancel this scope from elsewhere (e.g. a signal
    /// listener task).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail immediately if this scope is already cancelled or expired.
    ///
    /// `what` names the operation for the error message, e.g.
    /// `"dispatching to 'http'"`.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled(what.to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(what.to_string()));
            }
        }
        Ok(())
    }

    /// Drive `fut` to completion under this scope.
    ///
    /// Returns `Error::Canceled` if the scope is cancelled first and
    /// `Error::Timeout` if the deadline expires first; both belong to the
    /// cancellation class (`Error::is_cancellation`).
    pub async fn run<T>(&self, what: &str, fut: impl Future<Output = T>) -> Result<T> {
        self.check(what)?;
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    out = fut => Ok(out),
                    _ = self.cancel.cancelled() => Err(Error::Canceled(what.to_string())),
                    _ = time::sleep_until(deadline) => Err(Error::Timeout(what.to_string())),
                }
            }
            None => {
                tokio::select! {
                    out = fut => Ok(out),
                    _ = self.cancel.cancelled() => Err(Error::Canceled(what.to_string())),
                }
            }
        }
    }

    /// Sleep for `duration` under this scope.
    pub async fn sleep(&self, what: &str, duration: Duration) -> Result<()> {
        self.run(what, time::sleep(duration)).await
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        // Releasing a scope cancels anything still running under it.
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_without_deadline() {
        let ctx = RunContext::new();
        let out = ctx.run("adding", async { 1 + 2 }).await.unwrap();
        assert_eq!(out, 3);
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let root = RunContext::new();
        let child = root.child();
        root.cancel();

        let err = child
            .run("waiting", time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Canceled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_timeout() {
        let root = RunContext::new();
        let scoped = root.child_with_timeout(Duration::from_millis(50));

        let err = scoped
            .run("waiting", time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_child_timeout_cannot_extend_ancestor_deadline() {
        let root = RunContext::new();
        let outer = root.child_with_timeout(Duration::from_millis(10));
        let inner = outer.child_with_timeout(Duration::from_secs(3600));

        assert!(inner.deadline().unwrap() <= outer.deadline().unwrap());
    }

    #[tokio::test]
    async fn test_plain_child_inherits_deadline() {
        let root = RunContext::new();
        let outer = root.child_with_timeout(Duration::from_secs(1));
        let inner = outer.child();

        assert_eq!(inner.deadline(), outer.deadline());
    }

    #[tokio::test]
    async fn test_drop_releases_scope() {
        let root = RunContext::new();
        let handle = {
            let scoped = root.child();
            scoped.cancellation_token()
        };
        assert!(handle.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_check_reports_cancellation() {
        let ctx = RunContext::new();
        assert!(ctx.check("starting").is_ok());
        ctx.cancel();
        assert!(matches!(ctx.check("starting"), Err(Error::Canceled(_))));
    }
}
