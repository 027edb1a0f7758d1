//! Per-call cancellation and deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Result, RpcError};

/// Cancellation handle and optional deadline carried by one call.
///
/// Cloning shares the same token; [`CallContext::child`] derives a context
/// that is cancelled with its parent but can also be cancelled alone.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never done unless cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Wraps an existing token, e.g. the scope token of a running component.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derives a context cancelled together with `self`, keeping its deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derives a child whose deadline is the earlier of the parent's and
    /// `now + timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Why the context is done, or `None` while it is still live.
    ///
    /// Explicit cancellation wins over an expired deadline.
    pub fn err(&self) -> Option<RpcError> {
        if self.token.is_cancelled() {
            return Some(RpcError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(RpcError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> RpcError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => RpcError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => RpcError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                RpcError::Cancelled
            }
        }
    }

    /// Drives `future` until it completes or the context is done.
    pub async fn run<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            output = future => Ok(output),
            err = self.done() => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_context_is_live() {
        let ctx = CallContext::new();
        assert!(!ctx.is_done());
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
    }

    #[tokio::test]
    async fn test_cancel_is_reported() {
        let ctx = CallContext::new();
        ctx.cancel();
        assert!(matches!(ctx.err(), Some(RpcError::Cancelled)));
        assert!(matches!(ctx.done().await, RpcError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = CallContext::with_timeout(Duration::from_millis(50));
        assert!(!ctx.is_done());
        assert!(matches!(ctx.done().await, RpcError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(RpcError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_child() {
        let parent = CallContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_done());
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_live() {
        let parent = CallContext::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_earlier_deadline() {
        let parent = CallContext::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_races_future_against_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_millis(20));
        let slow = tokio::time::sleep(Duration::from_secs(5));
        assert!(matches!(ctx.run(slow).await, Err(RpcError::DeadlineExceeded)));

        let ctx = CallContext::with_timeout(Duration::from_secs(5));
        assert_eq!(ctx.run(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_run_refuses_done_context() {
        let ctx = CallContext::new();
        ctx.cancel();
        let out = ctx.run(async { 1 }).await;
        assert!(matches!(out, Err(RpcError::Cancelled)));
    }
}
