//! Component Lifecycle
//!
//! Shared start/stop state machine for clients and servers.
//!
//! A [`Lifecycle`] owns the current [`Status`] and the component's
//! [`StatusNotifier`]. Every transition is a check-and-set under one write
//! lock, and the event is queued to observers before the lock is released,
//! so observers see transitions in the order they happened.
//!
//! A [`RunScope`] is created on every successful start: one cancellation
//! token plus a task tracker that owns every background task of that run.

mod notifier;
mod status;

pub use notifier::{StatusCallback, StatusNotifier};
pub use status::{Status, StatusChangeEvent};

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::protocol::{Result, RpcError};

/// Anything with a start/stop lifecycle and observable status.
#[async_trait]
pub trait Component: Send + Sync {
    /// Brings the component up. Only valid from [`Status::Stopped`].
    async fn start(&self) -> Result<()>;

    /// Tears the component down. Only valid from [`Status::Running`].
    async fn stop(&self) -> Result<()>;

    fn status(&self) -> Status;

    /// Registers an observer callback with its own delivery worker.
    fn on_status_change(&self, callback: StatusCallback);

    /// Registers an observer queue.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<StatusChangeEvent>;
}

/// Status cell plus observers for one component.
pub struct Lifecycle {
    role: &'static str,
    status: RwLock<Status>,
    notifier: StatusNotifier,
}

impl Lifecycle {
    /// Creates a lifecycle in [`Status::Stopped`]. `role` names the
    /// component in state errors ("client", "server").
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            status: RwLock::new(Status::Stopped),
            notifier: StatusNotifier::new(),
        }
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn status(&self) -> Status {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Stopped → Starting`, or a state error naming the current status.
    pub fn begin_start(&self) -> Result<()> {
        self.guarded(Status::Stopped, Status::Starting, "start")
    }

    /// `Running → Stopping`, or a state error naming the current status.
    pub fn begin_stop(&self) -> Result<()> {
        self.guarded(Status::Running, Status::Stopping, "stop")
    }

    /// Moves to `to` from whatever the current status is.
    ///
    /// Edges outside the state machine are refused and logged.
    pub fn transition(&self, to: Status, error: Option<Arc<RpcError>>) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        let from = *status;
        if !from.can_transition_to(to) {
            tracing::warn!(role = self.role, %from, %to, "refusing invalid status transition");
            return;
        }
        self.apply(&mut status, to, error);
    }

    /// Moves to `to` only if the current status is still `from`.
    ///
    /// Returns whether the transition happened.
    pub fn transition_from(&self, from: Status, to: Status, error: Option<Arc<RpcError>>) -> bool {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        if *status != from || !from.can_transition_to(to) {
            return false;
        }
        self.apply(&mut status, to, error);
        true
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StatusChangeEvent> {
        self.notifier.subscribe()
    }

    pub fn on_status_change<F>(&self, callback: F)
    where
        F: Fn(StatusChangeEvent) + Send + Sync + 'static,
    {
        self.notifier.on_status_change(callback);
    }

    fn guarded(&self, from: Status, to: Status, operation: &'static str) -> Result<()> {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        if *status != from {
            return Err(RpcError::state(self.role, operation, *status));
        }
        self.apply(&mut status, to, None);
        Ok(())
    }

    fn apply(&self, status: &mut Status, to: Status, error: Option<Arc<RpcError>>) {
        let from = *status;
        *status = to;
        tracing::debug!(role = self.role, %from, %to, "status changed");
        self.notifier.notify(&StatusChangeEvent::new(from, to, error));
    }
}

/// Cancellation scope and task set for one run of a component.
#[derive(Clone, Default)]
pub struct RunScope {
    token: CancellationToken,
    tasks: TaskTracker,
}

impl RunScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tasks
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawns a task owned by this run.
    pub fn spawn<F>(&self, task: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(task)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancels the run and waits until every owned task has exited.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}
