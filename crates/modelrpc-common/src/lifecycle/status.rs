use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::protocol::RpcError;

/// Operational state of a lifecycle-managed component.
///
/// ```text
/// Stopped ──start──▶ Starting ──ok──▶ Running ──stop──▶ Stopping ──▶ Stopped
///                        │                │
///                        └──err──▶ Failed ◀┘ (reconnect exhausted)
/// ```
///
/// `Failed` is absorbing: a failed component has to be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl Status {
    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Stopped, Status::Starting)
                | (Status::Starting, Status::Running)
                | (Status::Starting, Status::Failed)
                | (Status::Running, Status::Stopping)
                | (Status::Running, Status::Failed)
                | (Status::Stopping, Status::Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Status::Failed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Stopped => "Stopped",
            Status::Starting => "Starting",
            Status::Running => "Running",
            Status::Stopping => "Stopping",
            Status::Failed => "Failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status transition, delivered to every observer.
#[derive(Debug, Clone)]
pub struct StatusChangeEvent {
    /// Status before the change
    pub old_status: Status,
    /// Status after the change
    pub new_status: Status,
    /// When the change was recorded
    pub timestamp: DateTime<Utc>,
    /// Error that caused the change, if any
    pub error: Option<Arc<RpcError>>,
}

impl StatusChangeEvent {
    pub fn new(old_status: Status, new_status: Status, error: Option<Arc<RpcError>>) -> Self {
        Self {
            old_status,
            new_status,
            timestamp: Utc::now(),
            error,
        }
    }
}
