//! Per-task workflow states.
//!
//! ```text
//! FETCHING ─▶ DERIVING ─▶ STORING ─▶ LINKING ─▶ DONE
//!    │  └──────────────────────────────────────▲  (already linked)
//!    └─────────┴──────────┴──────────┴──▶ FAILED
//! ```

use serde::Serialize;
use std::fmt;

/// A state in a task's workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Fetching,
    Deriving,
    Storing,
    Linking,
    Done,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Fetching => "fetching",
            TaskState::Deriving => "deriving",
            TaskState::Storing => "storing",
            TaskState::Linking => "linking",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }

    /// Whether the workflow may move from `self` to `to`.
    pub fn can_transition_to(self, to: TaskState) -> bool {
        use TaskState::*;
        match (self, to) {
            (Fetching, Deriving) | (Deriving, Storing) | (Storing, Linking) | (Linking, Done) => {
                true
            }
            // Idempotency short-circuit: the photo was already linked.
            (Fetching, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one task attempt's position in the workflow.
///
/// Every attempt starts in `Fetching`; there is no resume from a later state.
#[derive(Debug)]
pub struct TaskMachine {
    state: TaskState,
    failed_in: Option<TaskState>,
}

impl Default for TaskMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskMachine {
    pub fn new() -> Self {
        Self {
            state: TaskState::Fetching,
            failed_in: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// The state the task was in when it failed.
    pub fn failed_in(&self) -> Option<TaskState> {
        self.failed_in
    }

    /// Move to `to`. Illegal transitions are ignored and logged.
    pub fn advance(&mut self, to: TaskState) -> TaskState {
        if self.state.can_transition_to(to) {
            tracing::trace!(from = %self.state, to = %to, "Task transition");
            if to == TaskState::Failed {
                self.failed_in = Some(self.state);
            }
            self.state = to;
        } else {
            debug_assert!(false, "illegal transition {} -> {}", self.state, to);
            tracing::error!(from = %self.state, to = %to, "Illegal task transition ignored");
        }
        self.state
    }

    /// Mark the task failed, remembering the state it failed in.
    pub fn fail(&mut self) -> TaskState {
        self.advance(TaskState::Failed)
    }
}
