use crate::models::{TaskId, TaskStatus};

/// Fire-once notification that a task's visible state changed.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: f64,
    pub stage: String,
    pub appended_output: Option<String>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
