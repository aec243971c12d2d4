use crate::models::TaskId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    UnknownTask,
    AlreadyStarted,
    InvalidTransition,
    AtCapacity,
    AlreadyInstalled,
    InstallerFailure,
    CollaboratorUnavailable,
    Cancelled,
    InvalidInput,
    StorageFailure,
    Timeout,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub kind: CoreErrorKind,
    pub task: Option<TaskId>,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            task: None,
            message: message.into(),
        }
    }

    pub fn for_task(kind: CoreErrorKind, task: &TaskId, message: impl Into<String>) -> Self {
        Self {
            kind,
            task: Some(task.clone()),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreError, CoreErrorKind};
    use crate::models::TaskId;

    #[test]
    fn display_includes_kind_and_message() {
        let error = CoreError::new(CoreErrorKind::UnknownTask, "unknown task id 'task-1'");
        assert_eq!(error.to_string(), "UnknownTask: unknown task id 'task-1'");
    }

    #[test]
    fn task_errors_carry_their_task() {
        let task = TaskId::from("task-1");
        let error = CoreError::for_task(CoreErrorKind::AtCapacity, &task, "full");
        assert_eq!(error.task, Some(task));
    }
}
