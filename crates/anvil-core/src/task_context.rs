use std::cell::RefCell;

use crate::models::TaskId;

thread_local! {
    static CURRENT_TASK_ID: RefCell<Option<TaskId>> = const { RefCell::new(None) };
}

/// Task whose installer stage is running on this thread, if any.
pub fn current_task_id() -> Option<TaskId> {
    CURRENT_TASK_ID.with(|slot| slot.borrow().clone())
}

pub fn with_task_id<R>(task_id: &TaskId, operation: impl FnOnce() -> R) -> R {
    let previous = CURRENT_TASK_ID.with(|slot| slot.replace(Some(task_id.clone())));
    let result = operation();
    CURRENT_TASK_ID.with(|slot| {
        slot.replace(previous);
    });
    result
}
