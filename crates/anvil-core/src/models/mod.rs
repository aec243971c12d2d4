pub mod check;
pub mod error;
pub mod progress;
pub mod task;
pub mod tool;

pub use check::{CheckStatus, CheckUpdate};
pub use error::{CoreError, CoreErrorKind};
pub use progress::ProgressEvent;
pub use task::{
    DEFAULT_OUTPUT_TAIL_LINES, InstallTarget, OutputTail, TaskId, TaskRecord, TaskStatus,
};
pub use tool::InstalledTool;
