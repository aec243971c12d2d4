pub mod probes;
pub mod runner;

pub use probes::{
    CommandProbe, CpuProbe, DiskProbe, MemoryProbe, NetworkProbe, OsProbe, default_probes,
    parse_meminfo_available,
};
pub use runner::{CheckChain, CheckMessage, SequentialCheckRunner};

use serde::{Deserialize, Serialize};

use crate::models::{CheckStatus, CheckUpdate, CoreError, CoreErrorKind};

pub type CheckResult<T> = Result<T, CoreError>;

/// How the runner chains one probe to the next.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSequencing {
    /// The next probe is dispatched only after the previous one has reported.
    Strict,
    /// The next probe is dispatched as soon as the previous one is dispatched.
    DispatchOrder,
}

/// One independent host check, run on the blocking pool.
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self) -> CheckResult<ProbeReport>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProbeReport {
    pub status: CheckStatus,
    pub message: String,
    pub details: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ProbeReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Ok, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Error, message)
    }

    fn with_status(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn into_update(self, check_index: usize, name: impl Into<String>) -> CheckUpdate {
        CheckUpdate {
            check_index,
            name: name.into(),
            status: self.status,
            message: self.message,
            details: self.details,
            suggestions: self.suggestions,
        }
    }
}

pub(crate) fn unavailable(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::CollaboratorUnavailable, message)
}
