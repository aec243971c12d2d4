pub mod cancellation;
mod execution;
pub mod registry;

pub use cancellation::CancellationToken;
pub use registry::{TaskRegistry, TaskRegistryBuilder};

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, DEFAULT_OUTPUT_TAIL_LINES};

pub type OrchestrationResult<T> = Result<T, CoreError>;

pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// What `start` does when every running slot is taken.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionPolicy {
    /// Queue the task; it is promoted to running as soon as a slot frees up.
    Automatic,
    /// Reject the start with `AtCapacity`; the caller retries later.
    Manual,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegistryConfig {
    pub max_concurrent: usize,
    pub promotion: PromotionPolicy,
    pub output_tail_lines: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            promotion: PromotionPolicy::Automatic,
            output_tail_lines: DEFAULT_OUTPUT_TAIL_LINES,
        }
    }
}
