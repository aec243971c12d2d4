pub mod process;
pub mod simulated;

pub use process::{InstallRecipe, ProcessInstaller, RecipeStage};
pub use simulated::{SIMULATED_STAGES, SimulatedInstaller};

use std::sync::Arc;

use crate::models::{CoreError, CoreErrorKind, InstallTarget, InstalledTool};
use crate::persistence::ManifestStore;

pub type InstallerResult<T> = Result<T, CoreError>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstallStage {
    pub index: usize,
    pub name: String,
}

impl InstallStage {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

/// Performs the actual work of installing a tool, one stage at a time.
///
/// Both methods are blocking and are invoked from the blocking thread pool.
/// Stages are run strictly in plan order; the caller may stop between stages.
pub trait Installer: Send + Sync {
    fn plan(&self, target: &InstallTarget) -> InstallerResult<Vec<InstallStage>>;

    fn run_stage(
        &self,
        target: &InstallTarget,
        stage: &InstallStage,
        output: &mut dyn FnMut(String),
    ) -> InstallerResult<()>;
}

pub(crate) fn installer_failure(target: &InstallTarget, message: impl Into<String>) -> CoreError {
    CoreError::new(
        CoreErrorKind::InstallerFailure,
        format!("{target}: {}", message.into()),
    )
}

/// Record a finished install. A manifest failure does not fail the install.
pub(crate) fn record_in_manifest(
    manifest: Option<&Arc<dyn ManifestStore>>,
    target: &InstallTarget,
    version: Option<String>,
) {
    let Some(manifest) = manifest else {
        return;
    };

    if let Err(error) = manifest.record_installed(&InstalledTool::from_target(target, version)) {
        tracing::warn!(
            task_id = ?crate::task_context::current_task_id(),
            tool = %target.tool,
            build_type = %target.build_type,
            kind = ?error.kind,
            message = %error.message,
            "failed to record installed tool in manifest"
        );
    }
}
