use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::installer::{
    InstallStage, Installer, InstallerResult, installer_failure, record_in_manifest,
};
use crate::models::InstallTarget;
use crate::persistence::ManifestStore;

pub const SIMULATED_STAGES: [&str; 5] = ["prepare", "download", "configure", "build", "install"];

/// Stand-in install engine that sleeps through canned stages.
#[derive(Clone, Default)]
pub struct SimulatedInstaller {
    stage_delay: Duration,
    failures: HashMap<String, String>,
    manifest: Option<Arc<dyn ManifestStore>>,
}

impl SimulatedInstaller {
    pub fn new(stage_delay: Duration) -> Self {
        Self {
            stage_delay,
            ..Self::default()
        }
    }

    /// Make installs of `tool` fail when they reach `stage`.
    pub fn failing_at(mut self, tool: impl Into<String>, stage: impl Into<String>) -> Self {
        self.failures.insert(tool.into(), stage.into());
        self
    }

    pub fn with_manifest(mut self, manifest: Arc<dyn ManifestStore>) -> Self {
        self.manifest = Some(manifest);
        self
    }
}

impl Installer for SimulatedInstaller {
    fn plan(&self, _target: &InstallTarget) -> InstallerResult<Vec<InstallStage>> {
        Ok(SIMULATED_STAGES
            .iter()
            .enumerate()
            .map(|(index, name)| InstallStage::new(index, *name))
            .collect())
    }

    fn run_stage(
        &self,
        target: &InstallTarget,
        stage: &InstallStage,
        output: &mut dyn FnMut(String),
    ) -> InstallerResult<()> {
        output(format!("[{}] {} ({})", stage.name, target.tool, target.build_type));
        if !self.stage_delay.is_zero() {
            std::thread::sleep(self.stage_delay);
        }

        if self
            .failures
            .get(&target.tool)
            .is_some_and(|failing_stage| failing_stage == &stage.name)
        {
            output(format!("[{}] error: simulated failure", stage.name));
            return Err(installer_failure(
                target,
                format!("simulated failure during '{}'", stage.name),
            ));
        }

        output(format!("[{}] done", stage.name));
        if stage.index + 1 == SIMULATED_STAGES.len() {
            record_in_manifest(self.manifest.as_ref(), target, None);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CoreErrorKind;

    #[test]
    fn configured_failure_fails_only_at_its_stage() {
        let installer = SimulatedInstaller::new(Duration::ZERO).failing_at("fd", "build");
        let target = InstallTarget::new("fd", "release");
        let plan = installer.plan(&target).unwrap();

        for stage in &plan[..3] {
            installer.run_stage(&target, stage, &mut |_| {}).unwrap();
        }
        let error = installer
            .run_stage(&target, &plan[3], &mut |_| {})
            .unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::InstallerFailure);
        assert!(error.message.contains("build"));
    }

    #[test]
    fn each_stage_emits_output() {
        let installer = SimulatedInstaller::new(Duration::ZERO);
        let target = InstallTarget::new("bat", "debug");
        let mut lines = Vec::new();
        installer
            .run_stage(&target, &InstallStage::new(0, "prepare"), &mut |line| {
                lines.push(line)
            })
            .unwrap();

        assert_eq!(lines, vec!["[prepare] bat (debug)", "[prepare] done"]);
    }
}
