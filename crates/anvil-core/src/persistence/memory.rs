use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::models::{CoreError, CoreErrorKind, InstallTarget, InstalledTool};
use crate::persistence::{ManifestStore, PersistenceResult};

#[derive(Default)]
pub struct InMemoryManifestStore {
    tools: Mutex<BTreeMap<(String, String), InstalledTool>>,
}

impl InMemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_tools(
        &self,
    ) -> PersistenceResult<std::sync::MutexGuard<'_, BTreeMap<(String, String), InstalledTool>>>
    {
        self.tools.lock().map_err(|_| {
            CoreError::new(
                CoreErrorKind::StorageFailure,
                "in-memory manifest mutex poisoned",
            )
        })
    }
}

impl ManifestStore for InMemoryManifestStore {
    fn is_installed(&self, target: &InstallTarget) -> PersistenceResult<bool> {
        let tools = self.lock_tools()?;
        Ok(tools.contains_key(&(target.tool.clone(), target.build_type.clone())))
    }

    fn record_installed(&self, tool: &InstalledTool) -> PersistenceResult<()> {
        let mut tools = self.lock_tools()?;
        tools.insert((tool.name.clone(), tool.build_type.clone()), tool.clone());
        Ok(())
    }

    fn remove(&self, name: &str, build_type: &str) -> PersistenceResult<bool> {
        let mut tools = self.lock_tools()?;
        Ok(tools
            .remove(&(name.to_string(), build_type.to_string()))
            .is_some())
    }

    fn list(&self) -> PersistenceResult<Vec<InstalledTool>> {
        let tools = self.lock_tools()?;
        Ok(tools.values().cloned().collect())
    }
}
