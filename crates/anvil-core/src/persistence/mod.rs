pub mod memory;

pub use memory::InMemoryManifestStore;

use crate::models::{CoreError, InstallTarget, InstalledTool};

pub type PersistenceResult<T> = Result<T, CoreError>;

/// Durable record of which tools are already installed.
pub trait ManifestStore: Send + Sync {
    fn is_installed(&self, target: &InstallTarget) -> PersistenceResult<bool>;

    fn record_installed(&self, tool: &InstalledTool) -> PersistenceResult<()>;

    fn remove(&self, name: &str, build_type: &str) -> PersistenceResult<bool>;

    fn list(&self) -> PersistenceResult<Vec<InstalledTool>>;
}
