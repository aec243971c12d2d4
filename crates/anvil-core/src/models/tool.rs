use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::models::InstallTarget;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InstalledTool {
    pub name: String,
    pub build_type: String,
    pub version: Option<String>,
    pub installed_at: SystemTime,
}

impl InstalledTool {
    pub fn from_target(target: &InstallTarget, version: Option<String>) -> Self {
        Self {
            name: target.tool.clone(),
            build_type: target.build_type.clone(),
            version,
            installed_at: SystemTime::now(),
        }
    }

    pub fn matches(&self, target: &InstallTarget) -> bool {
        self.name == target.tool && self.build_type == target.build_type
    }
}
