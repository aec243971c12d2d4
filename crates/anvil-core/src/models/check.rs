use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Checking,
    Ok,
    Warning,
    Error,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CheckUpdate {
    pub check_index: usize,
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub details: Vec<String>,
    pub suggestions: Vec<String>,
}

impl CheckUpdate {
    /// Placeholder shown while a probe has not reported yet.
    pub fn checking(check_index: usize, name: impl Into<String>) -> Self {
        Self {
            check_index,
            name: name.into(),
            status: CheckStatus::Checking,
            message: "checking...".to_string(),
            details: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}
