use anvil_core::models::CoreError;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("terminal output failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}
