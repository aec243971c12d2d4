pub mod bridge;
pub mod checks;
pub mod config;
pub mod installer;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod runtime;
pub mod sqlite;
pub(crate) mod task_context;
