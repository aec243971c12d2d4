pub mod store;

pub use store::{SCHEMA_VERSION, SqliteManifestStore};
