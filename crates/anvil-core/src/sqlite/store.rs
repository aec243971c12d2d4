use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension};

use crate::models::{CoreError, CoreErrorKind, InstallTarget, InstalledTool};
use crate::persistence::{ManifestStore, PersistenceResult};

const MIGRATIONS_TABLE: &str = "anvil_schema_migrations";

/// Schema version written by this build.
pub const SCHEMA_VERSION: i64 = 1;

const INSTALLED_TOOLS_SQL: &str = "
CREATE TABLE IF NOT EXISTS installed_tools (
    tool_name TEXT NOT NULL,
    build_type TEXT NOT NULL,
    version TEXT,
    installed_at_unix INTEGER NOT NULL,
    PRIMARY KEY (tool_name, build_type)
);
";

pub struct SqliteManifestStore {
    database_path: PathBuf,
}

impl SqliteManifestStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    /// Open the store, creating the schema on first use.
    pub fn open(database_path: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let store = Self::new(database_path);
        store.initialize()?;
        Ok(store)
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Create `installed_tools` and record the schema version. Databases
    /// written by a newer build are rejected rather than modified.
    pub fn initialize(&self) -> PersistenceResult<()> {
        self.with_connection("initialize", |connection| {
            let transaction = connection.transaction()?;
            ensure_migrations_table(&transaction)?;
            let version = read_schema_version(&transaction)?;
            if version > SCHEMA_VERSION {
                return Err(storage_error_sqlite(&format!(
                    "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
                )));
            }

            if version < SCHEMA_VERSION {
                transaction.execute_batch(INSTALLED_TOOLS_SQL)?;
                transaction.execute(
                    &format!(
                        "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
                         VALUES (?1, 'installed_tools', strftime('%s', 'now'))"
                    ),
                    [SCHEMA_VERSION],
                )?;
                tracing::info!(
                    path = %self.database_path.display(),
                    version = SCHEMA_VERSION,
                    "created manifest schema"
                );
            }
            transaction.commit()
        })
    }

    /// Recorded schema version, 0 for a database that was never initialized.
    pub fn schema_version(&self) -> PersistenceResult<i64> {
        self.with_connection("schema_version", |connection| {
            ensure_migrations_table(connection)?;
            read_schema_version(connection)
        })
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl ManifestStore for SqliteManifestStore {
    fn is_installed(&self, target: &InstallTarget) -> PersistenceResult<bool> {
        self.with_connection("is_installed", |connection| {
            ensure_schema_ready(connection)?;
            let found: Option<i64> = connection
                .query_row(
                    "SELECT 1 FROM installed_tools WHERE tool_name = ?1 AND build_type = ?2",
                    (target.tool.as_str(), target.build_type.as_str()),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    fn record_installed(&self, tool: &InstalledTool) -> PersistenceResult<()> {
        self.with_connection("record_installed", |connection| {
            ensure_schema_ready(connection)?;
            let transaction = connection.transaction()?;
            transaction.execute(
                "
INSERT INTO installed_tools (tool_name, build_type, version, installed_at_unix)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(tool_name, build_type) DO UPDATE SET
    version = excluded.version,
    installed_at_unix = excluded.installed_at_unix
",
                (
                    tool.name.as_str(),
                    tool.build_type.as_str(),
                    tool.version.as_deref(),
                    system_time_to_unix(tool.installed_at),
                ),
            )?;
            transaction.commit()?;
            Ok(())
        })
    }

    fn remove(&self, name: &str, build_type: &str) -> PersistenceResult<bool> {
        self.with_connection("remove", |connection| {
            ensure_schema_ready(connection)?;
            let removed = connection.execute(
                "DELETE FROM installed_tools WHERE tool_name = ?1 AND build_type = ?2",
                (name, build_type),
            )?;
            Ok(removed > 0)
        })
    }

    fn list(&self) -> PersistenceResult<Vec<InstalledTool>> {
        self.with_connection("list", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT tool_name, build_type, version, installed_at_unix
FROM installed_tools
ORDER BY tool_name ASC, build_type ASC
",
            )?;
            let rows = statement.query_map([], |row| {
                Ok(InstalledTool {
                    name: row.get(0)?,
                    build_type: row.get(1)?,
                    version: row.get(2)?,
                    installed_at: unix_to_system_time(row.get(3)?),
                })
            })?;
            let tools = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tools)
        })
    }
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    Connection::open(database_path)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    if read_schema_version(connection)? < SCHEMA_VERSION {
        return Err(storage_error_sqlite(
            "manifest schema is not initialized; open the store before using it",
        ));
    }
    Ok(())
}

fn read_schema_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn system_time_to_unix(value: SystemTime) -> i64 {
    value
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

fn unix_to_system_time(seconds: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds.max(0) as u64)
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("sqlite {operation} failed: {error}"),
    )
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

#[cfg(test)]
mod tests {
    use super::{system_time_to_unix, unix_to_system_time};
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn unix_conversion_truncates_to_seconds() {
        let value = UNIX_EPOCH + Duration::from_millis(42_750);
        assert_eq!(system_time_to_unix(value), 42);
        assert_eq!(unix_to_system_time(42), UNIX_EPOCH + Duration::from_secs(42));
    }

    #[test]
    fn negative_unix_clamps_to_epoch() {
        assert_eq!(unix_to_system_time(-5), UNIX_EPOCH);
    }
}
