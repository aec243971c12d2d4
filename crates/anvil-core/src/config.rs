use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checks::CheckSequencing;
use crate::installer::InstallRecipe;
use crate::models::{CoreError, CoreErrorKind, DEFAULT_OUTPUT_TAIL_LINES};
use crate::orchestration::{PromotionPolicy, RegistryConfig};

pub const DEFAULT_MAX_CONCURRENT_INSTALLS: usize = 2;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_NETWORK_PROBE_HOST: &str = "1.1.1.1:443";

const DEFAULT_MANIFEST_DIR: &str = ".anvil";
const DEFAULT_MANIFEST_FILE: &str = "manifest.sqlite3";

pub const ENV_MAX_CONCURRENT: &str = "ANVIL_MAX_CONCURRENT";
pub const ENV_POLL_TIMEOUT_MS: &str = "ANVIL_POLL_TIMEOUT_MS";
pub const ENV_MANIFEST: &str = "ANVIL_MANIFEST";

pub type ConfigResult<T> = Result<T, CoreError>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnvilConfig {
    pub max_concurrent_installs: usize,
    pub promotion: PromotionPolicy,
    pub poll_timeout_ms: u64,
    pub output_tail_lines: usize,
    pub check_sequencing: CheckSequencing,
    pub manifest_path: Option<PathBuf>,
    pub network_probe_host: String,
    pub recipes: BTreeMap<String, InstallRecipe>,
}

impl Default for AnvilConfig {
    fn default() -> Self {
        Self {
            max_concurrent_installs: DEFAULT_MAX_CONCURRENT_INSTALLS,
            promotion: PromotionPolicy::Automatic,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            output_tail_lines: DEFAULT_OUTPUT_TAIL_LINES,
            check_sequencing: CheckSequencing::Strict,
            manifest_path: None,
            network_probe_host: DEFAULT_NETWORK_PROBE_HOST.to_string(),
            recipes: BTreeMap::new(),
        }
    }
}

impl AnvilConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found; using defaults");
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("failed to read config '{}': {error}", path.display()),
                ));
            }
        };

        let config = Self::from_json_str(&raw).map_err(|error| CoreError {
            message: format!("{} (in '{}')", error.message, path.display()),
            ..error
        })?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("invalid config: {error}"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<()> {
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT) {
            self.max_concurrent_installs = parse_env_number(ENV_MAX_CONCURRENT, &raw)?;
        }
        if let Some(raw) = lookup(ENV_POLL_TIMEOUT_MS) {
            self.poll_timeout_ms = parse_env_number(ENV_POLL_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MANIFEST)
            && !raw.trim().is_empty()
        {
            self.manifest_path = Some(PathBuf::from(raw));
        }
        self.validate()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent_installs == 0 {
            return Err(invalid("max_concurrent_installs must be at least 1"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(invalid("poll_timeout_ms must be at least 1"));
        }
        if self.output_tail_lines == 0 {
            return Err(invalid("output_tail_lines must be at least 1"));
        }
        for (tool, recipe) in &self.recipes {
            if recipe.stages.is_empty() {
                return Err(invalid(format!("recipe '{tool}' has no stages")));
            }
        }
        Ok(())
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_concurrent: self.max_concurrent_installs,
            promotion: self.promotion,
            output_tail_lines: self.output_tail_lines,
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Configured manifest, else `$HOME/.anvil/manifest.sqlite3`, else a
    /// path relative to the working directory.
    pub fn manifest_path_or_default(&self) -> PathBuf {
        if let Some(path) = &self.manifest_path {
            return path.clone();
        }
        let base = std::env::var_os("HOME")
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
            .unwrap_or_default();
        base.join(DEFAULT_MANIFEST_DIR).join(DEFAULT_MANIFEST_FILE)
    }
}

fn parse_env_number<T: std::str::FromStr>(key: &str, raw: &str) -> ConfigResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| invalid(format!("{key} must be a non-negative integer, got '{raw}'")))
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::InvalidInput, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_object_yields_defaults() {
        let config = AnvilConfig::from_json_str("{}").unwrap();
        assert_eq!(config, AnvilConfig::default());
        assert_eq!(config.poll_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let config = AnvilConfig::from_json_str(
            r#"{ "max_concurrent_installs": 4, "promotion": "manual", "check_sequencing": "dispatch_order" }"#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_installs, 4);
        assert_eq!(config.promotion, PromotionPolicy::Manual);
        assert_eq!(config.check_sequencing, CheckSequencing::DispatchOrder);
        assert_eq!(config.output_tail_lines, DEFAULT_OUTPUT_TAIL_LINES);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let error = AnvilConfig::from_json_str(r#"{ "max_concurrent_installs": 0 }"#).unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    }

    #[test]
    fn recipes_are_parsed() {
        let config = AnvilConfig::from_json_str(
            r#"{
                "recipes": {
                    "ripgrep": {
                        "stages": [
                            { "name": "build", "program": "cargo", "args": ["build", "--release"] }
                        ]
                    }
                }
            }"#,
        )
        .unwrap();

        let recipe = &config.recipes["ripgrep"];
        assert_eq!(recipe.stages.len(), 1);
        assert_eq!(recipe.stages[0].args, vec!["build", "--release"]);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_MAX_CONCURRENT, "3"),
            (ENV_POLL_TIMEOUT_MS, "250"),
            (ENV_MANIFEST, "/tmp/anvil/manifest.sqlite3"),
        ]);
        let mut config = AnvilConfig::default();
        config
            .apply_env_overrides(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();

        assert_eq!(config.max_concurrent_installs, 3);
        assert_eq!(config.poll_timeout_ms, 250);
        assert_eq!(
            config.manifest_path,
            Some(PathBuf::from("/tmp/anvil/manifest.sqlite3"))
        );
    }

    #[test]
    fn malformed_env_override_is_rejected() {
        let mut config = AnvilConfig::default();
        let error = config
            .apply_env_overrides(|key| (key == ENV_MAX_CONCURRENT).then(|| "many".to_string()))
            .unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    }

    #[test]
    fn explicit_manifest_path_wins() {
        let config = AnvilConfig {
            manifest_path: Some(PathBuf::from("/srv/anvil.sqlite3")),
            ..AnvilConfig::default()
        };
        assert_eq!(
            config.manifest_path_or_default(),
            PathBuf::from("/srv/anvil.sqlite3")
        );
        assert!(
            AnvilConfig::default()
                .manifest_path_or_default()
                .ends_with(".anvil/manifest.sqlite3")
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("anvil-config-does-not-exist.json");
        let config = AnvilConfig::load(&path).unwrap();
        assert_eq!(config, AnvilConfig::default());
    }
}
