mod app;
mod cli;
mod doctor;
mod error;
mod render;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anvil_core::config::AnvilConfig;
use anvil_core::models::InstallTarget;
use anvil_core::persistence::{InMemoryManifestStore, ManifestStore};
use anvil_core::sqlite::SqliteManifestStore;
use clap::Parser;

use crate::app::InstallRequest;
use crate::cli::{Cli, Commands};
use crate::error::CliResult;
use crate::render::Renderer;

const DEFAULT_CONFIG_FILE: &str = "anvil.json";

#[tokio::main]
async fn main() -> ExitCode {
    anvil_core::logging::init_tracing();
    let cli = Cli::parse();
    let renderer = Renderer::detect();

    match run(cli, renderer).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{}", renderer.error_line(&error.to_string()));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, renderer: Renderer) -> CliResult<ExitCode> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Install {
            tools,
            build_type,
            force,
        } => {
            let request = InstallRequest {
                targets: tools
                    .into_iter()
                    .map(|tool| InstallTarget::new(tool, build_type.clone()))
                    .collect(),
                force,
                simulate: cli.simulate,
            };
            let manifest: Arc<dyn ManifestStore> = if cli.simulate {
                Arc::new(InMemoryManifestStore::new())
            } else {
                open_manifest(&config)
            };
            app::install(&config, manifest, request, renderer).await
        }
        Commands::Doctor => doctor::doctor(&config, renderer).await,
        Commands::List { json } => {
            let tools = open_manifest(&config).list()?;
            if json {
                renderer.line(&render::installed_json(&tools)?);
            } else {
                for line in render::installed_table(&tools) {
                    renderer.line(&line);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> CliResult<AnvilConfig> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = AnvilConfig::load(&path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    tracing::debug!(
        path = %path.display(),
        max_concurrent = config.max_concurrent_installs,
        recipes = config.recipes.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// The SQLite manifest, or an in-memory one when it cannot be opened.
fn open_manifest(config: &AnvilConfig) -> Arc<dyn ManifestStore> {
    let path = config.manifest_path_or_default();
    match SqliteManifestStore::open(&path) {
        Ok(store) => Arc::new(store),
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                message = %error.message,
                "manifest unavailable; installs will not be remembered"
            );
            Arc::new(InMemoryManifestStore::new())
        }
    }
}
