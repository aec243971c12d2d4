use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::installer::{
    InstallStage, Installer, InstallerResult, installer_failure, record_in_manifest,
};
use crate::models::{CoreError, CoreErrorKind, InstallTarget};
use crate::persistence::ManifestStore;
use crate::task_context::current_task_id;

const STDERR_TAIL_LINES: usize = 5;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InstallRecipe {
    pub stages: Vec<RecipeStage>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RecipeStage {
    pub name: String,
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl RecipeStage {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn validate(&self) -> InstallerResult<()> {
        if self.program.as_os_str().is_empty() {
            return Err(invalid_recipe(&self.name, "program path must not be empty"));
        }

        if self.args.iter().any(|arg| arg.contains('\0')) {
            return Err(invalid_recipe(&self.name, "args must not contain NUL bytes"));
        }

        if self
            .env
            .iter()
            .any(|(key, value)| key.is_empty() || key.contains('\0') || value.contains('\0'))
        {
            return Err(invalid_recipe(
                &self.name,
                "environment keys must be non-empty and must not contain NUL bytes",
            ));
        }

        Ok(())
    }
}

/// Runs configured per-tool recipes as child processes.
pub struct ProcessInstaller {
    recipes: BTreeMap<String, InstallRecipe>,
    manifest: Option<Arc<dyn ManifestStore>>,
}

impl ProcessInstaller {
    pub fn new(recipes: BTreeMap<String, InstallRecipe>) -> Self {
        Self {
            recipes,
            manifest: None,
        }
    }

    pub fn with_manifest(mut self, manifest: Arc<dyn ManifestStore>) -> Self {
        self.manifest = Some(manifest);
        self
    }

    fn recipe(&self, target: &InstallTarget) -> InstallerResult<&InstallRecipe> {
        self.recipes.get(&target.tool).ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("no install recipe is configured for tool '{}'", target.tool),
            )
        })
    }
}

impl Installer for ProcessInstaller {
    fn plan(&self, target: &InstallTarget) -> InstallerResult<Vec<InstallStage>> {
        let recipe = self.recipe(target)?;
        if recipe.stages.is_empty() {
            return Err(invalid_recipe(&target.tool, "recipe has no stages"));
        }
        for stage in &recipe.stages {
            stage.validate()?;
        }

        Ok(recipe
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| InstallStage::new(index, stage.name.clone()))
            .collect())
    }

    fn run_stage(
        &self,
        target: &InstallTarget,
        stage: &InstallStage,
        output: &mut dyn FnMut(String),
    ) -> InstallerResult<()> {
        let recipe = self.recipe(target)?;
        let step = recipe.stages.get(stage.index).ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!(
                    "stage index {} is out of range for tool '{}'",
                    stage.index, target.tool
                ),
            )
        })?;

        tracing::debug!(
            task_id = ?current_task_id(),
            tool = %target.tool,
            stage = %step.name,
            program = %step.program.display(),
            "running install stage command"
        );

        let handle = Handle::try_current().map_err(|_| {
            CoreError::new(
                CoreErrorKind::Internal,
                "process installer must run inside a tokio runtime",
            )
        })?;
        handle.block_on(run_command(target, step, output))?;

        if stage.index + 1 == recipe.stages.len() {
            record_in_manifest(self.manifest.as_ref(), target, recipe.version.clone());
        }

        Ok(())
    }
}

struct StreamLine {
    is_stderr: bool,
    text: String,
}

async fn run_command(
    target: &InstallTarget,
    step: &RecipeStage,
    output: &mut dyn FnMut(String),
) -> InstallerResult<()> {
    let mut command = tokio::process::Command::new(&step.program);
    command
        .args(&step.args)
        .envs(&step.env)
        .env("ANVIL_TOOL", &target.tool)
        .env("ANVIL_BUILD_TYPE", &target.build_type)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    if let Some(dir) = &step.working_dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|error| {
        installer_failure(
            target,
            format!("failed to spawn '{}': {error}", step.program.display()),
        )
    })?;

    let (sender, mut receiver) = mpsc::unbounded_channel::<StreamLine>();
    let readers = [
        child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(read_lines(stdout, false, sender.clone()))),
        child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_lines(stderr, true, sender.clone()))),
    ];
    drop(sender);

    let mut stderr_tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Some(line) = receiver.recv().await {
        if line.is_stderr {
            if stderr_tail.len() == STDERR_TAIL_LINES {
                stderr_tail.pop_front();
            }
            stderr_tail.push_back(line.text.clone());
        }
        output(line.text);
    }
    for reader in readers.into_iter().flatten() {
        let _ = reader.await;
    }

    let status = child.wait().await.map_err(|error| {
        installer_failure(target, format!("failed to wait for '{}': {error}", step.name))
    })?;

    if !status.success() {
        let code = status
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let detail = stderr_tail.into_iter().collect::<Vec<_>>().join(" | ");
        let message = if detail.is_empty() {
            format!("stage '{}' exited with status {code}", step.name)
        } else {
            format!("stage '{}' exited with status {code}: {detail}", step.name)
        };
        return Err(installer_failure(target, message));
    }

    Ok(())
}

/// Forward newline-terminated chunks until EOF. Bytes that are not UTF-8
/// are replaced rather than ending the stream, so the child never writes
/// into a closed pipe.
async fn read_lines<R>(stream: R, is_stderr: bool, sender: mpsc::UnboundedSender<StreamLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let _ = sender.send(StreamLine {
                    is_stderr,
                    text: decode_line(&buffer),
                });
            }
            Err(error) => {
                tracing::warn!(is_stderr, %error, "stopped reading install stage output");
                break;
            }
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let line = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

fn invalid_recipe(name: &str, message: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::InvalidInput,
        format!("invalid recipe '{name}': {message}"),
    )
}
