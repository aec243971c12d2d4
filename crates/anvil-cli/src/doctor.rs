use std::process::ExitCode;

use anvil_core::checks::{CheckMessage, SequentialCheckRunner, default_probes};
use anvil_core::config::AnvilConfig;
use anvil_core::models::CheckStatus;
use anvil_core::runtime::{Effect, MessageLoop, Program};

use crate::error::CliResult;
use crate::render::Renderer;

pub async fn doctor(config: &AnvilConfig, renderer: Renderer) -> CliResult<ExitCode> {
    let disk_path = std::env::current_dir()?;
    let probes = default_probes(&config.network_probe_host, disk_path);
    let mut app = DoctorApp {
        runner: SequentialCheckRunner::new(probes, config.check_sequencing),
        renderer,
    };

    MessageLoop::new().run(&mut app).await;

    let errors = app.runner.count(CheckStatus::Error);
    let warnings = app.runner.count(CheckStatus::Warning);
    renderer.line("");
    renderer.line(&format!(
        "{} checks, {errors} errors, {warnings} warnings",
        app.runner.len()
    ));

    Ok(if errors == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

struct DoctorApp {
    runner: SequentialCheckRunner,
    renderer: Renderer,
}

impl Program for DoctorApp {
    type Message = CheckMessage;

    fn init(&mut self) -> Effect<CheckMessage> {
        self.runner.run_from(0)
    }

    fn update(&mut self, message: CheckMessage) -> Effect<CheckMessage> {
        if let CheckMessage::Update { update, .. } = &message {
            for line in self.renderer.check_lines(update) {
                self.renderer.line(&line);
            }
        }
        self.runner.apply(message)
    }

    fn is_done(&self) -> bool {
        self.runner.is_complete()
    }
}
