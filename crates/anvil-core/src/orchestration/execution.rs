use crate::models::CoreErrorKind;
use crate::orchestration::registry::{Launch, TaskOutcome, TaskRegistry};
use crate::task_context::with_task_id;

/// Drive one task through its installer stages.
///
/// Cancellation is checked before every stage. Once the final stage has run
/// the task completes even if cancellation arrived during that stage.
pub(crate) async fn run_task(registry: TaskRegistry, launch: Launch) {
    let Launch { id, target, token } = launch;
    let installer = registry.installer();

    let plan = {
        let installer = installer.clone();
        let id = id.clone();
        let target = target.clone();
        tokio::task::spawn_blocking(move || with_task_id(&id, || installer.plan(&target))).await
    };

    let stages = match plan {
        Ok(Ok(stages)) => stages,
        Ok(Err(error)) => {
            registry.finish(&id, TaskOutcome::Failed(error.message));
            return;
        }
        Err(join_error) => {
            registry.finish(
                &id,
                TaskOutcome::Failed(format!("installer planning did not complete: {join_error}")),
            );
            return;
        }
    };

    let total = stages.len().max(1) as f64;
    for stage in stages {
        if token.is_cancelled() {
            registry.finish(&id, TaskOutcome::Cancelled);
            return;
        }

        if !registry.begin_stage(&id, &stage.name, stage.index as f64 / total) {
            registry.finish(
                &id,
                TaskOutcome::Failed(format!("task could not enter stage '{}'", stage.name)),
            );
            return;
        }

        let outcome = {
            let installer = installer.clone();
            let registry = registry.clone();
            let id = id.clone();
            let target = target.clone();
            tokio::task::spawn_blocking(move || {
                with_task_id(&id, || {
                    installer.run_stage(&target, &stage, &mut |line| {
                        registry.append_output(&id, line)
                    })
                })
            })
            .await
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                if token.is_cancelled() || error.kind == CoreErrorKind::Cancelled {
                    registry.append_output(&id, error.message);
                    registry.finish(&id, TaskOutcome::Cancelled);
                } else {
                    registry.finish(&id, TaskOutcome::Failed(error.message));
                }
                return;
            }
            Err(join_error) => {
                registry.finish(
                    &id,
                    TaskOutcome::Failed(format!("install stage did not complete: {join_error}")),
                );
                return;
            }
        }
    }

    registry.finish(&id, TaskOutcome::Completed);
}
