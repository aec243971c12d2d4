use std::sync::Arc;

use crate::checks::{CheckSequencing, Probe};
use crate::models::{CheckStatus, CheckUpdate};
use crate::runtime::Effect;

/// Messages produced by the chain. Both carry the run generation they were
/// dispatched under so a refresh can discard everything from earlier runs.
#[derive(Clone, Debug, PartialEq)]
pub enum CheckMessage {
    Update { generation: u64, update: CheckUpdate },
    /// Dispatch the probe at `index` next.
    Continue { generation: u64, index: usize },
}

/// Position in the probe chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CheckChain {
    pub next_index: usize,
    pub total: usize,
    pub generation: u64,
}

impl CheckChain {
    pub fn new(total: usize) -> Self {
        Self {
            next_index: 0,
            total,
            generation: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.next_index >= self.total
    }
}

/// Runs an ordered list of probes one after another, reporting each result
/// as soon as it is available.
///
/// The runner never waits on a probe itself: every step is an [`Effect`]
/// that yields the probe's [`CheckUpdate`] plus a [`CheckMessage::Continue`]
/// naming the next index. Feeding `Continue` back through [`apply`] keeps the
/// chain going until every probe has been dispatched.
///
/// [`refresh`] starts a new generation. Messages from older generations are
/// dropped, and under [`CheckSequencing::Strict`] the new chain waits for a
/// probe that is still running to report before it dispatches anything.
///
/// [`apply`]: SequentialCheckRunner::apply
/// [`refresh`]: SequentialCheckRunner::refresh
pub struct SequentialCheckRunner {
    probes: Vec<Arc<dyn Probe>>,
    sequencing: CheckSequencing,
    results: Vec<CheckUpdate>,
    generation: u64,
    outstanding: usize,
    restart_pending: bool,
}

impl SequentialCheckRunner {
    pub fn new(probes: Vec<Arc<dyn Probe>>, sequencing: CheckSequencing) -> Self {
        let results = placeholders(&probes);
        Self {
            probes,
            sequencing,
            results,
            generation: 0,
            outstanding: 0,
            restart_pending: false,
        }
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn sequencing(&self) -> CheckSequencing {
        self.sequencing
    }

    pub fn results(&self) -> &[CheckUpdate] {
        &self.results
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Pure step of the chain: the effect for `chain.next_index` and the state after it.
    pub fn advance(&self, chain: CheckChain) -> (Effect<CheckMessage>, CheckChain) {
        if chain.is_finished() {
            return (Effect::none(), chain);
        }

        let index = chain.next_index;
        let Some(probe) = self.probes.get(index).cloned() else {
            return (Effect::none(), chain);
        };

        let generation = chain.generation;
        let probe = probe_effect(generation, index, probe);
        let next = Effect::msg(CheckMessage::Continue {
            generation,
            index: index + 1,
        });
        let effect = match self.sequencing {
            CheckSequencing::Strict => Effect::sequence(vec![probe, next]),
            CheckSequencing::DispatchOrder => Effect::batch(vec![probe, next]),
        };

        (
            effect,
            CheckChain {
                next_index: index + 1,
                ..chain
            },
        )
    }

    /// Effect that runs the probe at `index` and schedules the rest. No-op past the end.
    pub fn run_from(&mut self, index: usize) -> Effect<CheckMessage> {
        let (effect, _) = self.advance(CheckChain {
            next_index: index,
            total: self.probes.len(),
            generation: self.generation,
        });
        if !effect.is_none() {
            self.outstanding += 1;
        }
        effect
    }

    /// Reset every result to the "checking" placeholder and restart the chain
    /// under a new generation.
    pub fn refresh(&mut self) -> Effect<CheckMessage> {
        self.generation += 1;
        self.results = placeholders(&self.probes);

        if self.sequencing == CheckSequencing::Strict && self.outstanding > 0 {
            tracing::debug!(
                generation = self.generation,
                outstanding = self.outstanding,
                "check refresh deferred until the running check reports"
            );
            self.restart_pending = true;
            return Effect::none();
        }

        self.restart_pending = false;
        self.run_from(0)
    }

    pub fn apply(&mut self, message: CheckMessage) -> Effect<CheckMessage> {
        match message {
            CheckMessage::Update { generation, update } => {
                self.outstanding = self.outstanding.saturating_sub(1);

                if generation != self.generation {
                    tracing::debug!(
                        generation,
                        current = self.generation,
                        index = update.check_index,
                        "dropping check result from an earlier run"
                    );
                    if self.restart_pending && self.outstanding == 0 {
                        self.restart_pending = false;
                        return self.run_from(0);
                    }
                    return Effect::none();
                }

                let index = update.check_index;
                match self.results.get_mut(index) {
                    Some(slot) => *slot = update,
                    None => tracing::warn!(index, "check update for unknown probe index"),
                }
                Effect::none()
            }
            CheckMessage::Continue { generation, index } => {
                if generation != self.generation {
                    return Effect::none();
                }
                self.run_from(index)
            }
        }
    }

    /// Every probe has reported a final status.
    pub fn is_complete(&self) -> bool {
        self.results
            .iter()
            .all(|result| result.status != CheckStatus::Checking)
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.results
            .iter()
            .filter(|result| result.status == status)
            .count()
    }
}

fn placeholders(probes: &[Arc<dyn Probe>]) -> Vec<CheckUpdate> {
    probes
        .iter()
        .enumerate()
        .map(|(index, probe)| CheckUpdate::checking(index, probe.name()))
        .collect()
}

fn probe_effect(generation: u64, index: usize, probe: Arc<dyn Probe>) -> Effect<CheckMessage> {
    Effect::task(async move {
        let name = probe.name().to_string();
        tracing::debug!(probe = %name, index, generation, "running check");

        let outcome = tokio::task::spawn_blocking(move || probe.run()).await;
        let update = match outcome {
            Ok(Ok(report)) => report.into_update(index, name),
            Ok(Err(error)) => {
                tracing::warn!(
                    probe = %name,
                    kind = ?error.kind,
                    message = %error.message,
                    "check could not run"
                );
                CheckUpdate {
                    check_index: index,
                    name,
                    status: CheckStatus::Warning,
                    message: format!("check unavailable: {}", error.message),
                    details: Vec::new(),
                    suggestions: Vec::new(),
                }
            }
            Err(join_error) => CheckUpdate {
                check_index: index,
                name,
                status: CheckStatus::Warning,
                message: format!("check did not complete: {join_error}"),
                details: Vec::new(),
                suggestions: Vec::new(),
            },
        };

        CheckMessage::Update { generation, update }
    })
}
