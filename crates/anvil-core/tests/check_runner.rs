use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anvil_core::checks::{
    CheckChain, CheckMessage, CheckResult, CheckSequencing, Probe, ProbeReport,
    SequentialCheckRunner,
};
use anvil_core::models::{CheckStatus, CoreError, CoreErrorKind};
use anvil_core::runtime::{Effect, LoopExit, MessageLoop, Program};

struct Counters {
    active: AtomicUsize,
    peak: AtomicUsize,
    runs: AtomicUsize,
}

impl Counters {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
        })
    }
}

enum Outcome {
    Ok,
    Error,
    Unavailable,
}

struct SlowProbe {
    name: String,
    outcome: Outcome,
    counters: Arc<Counters>,
}

impl Probe for SlowProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> CheckResult<ProbeReport> {
        let now = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);
        self.counters.runs.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(15));
        self.counters.active.fetch_sub(1, Ordering::SeqCst);

        match self.outcome {
            Outcome::Ok => Ok(ProbeReport::ok(format!("{} fine", self.name))),
            Outcome::Error => Ok(ProbeReport::error("missing").suggest("install it")),
            Outcome::Unavailable => Err(CoreError::new(
                CoreErrorKind::CollaboratorUnavailable,
                "no data source",
            )),
        }
    }
}

fn probes(count: usize, counters: &Arc<Counters>) -> Vec<Arc<dyn Probe>> {
    (0..count)
        .map(|index| {
            let outcome = match index {
                3 => Outcome::Error,
                5 => Outcome::Unavailable,
                _ => Outcome::Ok,
            };
            Arc::new(SlowProbe {
                name: format!("probe-{index}"),
                outcome,
                counters: counters.clone(),
            }) as Arc<dyn Probe>
        })
        .collect()
}

struct Doctor {
    runner: SequentialCheckRunner,
}

impl Program for Doctor {
    type Message = CheckMessage;

    fn init(&mut self) -> Effect<CheckMessage> {
        self.runner.run_from(0)
    }

    fn update(&mut self, message: CheckMessage) -> Effect<CheckMessage> {
        self.runner.apply(message)
    }

    fn is_done(&self) -> bool {
        self.runner.is_complete()
    }
}

#[tokio::test]
async fn strict_chain_runs_every_probe_one_at_a_time() {
    let counters = Counters::new();
    let mut doctor = Doctor {
        runner: SequentialCheckRunner::new(probes(9, &counters), CheckSequencing::Strict),
    };

    let exit = MessageLoop::new().run(&mut doctor).await;
    assert!(matches!(exit, LoopExit::Done { .. }));

    let results = doctor.runner.results();
    assert_eq!(results.len(), 9);
    for (index, result) in results.iter().enumerate() {
        assert_eq!(result.check_index, index);
        assert_eq!(result.name, format!("probe-{index}"));
    }
    assert_eq!(results[3].status, CheckStatus::Error);
    assert_eq!(results[3].suggestions, vec!["install it".to_string()]);
    assert_eq!(results[5].status, CheckStatus::Warning);
    assert!(results[5].message.contains("no data source"));
    assert_eq!(doctor.runner.count(CheckStatus::Ok), 7);

    assert_eq!(counters.peak.load(Ordering::SeqCst), 1);
    assert_eq!(counters.runs.load(Ordering::SeqCst), 9);
}

#[tokio::test]
async fn dispatch_order_chain_overlaps_probes() {
    let counters = Counters::new();
    let mut doctor = Doctor {
        runner: SequentialCheckRunner::new(probes(4, &counters), CheckSequencing::DispatchOrder),
    };

    MessageLoop::new().run(&mut doctor).await;

    assert!(doctor.runner.is_complete());
    assert_eq!(counters.runs.load(Ordering::SeqCst), 4);
    assert!(counters.peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn refresh_reruns_every_probe() {
    let counters = Counters::new();
    let mut doctor = Doctor {
        runner: SequentialCheckRunner::new(probes(3, &counters), CheckSequencing::Strict),
    };
    MessageLoop::new().run(&mut doctor).await;
    assert!(doctor.runner.is_complete());

    let effect = doctor.runner.refresh();
    assert!(!doctor.runner.is_complete());

    struct Resume(Doctor, Option<Effect<CheckMessage>>);

    impl Program for Resume {
        type Message = CheckMessage;

        fn init(&mut self) -> Effect<CheckMessage> {
            self.1.take().unwrap_or_default()
        }

        fn update(&mut self, message: CheckMessage) -> Effect<CheckMessage> {
            self.0.update(message)
        }

        fn is_done(&self) -> bool {
            self.0.is_done()
        }
    }

    let mut resume = Resume(doctor, Some(effect));
    MessageLoop::new().run(&mut resume).await;

    assert!(resume.0.runner.is_complete());
    assert_eq!(counters.runs.load(Ordering::SeqCst), 6);
}

/// Refreshes the runner once, right after the first message matching `trigger`.
struct RefreshMidChain {
    runner: SequentialCheckRunner,
    trigger: fn(&CheckMessage) -> bool,
    refreshed: bool,
    updates: usize,
}

impl RefreshMidChain {
    fn new(runner: SequentialCheckRunner, trigger: fn(&CheckMessage) -> bool) -> Self {
        Self {
            runner,
            trigger,
            refreshed: false,
            updates: 0,
        }
    }
}

impl Program for RefreshMidChain {
    type Message = CheckMessage;

    fn init(&mut self) -> Effect<CheckMessage> {
        self.runner.run_from(0)
    }

    fn update(&mut self, message: CheckMessage) -> Effect<CheckMessage> {
        if matches!(message, CheckMessage::Update { .. }) {
            self.updates += 1;
        }
        let fire = !self.refreshed && (self.trigger)(&message);
        let effect = self.runner.apply(message);
        if !fire {
            return effect;
        }

        self.refreshed = true;
        Effect::batch(vec![effect, self.runner.refresh()])
    }

    fn is_done(&self) -> bool {
        self.refreshed && self.runner.is_complete()
    }
}

#[tokio::test]
async fn refresh_after_first_result_keeps_one_check_in_flight() {
    let counters = Counters::new();
    let mut program = RefreshMidChain::new(
        SequentialCheckRunner::new(probes(4, &counters), CheckSequencing::Strict),
        |message| {
            matches!(
                message,
                CheckMessage::Update { update, .. } if update.check_index == 0
            )
        },
    );

    let exit = MessageLoop::new().run(&mut program).await;
    assert!(matches!(exit, LoopExit::Done { .. }));

    assert_eq!(counters.peak.load(Ordering::SeqCst), 1);
    assert_eq!(counters.runs.load(Ordering::SeqCst), 5);
    assert_eq!(program.updates, 5);
    assert_eq!(program.runner.generation(), 1);
    assert_eq!(program.runner.results()[3].status, CheckStatus::Error);
    assert_eq!(program.runner.count(CheckStatus::Ok), 3);
}

#[tokio::test]
async fn refresh_while_a_check_runs_waits_for_it_before_restarting() {
    let counters = Counters::new();
    let mut program = RefreshMidChain::new(
        SequentialCheckRunner::new(probes(4, &counters), CheckSequencing::Strict),
        |message| matches!(message, CheckMessage::Continue { index: 2, .. }),
    );

    let exit = MessageLoop::new().run(&mut program).await;
    assert!(matches!(exit, LoopExit::Done { .. }));

    assert_eq!(counters.peak.load(Ordering::SeqCst), 1);
    assert_eq!(counters.runs.load(Ordering::SeqCst), 7);
    assert_eq!(program.updates, 7);
    assert!(program.runner.results().iter().all(|result| {
        result.status != CheckStatus::Checking && result.message != "checking..."
    }));
}

#[test]
fn run_from_past_the_end_is_a_no_op() {
    let counters = Counters::new();
    let mut runner = SequentialCheckRunner::new(probes(9, &counters), CheckSequencing::Strict);

    assert!(runner.run_from(9).is_none());
    assert!(runner.run_from(42).is_none());

    let finished = CheckChain {
        next_index: 9,
        total: 9,
        generation: runner.generation(),
    };
    let (effect, chain) = runner.advance(finished);
    assert!(effect.is_none());
    assert!(chain.is_finished());
    assert_eq!(counters.runs.load(Ordering::SeqCst), 0);
}

#[test]
fn new_runner_shows_checking_placeholders() {
    let counters = Counters::new();
    let runner = SequentialCheckRunner::new(probes(2, &counters), CheckSequencing::Strict);

    assert_eq!(runner.len(), 2);
    assert!(runner.results().iter().all(|result| {
        result.status == CheckStatus::Checking && result.message == "checking..."
    }));
}
