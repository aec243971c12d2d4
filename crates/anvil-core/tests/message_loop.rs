use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anvil_core::runtime::{Effect, LoopExit, MessageLoop, Program};

#[derive(Debug)]
enum CounterMsg {
    Tick(u32),
}

struct Counter {
    seen: Vec<u32>,
    stop_after: Option<usize>,
    done: bool,
    views: Arc<AtomicUsize>,
}

impl Counter {
    fn new(stop_after: Option<usize>) -> Self {
        Self {
            seen: Vec::new(),
            stop_after,
            done: false,
            views: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Program for Counter {
    type Message = CounterMsg;

    fn init(&mut self) -> Effect<CounterMsg> {
        Effect::sequence(vec![
            Effect::task(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                CounterMsg::Tick(1)
            }),
            Effect::msg(CounterMsg::Tick(2)),
            Effect::task(async { CounterMsg::Tick(3) }),
        ])
    }

    fn update(&mut self, message: CounterMsg) -> Effect<CounterMsg> {
        let CounterMsg::Tick(value) = message;
        self.seen.push(value);
        if self.stop_after == Some(self.seen.len()) {
            self.done = true;
        }
        Effect::none()
    }

    fn view(&self) {
        self.views.fetch_add(1, Ordering::SeqCst);
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

#[tokio::test]
async fn sequence_effects_deliver_in_order_and_loop_goes_idle() {
    let mut program = Counter::new(None);
    let exit = MessageLoop::new().run(&mut program).await;

    assert_eq!(exit, LoopExit::Idle { processed: 3 });
    assert_eq!(program.seen, vec![1, 2, 3]);
    assert_eq!(program.views.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn loop_stops_once_program_is_done() {
    let mut program = Counter::new(Some(2));
    let exit = MessageLoop::new().run(&mut program).await;

    assert_eq!(exit, LoopExit::Done { processed: 2 });
    assert_eq!(program.seen, vec![1, 2]);
}

struct Fanout {
    received: usize,
}

impl Program for Fanout {
    type Message = usize;

    fn init(&mut self) -> Effect<usize> {
        Effect::batch(
            (0..8)
                .map(|n| Effect::task(async move { n }))
                .collect(),
        )
    }

    fn update(&mut self, _message: usize) -> Effect<usize> {
        self.received += 1;
        Effect::none()
    }

    fn is_done(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn batched_tasks_all_report_back() {
    let mut program = Fanout { received: 0 };
    let exit = MessageLoop::new().run(&mut program).await;

    assert_eq!(exit, LoopExit::Idle { processed: 8 });
    assert_eq!(program.received, 8);
}

struct Panicky;

impl Program for Panicky {
    type Message = ();

    fn init(&mut self) -> Effect<()> {
        Effect::task(async { panic!("effect blew up") })
    }

    fn update(&mut self, _message: ()) -> Effect<()> {
        Effect::none()
    }

    fn is_done(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn panicking_effect_does_not_hang_the_loop() {
    let exit = tokio::time::timeout(Duration::from_secs(2), MessageLoop::new().run(&mut Panicky))
        .await
        .unwrap();
    assert_eq!(exit, LoopExit::Idle { processed: 0 });
}
