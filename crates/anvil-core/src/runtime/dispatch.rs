use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc};

use crate::runtime::{Effect, Program};

/// Executes effects on tokio and feeds their messages back to the loop.
pub struct EffectRunner<M> {
    sender: mpsc::UnboundedSender<M>,
    in_flight: Arc<AtomicUsize>,
    settled: Arc<Notify>,
    handle: Handle,
}

impl<M> Clone for EffectRunner<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            in_flight: self.in_flight.clone(),
            settled: self.settled.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<M: Send + 'static> EffectRunner<M> {
    pub fn dispatch(&self, effect: Effect<M>) {
        match effect {
            Effect::None => {}
            Effect::Msg(message) => {
                let _ = self.sender.send(message);
            }
            Effect::Batch(effects) => {
                for effect in effects {
                    self.dispatch(effect);
                }
            }
            effect @ (Effect::Task(_) | Effect::Sequence(_)) => {
                tracing::debug!(effect = effect.type_name(), "dispatching effect");
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                let sender = self.sender.clone();
                let guard = InFlightGuard {
                    in_flight: self.in_flight.clone(),
                    settled: self.settled.clone(),
                };
                self.handle.spawn(async move {
                    let _guard = guard;
                    drive(effect, sender).await;
                });
            }
        }
    }

    /// Effects spawned but not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Released even when the effect panics, so the loop can still detect idleness.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
    settled: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.settled.notify_one();
    }
}

fn drive<M: Send + 'static>(
    effect: Effect<M>,
    sender: mpsc::UnboundedSender<M>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        match effect {
            Effect::None => {}
            Effect::Msg(message) => {
                let _ = sender.send(message);
            }
            Effect::Task(future) => {
                let message = future.await;
                let _ = sender.send(message);
            }
            Effect::Batch(effects) => {
                let handles: Vec<_> = effects
                    .into_iter()
                    .map(|effect| tokio::spawn(drive(effect, sender.clone())))
                    .collect();
                for handle in handles {
                    if let Err(error) = handle.await {
                        tracing::error!(error = %error, "batched effect did not complete");
                    }
                }
            }
            Effect::Sequence(effects) => {
                for effect in effects {
                    drive(effect, sender.clone()).await;
                }
            }
        }
    })
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoopExit {
    /// The program reported that it is done.
    Done { processed: usize },
    /// Nothing is queued or in flight, so no further message can arrive.
    Idle { processed: usize },
}

pub struct MessageLoop<M> {
    receiver: mpsc::UnboundedReceiver<M>,
    runner: EffectRunner<M>,
}

impl<M: Send + 'static> MessageLoop<M> {
    /// Build a loop bound to the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(handle: Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            receiver,
            runner: EffectRunner {
                sender,
                in_flight: Arc::new(AtomicUsize::new(0)),
                settled: Arc::new(Notify::new()),
                handle,
            },
        }
    }

    pub fn runner(&self) -> EffectRunner<M> {
        self.runner.clone()
    }

    pub async fn run<P>(mut self, program: &mut P) -> LoopExit
    where
        P: Program<Message = M>,
    {
        let mut processed = 0usize;
        self.runner.dispatch(program.init());
        program.view();

        loop {
            if program.is_done() {
                return LoopExit::Done { processed };
            }
            if self.runner.in_flight() == 0 && self.receiver.is_empty() {
                return LoopExit::Idle { processed };
            }

            let message = tokio::select! {
                message = self.receiver.recv() => message,
                _ = self.runner.settled.notified() => continue,
            };
            let Some(message) = message else {
                return LoopExit::Idle { processed };
            };
            processed += 1;
            let effect = program.update(message);
            self.runner.dispatch(effect);
            program.view();
        }
    }
}

impl<M: Send + 'static> Default for MessageLoop<M> {
    fn default() -> Self {
        Self::new()
    }
}
