//! Minimal single-consumer message loop.
//!
//! A [`Program`] owns all UI-side state and is only ever touched from the
//! loop: it receives one message at a time and answers with an [`Effect`]
//! describing asynchronous work whose results come back as further messages.

pub mod dispatch;
pub mod effect;

pub use dispatch::{EffectRunner, LoopExit, MessageLoop};
pub use effect::{Effect, EffectFuture};

pub trait Program {
    type Message: Send + 'static;

    fn init(&mut self) -> Effect<Self::Message>;

    fn update(&mut self, message: Self::Message) -> Effect<Self::Message>;

    /// Called after `init` and after every `update`.
    fn view(&self) {}

    fn is_done(&self) -> bool;
}
