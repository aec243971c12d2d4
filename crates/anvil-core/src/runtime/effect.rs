use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type EffectFuture<M> = Pin<Box<dyn Future<Output = M> + Send>>;

/// Asynchronous work requested by a program, resolved into messages.
#[derive(Default)]
pub enum Effect<M> {
    #[default]
    None,
    /// Deliver a message without doing any work.
    Msg(M),
    /// Run every child concurrently.
    Batch(Vec<Effect<M>>),
    /// Run children one after another; each finishes before the next starts.
    Sequence(Vec<Effect<M>>),
    /// Await a future and deliver its output.
    Task(EffectFuture<M>),
}

impl<M: Debug> Debug for Effect<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Msg(m) => f.debug_tuple("Msg").field(m).finish(),
            Self::Batch(effects) => f.debug_tuple("Batch").field(effects).finish(),
            Self::Sequence(effects) => f.debug_tuple("Sequence").field(effects).finish(),
            Self::Task(_) => write!(f, "Task(...)"),
        }
    }
}

impl<M: Send + 'static> Effect<M> {
    pub fn none() -> Self {
        Self::None
    }

    pub fn msg(message: M) -> Self {
        Self::Msg(message)
    }

    pub fn task<F>(future: F) -> Self
    where
        F: Future<Output = M> + Send + 'static,
    {
        Self::Task(Box::pin(future))
    }

    pub fn batch(effects: Vec<Self>) -> Self {
        let mut effects: Vec<Self> = effects.into_iter().filter(|e| !e.is_none()).collect();
        match effects.len() {
            0 => Self::None,
            1 => effects.remove(0),
            _ => Self::Batch(effects),
        }
    }

    pub fn sequence(effects: Vec<Self>) -> Self {
        let mut effects: Vec<Self> = effects.into_iter().filter(|e| !e.is_none()).collect();
        match effects.len() {
            0 => Self::None,
            1 => effects.remove(0),
            _ => Self::Sequence(effects),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Number of leaf effects (messages and tasks).
    pub fn count(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Batch(effects) | Self::Sequence(effects) => {
                effects.iter().map(Self::count).sum()
            }
            Self::Msg(_) | Self::Task(_) => 1,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Msg(_) => "Msg",
            Self::Batch(_) => "Batch",
            Self::Sequence(_) => "Sequence",
            Self::Task(_) => "Task",
        }
    }

    /// Convert every message this effect produces.
    pub fn map<N, F>(self, f: F) -> Effect<N>
    where
        N: Send + 'static,
        F: Fn(M) -> N + Send + Sync + 'static,
    {
        self.map_shared(Arc::new(f))
    }

    fn map_shared<N>(self, f: Arc<dyn Fn(M) -> N + Send + Sync>) -> Effect<N>
    where
        N: Send + 'static,
    {
        match self {
            Self::None => Effect::None,
            Self::Msg(message) => Effect::Msg(f(message)),
            Self::Batch(effects) => Effect::Batch(
                effects
                    .into_iter()
                    .map(|effect| effect.map_shared(f.clone()))
                    .collect(),
            ),
            Self::Sequence(effects) => Effect::Sequence(
                effects
                    .into_iter()
                    .map(|effect| effect.map_shared(f.clone()))
                    .collect(),
            ),
            Self::Task(future) => Effect::Task(Box::pin(async move { f(future.await) })),
        }
    }
}
