//! PoolBuilder - wiring and startup validation.

use std::future::Future;
use std::sync::Arc;

use super::WorkerPool;
use super::config::PoolConfig;
use super::driver::PoolShared;
use super::emitter::Emitter;
use super::status::PoolCounters;
use crate::domain::TaskKind;
use crate::error::PoolError;
use crate::ports::{Clock, EventSink, IdGenerator, NoopEventSink, SystemClock, UlidGenerator};
use crate::store::TaskStore;
use crate::typed::{Handler, HandlerError, HandlerRegistry, RegistryError, TaskContext, TaskPayload};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no handler registered for expected kinds: {0:?}")]
    MissingKinds(Vec<TaskKind>),

    #[error(transparent)]
    Config(#[from] PoolError),
}

/// Builds a `WorkerPool`.
///
/// ```ignore
/// let pool = WorkerPool::builder(store)
///     .register::<Resize, _>(ResizeHandler)?
///     .config(PoolConfig::default().with_max_workers(4))
///     .expect_kinds(&["image.resize"])
///     .build()?;
/// ```
///
/// `expect_kinds` makes `build` fail when a kind producers will submit has
/// no handler, instead of every such task failing at run time.
pub struct PoolBuilder {
    store: Arc<TaskStore>,
    registry: HandlerRegistry,
    config: PoolConfig,
    sink: Arc<dyn EventSink>,
    event_capacity: usize,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    expected_kinds: Option<Vec<TaskKind>>,
}

impl PoolBuilder {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self {
            store,
            registry: HandlerRegistry::new(),
            config: PoolConfig::default(),
            sink: Arc::new(NoopEventSink),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            clock: Arc::new(SystemClock),
            ids: None,
            expected_kinds: None,
        }
    }

    pub fn register<T: TaskPayload, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn register_fn<F, Fut>(
        mut self,
        kind: impl Into<TaskKind>,
        f: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(serde_json::Value, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
    {
        self.registry.register_fn(kind, f)?;
        Ok(self)
    }

    /// Replace the registry wholesale.
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Extra sink that sees every event next to the `events()` broadcast.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Source of `WorkerSnapshot::started_at` and of worker id timestamps.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn expect_kinds(mut self, kinds: &[&str]) -> Self {
        self.expected_kinds = Some(kinds.iter().map(|&k| TaskKind::new(k)).collect());
        self
    }

    pub fn build(self) -> Result<WorkerPool, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_kinds {
            let missing: Vec<TaskKind> = expected
                .iter()
                .filter(|kind| !self.registry.contains(kind))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingKinds(missing));
            }
        }

        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&self.clock))),
        };
        let shared = PoolShared {
            store: self.store,
            registry: Arc::new(self.registry),
            emitter: Arc::new(Emitter::new(self.sink, self.event_capacity)),
            ids,
            clock: self.clock,
            counters: Arc::new(PoolCounters::default()),
        };
        Ok(WorkerPool::from_parts(shared, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::handler::fixtures::{AddHandler, GreetHandler};
    use crate::typed::task::fixtures::{Add, Greet};

    fn builder() -> PoolBuilder {
        PoolBuilder::new(Arc::new(TaskStore::new()))
    }

    #[test]
    fn build_with_all_expected_kinds() {
        let pool = builder()
            .register::<Add, _>(AddHandler)
            .unwrap()
            .register::<Greet, _>(GreetHandler)
            .unwrap()
            .expect_kinds(&[Add::KIND, Greet::KIND])
            .build()
            .unwrap();
        assert_eq!(pool.registry().len(), 2);
    }

    #[test]
    fn build_reports_missing_kinds() {
        let result = builder()
            .register::<Add, _>(AddHandler)
            .unwrap()
            .expect_kinds(&[Add::KIND, Greet::KIND])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingKinds(missing)) if missing == vec![Greet::kind()]
        ));
    }

    #[test]
    fn build_without_expectations_accepts_empty_registry() {
        assert!(builder().build().is_ok());
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = builder()
            .config(PoolConfig::default().with_max_workers(0))
            .build();
        assert!(matches!(result, Err(BuildError::Config(PoolError::InvalidConfig(_)))));
    }

    #[test]
    fn duplicate_registration_fails_early() {
        let result = builder()
            .register::<Add, _>(AddHandler)
            .unwrap()
            .register::<Add, _>(AddHandler);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }
}
