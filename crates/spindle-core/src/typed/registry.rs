//! HandlerRegistry - handlers keyed by task kind.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::context::TaskContext;
use super::handler::{DynHandler, FnHandler, Handler, HandlerError, TypedHandler};
use super::task::TaskPayload;
use crate::domain::TaskKind;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for kind '{0}' is already registered")]
    AlreadyRegistered(TaskKind),
}

/// Immutable once handed to a pool; every worker shares it through an `Arc`.
///
/// ```ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register::<Resize, _>(ResizeHandler)?;
/// let handler = registry.get(&TaskKind::new("image.resize"));
/// ```
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn DynHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: TaskPayload, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.register_dyn(T::kind(), Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    pub fn register_dyn(
        &mut self,
        kind: impl Into<TaskKind>,
        handler: Arc<dyn DynHandler>,
    ) -> Result<(), RegistryError> {
        let kind = kind.into();
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn register_fn<F, Fut>(
        &mut self,
        kind: impl Into<TaskKind>,
        f: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(serde_json::Value, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
    {
        self.register_dyn(kind, Arc::new(FnHandler::new(f)))
    }

    pub fn get(&self, kind: &TaskKind) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &TaskKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
