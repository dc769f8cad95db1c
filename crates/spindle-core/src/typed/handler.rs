//! Handler traits and adapters.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::codec;
use super::context::TaskContext;
use super::task::TaskPayload;

/// Why a handler did not produce a result. Any of these turns into
/// `WorkerMessage::Failed` and goes through the task's retry budget.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("payload decode: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("result encode: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Executes one payload type.
///
/// `Handler<Resize>` only ever sees `Resize`; the pairing with a kind is
/// checked at compile time through `TaskPayload::KIND`.
#[async_trait]
pub trait Handler<T: TaskPayload>: Send + Sync {
    async fn handle(&self, task: T, ctx: TaskContext) -> Result<T::Output, HandlerError>;
}

/// Object-safe form stored in the registry and called by workers.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle(
        &self,
        payload: serde_json::Value,
        ctx: TaskContext,
    ) -> Result<serde_json::Value, HandlerError>;
}

/// Erases `Handler<T>` into `DynHandler` by decoding the payload and encoding
/// the output.
pub struct TypedHandler<T: TaskPayload, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TaskPayload, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskPayload, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle(
        &self,
        payload: serde_json::Value,
        ctx: TaskContext,
    ) -> Result<serde_json::Value, HandlerError> {
        let task: T = codec::decode(payload)?;
        let output = self.handler.handle(task, ctx).await?;
        codec::encode(&output)
    }
}

/// Closure adapter working on raw JSON.
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(serde_json::Value, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> DynHandler for FnHandler<F>
where
    F: Fn(serde_json::Value, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        payload: serde_json::Value,
        ctx: TaskContext,
    ) -> Result<serde_json::Value, HandlerError> {
        (self.f)(payload, ctx).await
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::typed::task::fixtures::{Add, Greet};

    pub struct AddHandler;

    #[async_trait]
    impl Handler<Add> for AddHandler {
        async fn handle(&self, task: Add, _ctx: TaskContext) -> Result<i64, HandlerError> {
            task.a
                .checked_add(task.b)
                .ok_or_else(|| HandlerError::failed("overflow"))
        }
    }

    pub struct GreetHandler;

    #[async_trait]
    impl Handler<Greet> for GreetHandler {
        async fn handle(&self, task: Greet, _ctx: TaskContext) -> Result<String, HandlerError> {
            Ok(format!("hello, {}", task.name))
        }
    }
}
