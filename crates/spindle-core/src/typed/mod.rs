//! Handlers: the code that actually executes a task, resolved by kind.
//!
//! Two layers:
//! - **Typed**: `TaskPayload` + `Handler<T>`; the payload is decoded into `T`
//!   and the output encoded back to JSON by `TypedHandler`.
//! - **Dyn**: `DynHandler`, object-safe, stored in the `HandlerRegistry` and
//!   called by workers with the raw JSON payload.

pub mod codec;
pub mod context;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::context::TaskContext;
pub use self::handler::{DynHandler, FnHandler, Handler, HandlerError, TypedHandler};
pub use self::registry::{HandlerRegistry, RegistryError};
pub use self::task::TaskPayload;
