//! TaskPayload trait - binds a Rust type to a task kind.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{TaskKind, TaskSpec};

/// A payload type that knows its own kind.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Resize { path: String, width: u32 }
///
/// impl TaskPayload for Resize {
///     const KIND: &'static str = "image.resize";
///     type Output = String;
/// }
/// ```
///
/// `DeserializeOwned + 'static` lets the worker decode it from an owned
/// `serde_json::Value` and keep it across await points.
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;

    /// What the handler produces; stored as the task result.
    type Output: Serialize + Send + 'static;

    fn kind() -> TaskKind {
        TaskKind::new(Self::KIND)
    }

    /// A spec for this payload with default priority and retry budget.
    fn to_spec(&self) -> Result<TaskSpec, serde_json::Error> {
        Ok(TaskSpec::new(Self::kind(), serde_json::to_value(self)?))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Add {
        pub a: i64,
        pub b: i64,
    }

    impl TaskPayload for Add {
        const KIND: &'static str = "math.add";
        type Output = i64;
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Greet {
        pub name: String,
    }

    impl TaskPayload for Greet {
        const KIND: &'static str = "text.greet";
        type Output = String;
    }
}
