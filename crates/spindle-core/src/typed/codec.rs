//! JSON conversion between task payloads/results and their Rust types.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::handler::HandlerError;

pub fn decode<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T, HandlerError> {
    serde_json::from_value(payload).map_err(HandlerError::Decode)
}

pub fn encode<T: Serialize>(output: &T) -> Result<serde_json::Value, HandlerError> {
    serde_json::to_value(output).map_err(HandlerError::Encode)
}
