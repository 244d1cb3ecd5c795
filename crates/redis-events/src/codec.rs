//! Wire payload codec.
//!
//! Event arguments travel over the broker as a JSON array, one element per
//! argument, in call order. The channel name is carried by the transport
//! layer, so the payload is nothing but the argument list.

use serde_json::Value;

use crate::error::EmitterError;

/// Serialize an argument list into its wire form.
///
/// # Errors
///
/// Returns [`EmitterError::Encode`] if an argument cannot be serialized.
pub fn encode(args: &[Value]) -> Result<String, EmitterError> {
    Ok(serde_json::to_string(args)?)
}

/// Parse an inbound payload back into an argument list.
///
/// The payload must be a JSON array. A payload that parses to anything
/// else is rejected rather than dispatched: prepending an event name to a
/// non-sequence has no meaningful result, so both malformed JSON and
/// well-formed non-array values surface as decode errors carrying the
/// original event name and payload.
///
/// # Errors
///
/// Returns [`EmitterError::Decode`] for malformed JSON and
/// [`EmitterError::PayloadShape`] for a non-array value.
pub fn decode(event: &str, payload: &str) -> Result<Vec<Value>, EmitterError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|source| EmitterError::Decode {
            event: event.to_owned(),
            payload: payload.to_owned(),
            source,
        })?;

    match value {
        Value::Array(args) => Ok(args),
        _ => Err(EmitterError::PayloadShape {
            event: event.to_owned(),
            payload: payload.to_owned(),
        }),
    }
}
