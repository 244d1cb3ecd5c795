//! Error types for the emitter.
//!
//! All failures are propagated via [`EmitterError`], which wraps the
//! underlying [`fred`] and [`serde_json`] errors with context about which
//! side of the wire boundary failed. Decode failures carry the offending
//! event name and raw payload so `error` listeners can inspect them.

/// Errors that can occur while emitting or receiving events.
#[derive(Debug, thiserror::Error)]
pub enum EmitterError {
    /// A Redis connection or command failed.
    #[error("redis error: {0}")]
    Redis(#[from] fred::error::Error),

    /// Outbound event arguments could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// An inbound payload could not be parsed as JSON.
    #[error("failed to decode payload for event {event:?}: {source}")]
    Decode {
        /// Channel name the payload arrived on.
        event: String,

        /// Raw payload as received from the broker.
        payload: String,

        /// The underlying JSON parse error.
        source: serde_json::Error,
    },

    /// An inbound payload parsed as JSON but was not an argument list.
    ///
    /// Only JSON arrays are dispatched to listeners; a well-formed scalar
    /// or object payload is rejected through the same `error` path as
    /// malformed JSON.
    #[error("payload for event {event:?} is not an argument list")]
    PayloadShape {
        /// Channel name the payload arrived on.
        event: String,

        /// Raw payload as received from the broker.
        payload: String,
    },

    /// Configuration is invalid, or the process-wide defaults were
    /// installed twice.
    #[error("config error: {0}")]
    Config(String),
}
