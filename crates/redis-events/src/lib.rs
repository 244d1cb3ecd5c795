//! Local event emitter backed by Redis pub/sub fan-out.
//!
//! An [`EventEmitter`] behaves like an ordinary in-process event emitter,
//! except that events travel through a Redis broker: emitting publishes
//! the serialized arguments on a channel named after the event, and every
//! process subscribed to that event -- this one included -- receives the
//! delivery and re-emits it to its local listeners.
//!
//! # Architecture
//!
//! ```text
//! emit(event, args)
//!     |
//!     +-- reserved name? --> local dispatch only (error, newListener,
//!     |                      removeListener never cross the wire)
//!     +-- otherwise ------> codec --> publish connection --> broker
//!
//! broker --> subscribe connection --> dispatch bridge
//!                                         |-- codec (decode)
//!                                         +-- local listeners
//! ```
//!
//! Connections are created lazily (one for publishing, one for
//! subscribing) and reused for the emitter's lifetime. Each event name is
//! subscribed at most once per emitter, on the first listener.
//!
//! # Modules
//!
//! - [`emitter`] -- the public facade and the dispatch bridge
//! - [`registry`] -- the in-process listener registry
//! - [`codec`] -- wire payload encoding and decoding
//! - [`config`] -- connection settings and process-wide defaults
//! - [`error`] -- shared error types

pub mod codec;
pub mod config;
pub mod emitter;
pub mod error;
pub mod registry;

// Re-export primary types for convenience.
pub use config::{EmitterConfig, set_default_config};
pub use emitter::{
    ERROR_EVENT, EventEmitter, NEW_LISTENER_EVENT, REMOVE_LISTENER_EVENT, is_reserved,
};
pub use error::EmitterError;
pub use registry::{Dispatch, Listener, ListenerId, LocalRegistry};
