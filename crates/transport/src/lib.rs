#![deny(missing_docs)]
#![deny(unreachable_pub)]

//! Boundary between the session layer and a running engine process.
//!
//! The [`Transport`] trait is the only way the session layer talks to an
//! engine. [`LocalEngine`] is an in-process implementation with one serialized
//! executor per session.

/// Boundary contract: tokens, requests, statuses and the [`Transport`] trait.
pub mod api;

/// Text sinks used to capture engine output.
pub mod sink;

/// Dynamic values exchanged with the engine.
pub mod value;

mod builtins;
mod local;

pub use api::{
    ASSIGN_FUNCTION, CallRequest, CallToken, GET_VARIABLE_FUNCTION, RemoteFailure, RemoteStatus,
    SHARE_ENGINE_COMMAND, SessionToken, StartMode, StartOptions, Transport, TransportError,
    failure_ids,
};
pub use local::{LocalEngine, LocalEngineConfig, LocalEngineStats};
pub use sink::{ConsoleSink, SharedBuffer, SinkRef, TextSink};
pub use value::Value;
