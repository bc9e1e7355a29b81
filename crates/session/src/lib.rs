#![deny(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Asynchronous calls into engine sessions.
//!
//! A [`SessionRegistry`] launches or attaches sessions and hands out
//! [`EngineHandle`]s. Every remote operation is a call tracked by a future:
//! blocking by default, or returned as a [`FutureResult`] when dispatched in
//! the background.

/// Runtime configuration and process-wide entry points.
pub mod api;

mod call;
mod error;
mod exit_hook;
mod function;
mod future;
mod future_result;
mod handle;
mod registry;
mod workspace;

#[cfg(test)]
mod testing;

pub use api::{SessionConfig, connect_shared, list_shared_sessions, start_session};
pub use call::{CallKind, CallStatus};
pub use error::{EngineError, ErrorKind, Result};
pub use function::{CallOptions, FunctionProxy, Kwarg};
pub use future::{EngineFuture, FevalFuture, SessionStartFuture};
pub use future_result::{Dispatched, FutureResult};
pub use handle::{EngineHandle, HandleId};
pub use registry::SessionRegistry;
pub use workspace::{Workspace, is_valid_identifier};

pub use enginelink_transport::{SharedBuffer, SinkRef, TextSink, Value};
