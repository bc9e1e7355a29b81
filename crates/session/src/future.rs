//! Future variants over a [`Call`]: session start and function evaluation.

use std::sync::OnceLock;
use std::time::Duration;

use enginelink_transport::{SessionToken, Value, failure_ids};
use tracing::{debug, warn};

use crate::call::{Call, CallKind, CallStatus, Settled};
use crate::error::{EngineError, Result};
use crate::handle::EngineHandle;
use crate::registry::SessionRegistry;

/// Contract shared by every future over a remote operation.
pub trait EngineFuture: Send + Sync {
    /// Value produced on success.
    type Output;

    /// Current status. Never blocks on the remote side.
    fn status(&self) -> CallStatus;

    /// Whether the operation reached a final state.
    fn done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Block until the operation finishes or `timeout` elapses.
    ///
    /// Repeated calls after completion return the same outcome.
    fn result(&self, timeout: Option<Duration>) -> Result<Self::Output>;

    /// Ask for the operation to be interrupted. Returns whether the request was
    /// accepted, not whether the interruption happened.
    fn cancel(&self) -> bool;

    /// Whether the engine confirmed the interruption.
    fn cancelled(&self) -> bool {
        self.status() == CallStatus::Cancelled
    }
}

/// Future of a session launch or attach; resolves to an [`EngineHandle`].
pub struct SessionStartFuture {
    call: Call<SessionToken>,
    registry: SessionRegistry,
    resolved: OnceLock<Result<EngineHandle>>,
}

impl SessionStartFuture {
    pub(crate) fn new(call: Call<SessionToken>, registry: SessionRegistry) -> Self {
        Self {
            call,
            registry,
            resolved: OnceLock::new(),
        }
    }

    /// Whether this start attaches to an existing shared session.
    pub fn is_attach(&self) -> bool {
        matches!(self.call.kind(), CallKind::SessionStart { attach: true })
    }
}

impl EngineFuture for SessionStartFuture {
    type Output = EngineHandle;

    fn status(&self) -> CallStatus {
        self.call.status()
    }

    fn result(&self, timeout: Option<Duration>) -> Result<EngineHandle> {
        if let Some(resolved) = self.resolved.get() {
            return resolved.clone();
        }
        match self.call.wait(timeout)? {
            Settled::Done(token) => self
                .resolved
                .get_or_init(|| self.registry.adopt(token))
                .clone(),
            Settled::Errored(failure) => Err(EngineError::StartFailure(failure.to_string())),
            Settled::Cancelled => Err(EngineError::Cancelled),
        }
    }

    fn cancel(&self) -> bool {
        self.call.cancel()
    }
}

impl Drop for SessionStartFuture {
    fn drop(&mut self) {
        if self.resolved.get().is_some() {
            return;
        }
        // A started session nobody adopted would otherwise stay open.
        if let Some(Settled::Done(token)) = self.call.peek() {
            debug!(session = %token, "closing session from an unconsumed start");
            self.registry.close_unadopted(token);
        }
    }
}

/// Future of one function evaluation; resolves to a value shaped by `nargout`.
pub struct FevalFuture {
    call: Call<Vec<Value>>,
    engine: EngineHandle,
    nargout: usize,
}

impl FevalFuture {
    pub(crate) fn new(call: Call<Vec<Value>>, engine: EngineHandle, nargout: usize) -> Self {
        Self {
            call,
            engine,
            nargout,
        }
    }
}

fn shape_outputs(mut values: Vec<Value>, nargout: usize) -> Result<Value> {
    if values.len() != nargout {
        return Err(EngineError::RemoteExecution {
            identifier: failure_ids::TOO_MANY_OUTPUTS.to_string(),
            message: format!(
                "expected {nargout} output(s), the engine returned {}",
                values.len()
            ),
        });
    }
    Ok(match nargout {
        0 => Value::Empty,
        1 => values.pop().unwrap_or(Value::Empty),
        _ => Value::Tuple(values),
    })
}

impl EngineFuture for FevalFuture {
    type Output = Value;

    fn status(&self) -> CallStatus {
        self.call.status()
    }

    fn result(&self, timeout: Option<Duration>) -> Result<Value> {
        match self.call.wait(timeout)? {
            Settled::Done(values) => shape_outputs(values, self.nargout),
            Settled::Errored(failure) => {
                if failure.identifier() == failure_ids::SESSION_TERMINATED
                    && !self.engine.is_live()
                {
                    warn!(handle = %self.engine.id(), "engine session ended while a call was queued");
                }
                Err(EngineError::remote(&failure))
            }
            Settled::Cancelled => Err(EngineError::Cancelled),
        }
    }

    fn cancel(&self) -> bool {
        self.call.cancel()
    }
}
