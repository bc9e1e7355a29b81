//! Handles to live engine sessions.

use std::fmt;
use std::sync::Arc;

use enginelink_transport::{CallRequest, SessionToken, TransportError};
use tracing::warn;

use crate::call::{Call, CallKind};
use crate::error::{EngineError, Result};
use crate::function::FunctionProxy;
use crate::future::FevalFuture;
use crate::registry::RegistryInner;
use crate::workspace::Workspace;

/// Registry-assigned identity of an [`EngineHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine#{}", self.0)
    }
}

/// Handle to one engine session.
///
/// Clones refer to the same session. The session token itself is held by the
/// registry; the last clone going out of scope closes it if [`EngineHandle::exit`]
/// was not called.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: HandleId,
    registry: Arc<RegistryInner>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

impl EngineHandle {
    pub(crate) fn new(id: HandleId, registry: Arc<RegistryInner>) -> Self {
        Self {
            inner: Arc::new(HandleInner { id, registry }),
        }
    }

    /// Identity of this handle within its registry.
    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    /// Proxy for the remote function `name`.
    pub fn function(&self, name: &str) -> FunctionProxy<'_> {
        FunctionProxy::new(self, name)
    }

    /// Base workspace of the session.
    pub fn workspace(&self) -> Workspace<'_> {
        Workspace::new(self)
    }

    /// Whether the session is still running.
    ///
    /// A session the engine reports as gone is released here, so the handle
    /// stays not-live from then on.
    pub fn is_live(&self) -> bool {
        let registry = &self.inner.registry;
        let Some(token) = registry.token_of(self.inner.id) else {
            return false;
        };
        if registry.transport().is_alive(token) {
            return true;
        }
        warn!(handle = %self.inner.id, session = %token, "engine session is no longer running");
        registry.release(self.inner.id);
        false
    }

    /// Close the session. Later calls are no-ops.
    pub fn exit(&self) {
        self.inner.registry.release(self.inner.id);
    }

    /// Alias of [`EngineHandle::exit`].
    pub fn quit(&self) {
        self.exit();
    }

    /// Run `f` with this handle and exit afterwards, including when `f` panics.
    pub fn scope<R>(&self, f: impl FnOnce(&EngineHandle) -> R) -> R {
        struct ExitOnDrop<'a>(&'a EngineHandle);

        impl Drop for ExitOnDrop<'_> {
            fn drop(&mut self) {
                self.0.exit();
            }
        }

        let guard = ExitOnDrop(self);
        f(guard.0)
    }

    pub(crate) fn require_live(&self) -> Result<SessionToken> {
        self.inner
            .registry
            .token_of(self.inner.id)
            .ok_or(EngineError::RejectedExecution)
    }

    pub(crate) fn submit_call(&self, request: CallRequest) -> Result<FevalFuture> {
        let session = self.require_live()?;
        let registry = &self.inner.registry;
        let kind = CallKind::Feval {
            function: request.function.clone(),
            nargout: request.nargout,
        };
        let nargout = request.nargout;
        let token = registry
            .transport()
            .submit_call(session, request)
            .map_err(|err| match err {
                TransportError::SessionTerminated => {
                    registry.release(self.inner.id);
                    EngineError::RejectedExecution
                }
                TransportError::StartFailure(message) => EngineError::StartFailure(message),
                TransportError::InvalidInput(message) => {
                    EngineError::InvalidArgument(message.to_string())
                }
            })?;
        let call = Call::new(token, kind, registry.transport().clone(), registry.cadence());
        Ok(FevalFuture::new(call, self.clone(), nargout))
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("id", &self.inner.id)
            .field("session", &self.inner.registry.token_of(self.inner.id))
            .finish()
    }
}
