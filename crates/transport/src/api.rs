//! Boundary contract consumed by the session layer.

use std::fmt;

use thiserror::Error;

use crate::sink::SinkRef;
use crate::value::Value;

/// Remote function that reads a variable from the base workspace.
pub const GET_VARIABLE_FUNCTION: &str = "matlab.internal.engine.getVariable";

/// Remote function that assigns a variable into a workspace.
pub const ASSIGN_FUNCTION: &str = "assignin";

/// Startup command that makes a launched session discoverable by name.
pub const SHARE_ENGINE_COMMAND: &str = "matlab.engine.shareEngine";

/// Stable identifiers carried by [`RemoteFailure`].
pub mod failure_ids {
    /// The called function does not exist.
    pub const UNDEFINED_FUNCTION: &str = "MATLAB:UndefinedFunction";
    /// The requested workspace variable does not exist.
    pub const UNDEFINED_VARIABLE: &str = "MATLAB:undefinedVarOrFunction";
    /// More outputs were requested than the function produces.
    pub const TOO_MANY_OUTPUTS: &str = "MATLAB:TooManyOutputs";
    /// An argument had the wrong type or arity.
    pub const INVALID_INPUT: &str = "MATLAB:invalidInput";
    /// Raised by the remote `error` function without an explicit identifier.
    pub const USER_ERROR: &str = "MATLAB:user";
    /// The session ended before the operation could run.
    pub const SESSION_TERMINATED: &str = "enginelink:sessionTerminated";
    /// The token does not name an operation known to the boundary.
    pub const UNKNOWN_TOKEN: &str = "enginelink:unknownToken";
}

/// Opaque token naming one engine session as seen by one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(u64);

impl SessionToken {
    /// Wrap a raw boundary identifier.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw boundary identifier.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Opaque token naming one submitted operation (session start or function call).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallToken(u64);

impl CallToken {
    /// Wrap a raw boundary identifier.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw boundary identifier.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// How a session start should obtain its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartMode {
    /// Launch a new engine process with the given startup arguments.
    Launch {
        /// Startup arguments, already split.
        args: Vec<String>,
    },
    /// Attach to an existing shared session.
    Attach {
        /// Name of the shared session.
        name: String,
    },
}

/// Options for [`Transport::submit_start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    mode: StartMode,
}

impl StartOptions {
    /// Launch a new session; `option` is split on whitespace.
    pub fn launch(option: &str) -> Self {
        Self {
            mode: StartMode::Launch {
                args: option.split_whitespace().map(str::to_string).collect(),
            },
        }
    }

    /// Attach to the shared session called `name`.
    pub fn attach(name: impl Into<String>) -> Self {
        Self {
            mode: StartMode::Attach { name: name.into() },
        }
    }

    /// Requested mode.
    pub fn mode(&self) -> &StartMode {
        &self.mode
    }

    /// Whether this start attaches to an existing session.
    pub fn is_attach(&self) -> bool {
        matches!(self.mode, StartMode::Attach { .. })
    }

    /// Shared-session name requested by a launch, if the startup arguments
    /// contain the share command.
    ///
    /// `Some(None)` means "shared, with a boundary-chosen name".
    pub fn share_request(&self) -> Option<Option<String>> {
        let StartMode::Launch { args } = &self.mode else {
            return None;
        };
        let command = args
            .iter()
            .find(|arg| arg.starts_with(SHARE_ENGINE_COMMAND))?;
        let rest = &command[SHARE_ENGINE_COMMAND.len()..];
        let name = rest
            .strip_prefix("('")
            .and_then(|s| s.strip_suffix("')"))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Some(name)
    }
}

/// One function invocation handed to [`Transport::submit_call`].
#[derive(Clone)]
pub struct CallRequest {
    /// Qualified remote function name (e.g. `matlab.internal.engine.getVariable`).
    pub function: String,
    /// Number of requested outputs.
    pub nargout: usize,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Destination for text the function prints; console when absent.
    pub stdout: Option<SinkRef>,
    /// Destination for warnings and error text; console when absent.
    pub stderr: Option<SinkRef>,
}

impl fmt::Debug for CallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRequest")
            .field("function", &self.function)
            .field("nargout", &self.nargout)
            .field("args", &self.args)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Failure reported by the engine for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    identifier: String,
    message: String,
}

impl RemoteFailure {
    /// Build a failure from an identifier and a message.
    pub fn new(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            message: message.into(),
        }
    }

    /// Stable identifier (see [`failure_ids`]).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.identifier)
    }
}

/// Progress of one submitted operation as reported by the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStatus<T> {
    /// Accepted, waiting for the session executor.
    Pending,
    /// Executing.
    Running,
    /// Finished successfully.
    Done(T),
    /// Finished with a failure.
    Errored(RemoteFailure),
    /// Interrupted before producing a value.
    Cancelled,
}

/// Errors returned synchronously by the boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A session could not be launched or attached.
    #[error("session could not be started: {0}")]
    StartFailure(String),

    /// The session named by the token is not running.
    #[error("engine session is not running")]
    SessionTerminated,

    /// One or more inputs are invalid.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}

/// Transport to an engine process.
///
/// Every method must return promptly: waiting is the caller's business and is
/// done by polling.
pub trait Transport: Send + Sync {
    /// Submit a session launch or attach.
    fn submit_start(&self, options: &StartOptions) -> Result<CallToken, TransportError>;

    /// Poll a submitted session start.
    fn poll_start(&self, token: CallToken) -> RemoteStatus<SessionToken>;

    /// Submit a function call to a session. Calls on one session execute in
    /// submission order.
    fn submit_call(
        &self,
        session: SessionToken,
        request: CallRequest,
    ) -> Result<CallToken, TransportError>;

    /// Poll a submitted function call. `Done` carries at most `nargout` values.
    fn poll_call(&self, token: CallToken) -> RemoteStatus<Vec<Value>>;

    /// Ask the boundary to interrupt an operation. Returns whether the request
    /// was accepted; completion is observed through polling.
    fn cancel_request(&self, token: CallToken) -> bool;

    /// Forget an operation. Finished operations are dropped, unfinished ones are
    /// discarded as soon as they finish.
    fn release(&self, token: CallToken);

    /// Names of the shared sessions that can currently be attached, oldest first.
    fn list_shared_sessions(&self) -> Vec<String>;

    /// Whether the session behind `session` is still running.
    fn is_alive(&self, session: SessionToken) -> bool;

    /// Release `session`. Closing an unknown or already closed token is a no-op.
    fn close(&self, session: SessionToken);

    /// Release transport-wide resources after every session was closed.
    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_options_split_on_whitespace() {
        let opts = StartOptions::launch("  -nodesktop   -nosplash ");
        assert_eq!(
            opts.mode(),
            &StartMode::Launch {
                args: vec!["-nodesktop".to_string(), "-nosplash".to_string()]
            }
        );
        assert!(!opts.is_attach());
        assert_eq!(opts.share_request(), None);
    }

    #[test]
    fn share_request_detects_default_and_named_sessions() {
        let opts = StartOptions::launch("-r matlab.engine.shareEngine");
        assert_eq!(opts.share_request(), Some(None));

        let opts = StartOptions::launch("-r matlab.engine.shareEngine('calc')");
        assert_eq!(opts.share_request(), Some(Some("calc".to_string())));

        assert_eq!(StartOptions::attach("calc").share_request(), None);
    }

    #[test]
    fn remote_failure_display_includes_identifier() {
        let failure = RemoteFailure::new(failure_ids::UNDEFINED_FUNCTION, "Undefined function 'foo'.");
        assert_eq!(
            failure.to_string(),
            "Undefined function 'foo'. (MATLAB:UndefinedFunction)"
        );
    }
}
