//! Named remote functions and call-time options.

use std::fmt;

use enginelink_transport::{CallRequest, SinkRef, Value};

use crate::error::{EngineError, Result};
use crate::future::{EngineFuture, FevalFuture};
use crate::future_result::{Dispatched, FutureResult};
use crate::handle::EngineHandle;

/// Value of one keyword argument.
#[derive(Clone)]
pub enum Kwarg {
    /// Plain value (`nargout`, `background`, ...).
    Value(Value),
    /// Text sink (`stdout`, `stderr`).
    Sink(SinkRef),
}

impl Kwarg {
    fn type_name(&self) -> &'static str {
        match self {
            Kwarg::Value(value) => value.type_name(),
            Kwarg::Sink(_) => "sink",
        }
    }
}

impl From<Value> for Kwarg {
    fn from(value: Value) -> Self {
        Kwarg::Value(value)
    }
}

impl From<SinkRef> for Kwarg {
    fn from(sink: SinkRef) -> Self {
        Kwarg::Sink(sink)
    }
}

/// Call-time options of a function call.
#[derive(Clone)]
pub struct CallOptions {
    /// Requested outputs.
    pub nargout: usize,
    /// Destination of printed text; console when absent.
    pub stdout: Option<SinkRef>,
    /// Destination of warnings; console when absent.
    pub stderr: Option<SinkRef>,
    /// Return a [`FutureResult`] instead of blocking.
    pub background: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            nargout: 1,
            stdout: None,
            stderr: None,
            background: false,
        }
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("nargout", &self.nargout)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("background", &self.background)
            .finish()
    }
}

fn take(kwargs: &mut Vec<(String, Kwarg)>, key: &str) -> Option<Kwarg> {
    let idx = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(idx).1)
}

fn sink_kwarg(key: &str, value: Option<Kwarg>) -> Result<Option<SinkRef>> {
    match value {
        None => Ok(None),
        Some(Kwarg::Sink(sink)) => Ok(Some(sink)),
        Some(other) => Err(EngineError::InvalidArgument(format!(
            "{key} must be a text sink, not {}",
            other.type_name()
        ))),
    }
}

fn flag_kwarg(key: &str, value: Kwarg) -> Result<bool> {
    match value {
        Kwarg::Value(Value::Bool(flag)) => Ok(flag),
        other => Err(EngineError::InvalidArgument(format!(
            "{key} must be a bool, not {}",
            other.type_name()
        ))),
    }
}

impl CallOptions {
    /// Set the number of requested outputs.
    pub fn nargout(mut self, nargout: usize) -> Self {
        self.nargout = nargout;
        self
    }

    /// Capture printed text.
    pub fn stdout(mut self, sink: SinkRef) -> Self {
        self.stdout = Some(sink);
        self
    }

    /// Capture warnings.
    pub fn stderr(mut self, sink: SinkRef) -> Self {
        self.stderr = Some(sink);
        self
    }

    /// Dispatch without blocking.
    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// Validate a keyword list.
    ///
    /// Recognized keys are `nargout`, `stdout`, `stderr`, `background` and its
    /// legacy alias `async`. Nothing is dispatched when validation fails.
    pub fn from_kwargs<K: Into<String>>(
        kwargs: impl IntoIterator<Item = (K, Kwarg)>,
    ) -> Result<Self> {
        let mut remaining: Vec<(String, Kwarg)> = Vec::new();
        for (key, value) in kwargs {
            let key = key.into();
            if remaining.iter().any(|(k, _)| *k == key) {
                return Err(EngineError::InvalidArgument(format!(
                    "keyword argument '{key}' given more than once"
                )));
            }
            remaining.push((key, value));
        }

        let mut options = CallOptions::default();

        match take(&mut remaining, "nargout") {
            None => {}
            Some(Kwarg::Value(Value::Int(n))) if n >= 0 => {
                options.nargout = usize::try_from(n).map_err(|_| {
                    EngineError::InvalidArgument(format!("nargout {n} is too large"))
                })?;
            }
            Some(Kwarg::Value(Value::Int(n))) => {
                return Err(EngineError::InvalidArgument(format!(
                    "nargout must be greater than or equal to 0, got {n}"
                )));
            }
            Some(other) => {
                return Err(EngineError::InvalidArgument(format!(
                    "nargout must be an int, not {}",
                    other.type_name()
                )));
            }
        }

        options.stdout = sink_kwarg("stdout", take(&mut remaining, "stdout"))?;
        options.stderr = sink_kwarg("stderr", take(&mut remaining, "stderr"))?;

        let legacy = take(&mut remaining, "async");
        let current = take(&mut remaining, "background");
        options.background = match (legacy, current) {
            (Some(_), Some(_)) => {
                return Err(EngineError::ConflictingArguments(
                    "'async' and 'background' cannot both be given; use 'background'".to_string(),
                ));
            }
            (Some(value), None) => flag_kwarg("async", value)?,
            (None, Some(value)) => flag_kwarg("background", value)?,
            (None, None) => false,
        };

        if let Some((key, _)) = remaining.first() {
            return Err(EngineError::InvalidArgument(format!(
                "unexpected keyword argument '{key}'"
            )));
        }
        Ok(options)
    }
}

/// A remote function bound to an engine session.
///
/// [`FunctionProxy::attr`] extends the name with `.`, which is how namespaced
/// functions such as `matlab.internal.engine.getVariable` are reached.
#[derive(Clone)]
pub struct FunctionProxy<'e> {
    engine: &'e EngineHandle,
    name: String,
}

impl<'e> FunctionProxy<'e> {
    pub(crate) fn new(engine: &'e EngineHandle, name: impl Into<String>) -> Self {
        Self {
            engine,
            name: name.into(),
        }
    }

    /// Qualified function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Proxy for `<name>.<part>`.
    pub fn attr(&self, part: &str) -> FunctionProxy<'e> {
        FunctionProxy {
            engine: self.engine,
            name: format!("{}.{part}", self.name),
        }
    }

    /// Blocking call with one output.
    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        self.invoke(args, CallOptions::default())?.resolve()
    }

    /// Call with explicit options; blocks unless `options.background` is set.
    pub fn invoke(&self, args: Vec<Value>, options: CallOptions) -> Result<Dispatched<Value>> {
        let background = options.background;
        let future = self.dispatch(args, options)?;
        if background {
            Ok(Dispatched::Background(FutureResult::new(future)))
        } else {
            future.result(None).map(Dispatched::Ready)
        }
    }

    /// Call with a keyword list validated by [`CallOptions::from_kwargs`].
    pub fn invoke_kwargs<K: Into<String>>(
        &self,
        args: Vec<Value>,
        kwargs: impl IntoIterator<Item = (K, Kwarg)>,
    ) -> Result<Dispatched<Value>> {
        let options = CallOptions::from_kwargs(kwargs)?;
        self.invoke(args, options)
    }

    /// Background call regardless of `options.background`.
    pub fn call_background(
        &self,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<FutureResult<Value>> {
        Ok(FutureResult::new(self.dispatch(args, options)?))
    }

    fn dispatch(&self, args: Vec<Value>, options: CallOptions) -> Result<FevalFuture> {
        self.engine.submit_call(CallRequest {
            function: self.name.clone(),
            nargout: options.nargout,
            args,
            stdout: options.stdout,
            stderr: options.stderr,
        })
    }
}

impl fmt::Debug for FunctionProxy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionProxy")
            .field("engine", &self.engine.id())
            .field("name", &self.name)
            .finish()
    }
}
