//! Client-facing handles over background operations.

use std::fmt;
use std::time::Duration;

use crate::call::CallStatus;
use crate::error::Result;
use crate::future::EngineFuture;

/// Handle to an operation running in the background.
///
/// Dropping it does not cancel the operation: the engine still executes it in
/// order, the outcome is simply discarded.
pub struct FutureResult<T> {
    inner: Box<dyn EngineFuture<Output = T>>,
}

impl<T: Send + 'static> FutureResult<T> {
    pub(crate) fn new(future: impl EngineFuture<Output = T> + 'static) -> Self {
        Self {
            inner: Box::new(future),
        }
    }

    /// Current status.
    pub fn status(&self) -> CallStatus {
        self.inner.status()
    }

    /// Whether the operation reached a final state.
    pub fn done(&self) -> bool {
        self.inner.done()
    }

    /// Block until the operation finishes.
    pub fn result(&self) -> Result<T> {
        self.inner.result(None)
    }

    /// Block for at most `timeout`. On [`crate::EngineError::Timeout`] the
    /// operation keeps running and can be waited on again.
    pub fn result_timeout(&self, timeout: Duration) -> Result<T> {
        self.inner.result(Some(timeout))
    }

    /// Request cancellation; see [`EngineFuture::cancel`].
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Whether the engine confirmed cancellation.
    pub fn cancelled(&self) -> bool {
        self.inner.cancelled()
    }

    /// Await the outcome from async code without blocking the runtime.
    pub async fn wait(self) -> anyhow::Result<T> {
        let outcome = tokio::task::spawn_blocking(move || self.result())
            .await
            .map_err(|err| anyhow::anyhow!("engine wait task failed: {err}"))?;
        Ok(outcome?)
    }
}

impl<T> fmt::Debug for FutureResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureResult").finish_non_exhaustive()
    }
}

/// Outcome of a dispatch that may or may not have run in the background.
#[derive(Debug)]
pub enum Dispatched<T> {
    /// The caller blocked and the value is available.
    Ready(T),
    /// Background dispatch; the operation is still in flight.
    Background(FutureResult<T>),
}

impl<T: Send + 'static> Dispatched<T> {
    /// Value of the operation, blocking on a background future if needed.
    pub fn resolve(self) -> Result<T> {
        match self {
            Dispatched::Ready(value) => Ok(value),
            Dispatched::Background(future) => future.result(),
        }
    }

    /// The background future, if this was a background dispatch.
    pub fn into_future(self) -> Option<FutureResult<T>> {
        match self {
            Dispatched::Ready(_) => None,
            Dispatched::Background(future) => Some(future),
        }
    }

    /// Whether this was a background dispatch.
    pub fn is_background(&self) -> bool {
        matches!(self, Dispatched::Background(_))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use enginelink_transport::{CallToken, RemoteStatus, Value};

    use super::*;
    use crate::EngineError;
    use crate::call::{Call, CallKind, PollCadence};
    use crate::testing::ScriptedTransport;

    struct ValueFuture(Call<Vec<Value>>);

    impl EngineFuture for ValueFuture {
        type Output = Vec<Value>;

        fn status(&self) -> CallStatus {
            self.0.status()
        }

        fn result(&self, timeout: Option<Duration>) -> Result<Vec<Value>> {
            match self.0.wait(timeout)? {
                crate::call::Settled::Done(values) => Ok(values),
                crate::call::Settled::Errored(f) => Err(EngineError::remote(&f)),
                crate::call::Settled::Cancelled => Err(EngineError::Cancelled),
            }
        }

        fn cancel(&self) -> bool {
            self.0.cancel()
        }
    }

    fn future(transport: &Arc<ScriptedTransport>) -> FutureResult<Vec<Value>> {
        let call = Call::new(
            CallToken::from_raw(1),
            CallKind::Feval {
                function: "f".to_string(),
                nargout: 1,
            },
            transport.clone(),
            PollCadence {
                initial: Duration::from_millis(1),
                max: Duration::from_millis(2),
            },
        );
        FutureResult::new(ValueFuture(call))
    }

    #[tokio::test]
    async fn wait_resolves_from_async_code() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script_call(vec![
            RemoteStatus::Pending,
            RemoteStatus::Running,
            RemoteStatus::Done(vec![Value::Int(4)]),
        ]);
        let values = future(&transport).wait().await.unwrap();
        assert_eq!(values, vec![Value::Int(4)]);
    }

    #[tokio::test]
    async fn wait_surfaces_engine_error_kind() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script_call(vec![RemoteStatus::Pending]);
        transport.confirm_cancel(true);
        let fut = future(&transport);
        assert!(fut.cancel());
        assert!(fut.cancelled());

        let err = fut.wait().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<EngineError>().map(EngineError::kind),
            Some(crate::ErrorKind::Cancelled)
        );
    }

    #[test]
    fn ready_dispatch_resolves_without_future() {
        let ready: Dispatched<i32> = Dispatched::Ready(3);
        assert!(!ready.is_background());
        assert_eq!(ready.resolve().unwrap(), 3);
    }
}
