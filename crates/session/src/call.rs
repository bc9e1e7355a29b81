//! One in-flight remote operation and its terminal outcome.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use enginelink_transport::{CallToken, RemoteFailure, RemoteStatus, SessionToken, Transport, Value};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Observable progress of a call.
///
/// Transitions are monotonic: `Pending < Running < {Done, Errored, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Accepted by the engine, not yet executing.
    Pending,
    /// Executing.
    Running,
    /// Finished with a value.
    Done,
    /// Finished with a remote failure.
    Errored,
    /// Interrupted before producing a value.
    Cancelled,
}

impl CallStatus {
    /// Whether the call reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Done | CallStatus::Errored | CallStatus::Cancelled
        )
    }
}

/// What a call does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    /// Launch of, or attach to, a session.
    SessionStart {
        /// Attach to an existing shared session rather than launching.
        attach: bool,
    },
    /// Function evaluation.
    Feval {
        /// Qualified function name.
        function: String,
        /// Requested outputs.
        nargout: usize,
    },
}

/// Output type of a boundary operation, tied to the boundary poll that produces it.
pub(crate) trait RemoteOutput: Clone + Send + 'static {
    fn poll(transport: &dyn Transport, token: CallToken) -> RemoteStatus<Self>;
}

impl RemoteOutput for SessionToken {
    fn poll(transport: &dyn Transport, token: CallToken) -> RemoteStatus<Self> {
        transport.poll_start(token)
    }
}

impl RemoteOutput for Vec<Value> {
    fn poll(transport: &dyn Transport, token: CallToken) -> RemoteStatus<Self> {
        transport.poll_call(token)
    }
}

/// Poll back-off bounds.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PollCadence {
    pub(crate) initial: Duration,
    pub(crate) max: Duration,
}

/// Terminal outcome handed to the owning future.
#[derive(Debug, Clone)]
pub(crate) enum Settled<T> {
    Done(T),
    Errored(RemoteFailure),
    Cancelled,
}

enum Outcome<T> {
    Pending,
    Running,
    Done(T),
    Errored(RemoteFailure),
    Cancelled,
}

impl<T: Clone> Outcome<T> {
    fn status(&self) -> CallStatus {
        match self {
            Outcome::Pending => CallStatus::Pending,
            Outcome::Running => CallStatus::Running,
            Outcome::Done(_) => CallStatus::Done,
            Outcome::Errored(_) => CallStatus::Errored,
            Outcome::Cancelled => CallStatus::Cancelled,
        }
    }

    fn settled(&self) -> Option<Settled<T>> {
        match self {
            Outcome::Pending | Outcome::Running => None,
            Outcome::Done(value) => Some(Settled::Done(value.clone())),
            Outcome::Errored(failure) => Some(Settled::Errored(failure.clone())),
            Outcome::Cancelled => Some(Settled::Cancelled),
        }
    }
}

struct CallState<T> {
    outcome: Outcome<T>,
    released: bool,
}

/// A submitted boundary operation.
///
/// The outcome lives behind one mutex so status and value change together.
/// Polling happens lazily under that mutex, which makes the poller the only
/// writer.
pub(crate) struct Call<T: RemoteOutput> {
    token: CallToken,
    kind: CallKind,
    transport: Arc<dyn Transport>,
    cadence: PollCadence,
    state: Mutex<CallState<T>>,
    settled: Condvar,
}

impl<T: RemoteOutput> Call<T> {
    pub(crate) fn new(
        token: CallToken,
        kind: CallKind,
        transport: Arc<dyn Transport>,
        cadence: PollCadence,
    ) -> Self {
        debug!(call = %token, ?kind, "call dispatched");
        Self {
            token,
            kind,
            transport,
            cadence,
            state: Mutex::new(CallState {
                outcome: Outcome::Pending,
                released: false,
            }),
            settled: Condvar::new(),
        }
    }

    pub(crate) fn kind(&self) -> &CallKind {
        &self.kind
    }

    fn lock(&self) -> MutexGuard<'_, CallState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self, state: &mut CallState<T>) {
        if state.outcome.status().is_terminal() {
            return;
        }
        let remote = T::poll(self.transport.as_ref(), self.token);
        self.advance(state, remote);
    }

    fn advance(&self, state: &mut CallState<T>, remote: RemoteStatus<T>) {
        let before = state.outcome.status();
        let next = match remote {
            RemoteStatus::Pending => return,
            RemoteStatus::Running if before == CallStatus::Pending => Outcome::Running,
            RemoteStatus::Running => return,
            RemoteStatus::Done(value) => Outcome::Done(value),
            RemoteStatus::Errored(failure) => Outcome::Errored(failure),
            RemoteStatus::Cancelled => Outcome::Cancelled,
        };
        state.outcome = next;
        let after = state.outcome.status();
        debug!(call = %self.token, ?before, ?after, "call advanced");

        if after.is_terminal() {
            if !state.released {
                state.released = true;
                self.transport.release(self.token);
            }
            self.settled.notify_all();
        }
    }

    /// Current status, polling the boundary once if not terminal.
    pub(crate) fn status(&self) -> CallStatus {
        let mut state = self.lock();
        self.refresh(&mut state);
        state.outcome.status()
    }

    /// Terminal outcome if already reached, without blocking.
    pub(crate) fn peek(&self) -> Option<Settled<T>> {
        let mut state = self.lock();
        self.refresh(&mut state);
        state.outcome.settled()
    }

    /// Block until terminal or until `timeout` elapses.
    ///
    /// A timeout leaves the call untouched and pollable. A timeout too large
    /// to express as an instant waits without a deadline.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<Settled<T>> {
        let deadline = timeout.and_then(|limit| {
            Instant::now()
                .checked_add(limit)
                .map(|deadline| (limit, deadline))
        });
        let mut interval = self.cadence.initial;
        let mut state = self.lock();
        loop {
            self.refresh(&mut state);
            if let Some(settled) = state.outcome.settled() {
                return Ok(settled);
            }

            let mut nap = interval;
            if let Some((limit, deadline)) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(EngineError::Timeout(limit));
                }
                nap = nap.min(deadline - now);
            }
            state = self
                .settled
                .wait_timeout(state, nap)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            interval = (interval * 2).min(self.cadence.max);
        }
    }

    /// Ask the boundary to interrupt the call. Never blocks on completion.
    pub(crate) fn cancel(&self) -> bool {
        let mut state = self.lock();
        self.refresh(&mut state);
        if state.outcome.status().is_terminal() {
            return false;
        }
        let accepted = self.transport.cancel_request(self.token);
        debug!(call = %self.token, accepted, "cancel requested");
        if accepted {
            self.refresh(&mut state);
        }
        accepted
    }
}

impl<T: RemoteOutput> Drop for Call<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.released {
            state.released = true;
            self.transport.release(self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    fn cadence() -> PollCadence {
        PollCadence {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
        }
    }

    fn feval_call(transport: &Arc<ScriptedTransport>) -> Call<Vec<Value>> {
        let token = CallToken::from_raw(7);
        Call::new(
            token,
            CallKind::Feval {
                function: "sqrt".to_string(),
                nargout: 1,
            },
            transport.clone(),
            cadence(),
        )
    }

    #[test]
    fn status_never_regresses() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script_call(vec![
            RemoteStatus::Running,
            RemoteStatus::Pending,
            RemoteStatus::Running,
            RemoteStatus::Done(vec![Value::Double(2.0)]),
            RemoteStatus::Errored(RemoteFailure::new("x:y", "late")),
        ]);
        let call = feval_call(&transport);

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(call.status());
        }
        assert_eq!(
            seen,
            vec![
                CallStatus::Running,
                CallStatus::Running,
                CallStatus::Running,
                CallStatus::Done,
                CallStatus::Done,
            ]
        );
    }

    #[test]
    fn terminal_state_is_released_once_and_read_repeatedly() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script_call(vec![RemoteStatus::Done(vec![Value::Int(1)])]);
        let call = feval_call(&transport);

        for _ in 0..3 {
            match call.wait(None).unwrap() {
                Settled::Done(values) => assert_eq!(values, vec![Value::Int(1)]),
                other => panic!("unexpected {other:?}"),
            }
        }
        drop(call);
        assert_eq!(transport.released(), vec![CallToken::from_raw(7)]);
    }

    #[test]
    fn timeout_leaves_call_pollable() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script_call(vec![RemoteStatus::Running]);
        let call = feval_call(&transport);

        let err = call.wait(Some(Duration::from_millis(10))).unwrap_err();
        assert_eq!(err, EngineError::Timeout(Duration::from_millis(10)));
        assert_eq!(call.status(), CallStatus::Running);

        transport.script_call(vec![RemoteStatus::Done(vec![])]);
        assert!(matches!(call.wait(None).unwrap(), Settled::Done(_)));
    }

    #[test]
    fn unrepresentable_timeout_waits_without_deadline() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script_call(vec![
            RemoteStatus::Pending,
            RemoteStatus::Running,
            RemoteStatus::Done(vec![Value::Double(2.0)]),
        ]);
        let call = feval_call(&transport);
        match call.wait(Some(Duration::MAX)).unwrap() {
            Settled::Done(values) => assert_eq!(values, vec![Value::Double(2.0)]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancel_of_pending_call_is_confirmed() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script_call(vec![RemoteStatus::Pending]);
        transport.confirm_cancel(true);
        let call = feval_call(&transport);

        assert!(call.cancel());
        assert_eq!(call.status(), CallStatus::Cancelled);
        assert!(!call.cancel(), "terminal calls refuse cancellation");
        assert!(matches!(call.wait(None).unwrap(), Settled::Cancelled));
    }

    #[test]
    fn cancel_of_running_call_is_best_effort() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script_call(vec![RemoteStatus::Running]);
        transport.confirm_cancel(false);
        let call = feval_call(&transport);
        assert_eq!(call.status(), CallStatus::Running);

        assert!(call.cancel());
        assert_eq!(call.status(), CallStatus::Running);

        transport.script_call(vec![RemoteStatus::Done(vec![Value::Int(3)])]);
        assert!(matches!(call.wait(None).unwrap(), Settled::Done(_)));
    }

    #[test]
    fn abandoned_call_is_released_on_drop() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script_call(vec![RemoteStatus::Running]);
        let call = feval_call(&transport);
        assert_eq!(call.kind(), &CallKind::Feval { function: "sqrt".to_string(), nargout: 1 });
        drop(call);
        assert_eq!(transport.released(), vec![CallToken::from_raw(7)]);
    }
}
