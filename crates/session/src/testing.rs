//! Deterministic transport for state-machine tests.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use enginelink_transport::{
    CallRequest, CallToken, RemoteStatus, SessionToken, StartOptions, Transport, TransportError,
    Value,
};

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<Script>,
}

#[derive(Default)]
struct Script {
    call_statuses: VecDeque<RemoteStatus<Vec<Value>>>,
    start_statuses: VecDeque<RemoteStatus<SessionToken>>,
    confirm_cancel: bool,
    shared: Vec<String>,
    next_token: u64,
    starts: Vec<StartOptions>,
    calls: Vec<CallRequest>,
    released: Vec<CallToken>,
    closed: Vec<SessionToken>,
    dead: HashSet<SessionToken>,
}

/// The last scripted status repeats forever.
fn next_status<T: Clone>(queue: &mut VecDeque<RemoteStatus<T>>) -> Option<RemoteStatus<T>> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl ScriptedTransport {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn script_call(&self, statuses: Vec<RemoteStatus<Vec<Value>>>) {
        self.lock().call_statuses = statuses.into();
    }

    pub(crate) fn script_start(&self, statuses: Vec<RemoteStatus<SessionToken>>) {
        self.lock().start_statuses = statuses.into();
    }

    pub(crate) fn confirm_cancel(&self, confirm: bool) {
        self.lock().confirm_cancel = confirm;
    }

    pub(crate) fn set_shared(&self, names: &[&str]) {
        self.lock().shared = names.iter().map(|s| s.to_string()).collect();
    }

    pub(crate) fn kill(&self, session: SessionToken) {
        self.lock().dead.insert(session);
    }

    pub(crate) fn starts(&self) -> Vec<StartOptions> {
        self.lock().starts.clone()
    }

    pub(crate) fn calls(&self) -> Vec<CallRequest> {
        self.lock().calls.clone()
    }

    pub(crate) fn released(&self) -> Vec<CallToken> {
        self.lock().released.clone()
    }

    pub(crate) fn closed(&self) -> Vec<SessionToken> {
        self.lock().closed.clone()
    }
}

impl Transport for ScriptedTransport {
    fn submit_start(&self, options: &StartOptions) -> Result<CallToken, TransportError> {
        let mut script = self.lock();
        script.next_token += 1;
        script.starts.push(options.clone());
        Ok(CallToken::from_raw(script.next_token))
    }

    fn poll_start(&self, token: CallToken) -> RemoteStatus<SessionToken> {
        next_status(&mut self.lock().start_statuses)
            .unwrap_or(RemoteStatus::Done(SessionToken::from_raw(token.raw())))
    }

    fn submit_call(
        &self,
        session: SessionToken,
        request: CallRequest,
    ) -> Result<CallToken, TransportError> {
        let mut script = self.lock();
        if script.dead.contains(&session) || script.closed.contains(&session) {
            return Err(TransportError::SessionTerminated);
        }
        script.next_token += 1;
        script.calls.push(request);
        Ok(CallToken::from_raw(script.next_token))
    }

    fn poll_call(&self, _token: CallToken) -> RemoteStatus<Vec<Value>> {
        next_status(&mut self.lock().call_statuses).unwrap_or(RemoteStatus::Pending)
    }

    fn cancel_request(&self, _token: CallToken) -> bool {
        let mut script = self.lock();
        if script.confirm_cancel {
            script.call_statuses = VecDeque::from([RemoteStatus::Cancelled]);
            script.start_statuses = VecDeque::from([RemoteStatus::Cancelled]);
        }
        true
    }

    fn release(&self, token: CallToken) {
        self.lock().released.push(token);
    }

    fn list_shared_sessions(&self) -> Vec<String> {
        self.lock().shared.clone()
    }

    fn is_alive(&self, session: SessionToken) -> bool {
        let script = self.lock();
        !script.dead.contains(&session) && !script.closed.contains(&session)
    }

    fn close(&self, session: SessionToken) {
        self.lock().closed.push(session);
    }
}
