//! In-process engine with one serialized executor thread per session.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::api::{
    CallRequest, CallToken, RemoteFailure, RemoteStatus, SessionToken, StartMode, StartOptions,
    Transport, TransportError, failure_ids,
};
use crate::builtins::{Eval, Frame, evaluate};
use crate::value::Value;

const STARTUP_SLICE: Duration = Duration::from_millis(5);

/// Tuning for [`LocalEngine`].
#[derive(Debug, Clone)]
pub struct LocalEngineConfig {
    /// Simulated time a launched session needs before it accepts work.
    pub startup_delay: Duration,
    /// Prefix of boundary-chosen shared session names.
    pub name_prefix: String,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            startup_delay: Duration::ZERO,
            name_prefix: "engine".to_string(),
        }
    }
}

/// Counters describing the traffic a [`LocalEngine`] has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalEngineStats {
    /// Sessions launched.
    pub launches: u64,
    /// Attach requests accepted.
    pub attaches: u64,
    /// Session tokens closed.
    pub closes: u64,
    /// Function calls accepted.
    pub calls: u64,
}

/// In-process [`Transport`].
///
/// Clones share the same sessions, so a caller can keep one to read
/// [`LocalEngine::stats`] after handing another to the session layer.
#[derive(Clone, Default)]
pub struct LocalEngine {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    config: LocalEngineConfig,
    state: Mutex<State>,
    launches: AtomicU64,
    attaches: AtomicU64,
    closes: AtomicU64,
    calls: AtomicU64,
}

#[derive(Default)]
struct State {
    next_id: u64,
    sessions: BTreeMap<u64, Arc<Session>>,
    tokens: HashMap<SessionToken, TokenEntry>,
    slots: HashMap<CallToken, Slot>,
}

struct TokenEntry {
    session: u64,
    owner: bool,
}

struct Slot {
    status: SlotStatus,
    interrupt: Arc<AtomicBool>,
    detached: bool,
}

enum SlotStatus {
    Queued,
    Running,
    Finished(Finished),
}

enum Finished {
    Session(SessionToken),
    Values(Vec<Value>),
    Failed(RemoteFailure),
    Cancelled,
}

struct Session {
    id: u64,
    shared_name: Option<String>,
    alive: AtomicBool,
    queue: Mutex<Queue>,
    wake: Condvar,
}

struct Queue {
    jobs: VecDeque<Job>,
    open: bool,
}

enum Job {
    Attach(CallToken),
    Call(CallToken, CallRequest),
}

impl Job {
    fn token(&self) -> CallToken {
        match self {
            Job::Attach(token) | Job::Call(token, _) => *token,
        }
    }
}

fn terminated() -> RemoteFailure {
    RemoteFailure::new(
        failure_ids::SESSION_TERMINATED,
        "the engine session terminated before the operation ran",
    )
}

fn unknown_token(token: CallToken) -> RemoteFailure {
    RemoteFailure::new(
        failure_ids::UNKNOWN_TOKEN,
        format!("{token} is not known to this engine"),
    )
}

impl Slot {
    fn new(status: SlotStatus) -> Self {
        Self {
            status,
            interrupt: Arc::new(AtomicBool::new(false)),
            detached: false,
        }
    }
}

impl State {
    fn issue_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn find_shared(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions
            .values()
            .find(|s| s.is_alive() && s.shared_name.as_deref() == Some(name))
            .cloned()
    }

    fn session_for(&self, token: SessionToken) -> Option<Arc<Session>> {
        let entry = self.tokens.get(&token)?;
        self.sessions
            .get(&entry.session)
            .filter(|s| s.is_alive())
            .cloned()
    }
}

impl Session {
    fn new(id: u64, shared_name: Option<String>) -> Self {
        Self {
            id,
            shared_name,
            alive: AtomicBool::new(true),
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                open: true,
            }),
            wake: Condvar::new(),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` once the session stopped accepting work.
    fn push(&self, job: Job) -> bool {
        let mut queue = self.lock_queue();
        if !queue.open {
            return false;
        }
        queue.jobs.push_back(job);
        self.wake.notify_one();
        true
    }

    fn next_job(&self) -> Option<Job> {
        let mut queue = self.lock_queue();
        loop {
            if let Some(job) = queue.jobs.pop_front() {
                return Some(job);
            }
            if !queue.open {
                return None;
            }
            queue = self
                .wake
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn close_queue(&self) -> Vec<Job> {
        let mut queue = self.lock_queue();
        queue.open = false;
        self.wake.notify_all();
        queue.jobs.drain(..).collect()
    }
}

impl Shared {
    fn new(config: LocalEngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn interrupt_for(&self, token: CallToken) -> Arc<AtomicBool> {
        self.lock_state()
            .slots
            .get(&token)
            .map(|slot| slot.interrupt.clone())
            .unwrap_or_default()
    }

    /// Move a queued slot to running. `None` when it was cancelled meanwhile.
    fn begin(&self, token: CallToken) -> Option<Arc<AtomicBool>> {
        let mut state = self.lock_state();
        let slot = state.slots.get_mut(&token)?;
        match slot.status {
            SlotStatus::Queued => {
                slot.status = SlotStatus::Running;
                Some(slot.interrupt.clone())
            }
            _ => None,
        }
    }

    fn complete(&self, token: CallToken, finished: Finished) {
        let orphan = {
            let mut state = self.lock_state();
            let Some(slot) = state.slots.get_mut(&token) else {
                return;
            };
            if matches!(slot.status, SlotStatus::Finished(_)) {
                return;
            }
            if slot.detached {
                state.slots.remove(&token);
                match finished {
                    Finished::Session(session) => Some(session),
                    _ => None,
                }
            } else {
                slot.status = SlotStatus::Finished(finished);
                None
            }
        };
        if let Some(session) = orphan {
            debug!(%token, %session, "closing session token nobody collected");
            self.close(session);
        }
    }

    fn issue_session_token(&self, session: u64, owner: bool) -> SessionToken {
        let mut state = self.lock_state();
        let token = SessionToken::from_raw(state.issue_id());
        state.tokens.insert(token, TokenEntry { session, owner });
        token
    }

    fn close(&self, token: SessionToken) {
        let session = {
            let mut state = self.lock_state();
            let Some(entry) = state.tokens.remove(&token) else {
                return;
            };
            self.closes.fetch_add(1, Ordering::Relaxed);
            if !entry.owner {
                debug!(%token, session = entry.session, "detached from shared session");
                return;
            }
            state.sessions.get(&entry.session).cloned()
        };
        if let Some(session) = session {
            self.terminate(&session);
        }
    }

    fn terminate(&self, session: &Session) {
        if !session.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        self.lock_state().sessions.remove(&session.id);
        let abandoned = session.close_queue();
        for job in &abandoned {
            self.complete(job.token(), Finished::Failed(terminated()));
        }
        info!(
            session = session.id,
            shared = session.shared_name.as_deref().unwrap_or("-"),
            abandoned = abandoned.len(),
            "engine session terminated"
        );
    }
}

fn wait_startup(delay: Duration, interrupt: &AtomicBool) -> bool {
    let deadline = Instant::now().checked_add(delay);
    loop {
        if interrupt.load(Ordering::SeqCst) {
            return false;
        }
        let mut nap = STARTUP_SLICE;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            nap = nap.min(deadline - now);
        }
        std::thread::sleep(nap);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn run_session(shared: Arc<Shared>, session: Arc<Session>, startup: CallToken) {
    let interrupt = shared.interrupt_for(startup);
    if !wait_startup(shared.config.startup_delay, &interrupt) {
        shared.terminate(&session);
        shared.complete(startup, Finished::Cancelled);
        return;
    }
    let owner = shared.issue_session_token(session.id, true);
    shared.complete(startup, Finished::Session(owner));
    debug!(session = session.id, %owner, "engine session ready");

    let mut workspace = BTreeMap::new();
    while let Some(job) = session.next_job() {
        match job {
            Job::Attach(token) => {
                if shared.begin(token).is_none() {
                    continue;
                }
                let attached = shared.issue_session_token(session.id, false);
                shared.complete(token, Finished::Session(attached));
            }
            Job::Call(token, request) => {
                let Some(interrupt) = shared.begin(token) else {
                    continue;
                };
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    let mut frame = Frame {
                        workspace: &mut workspace,
                        interrupt: &interrupt,
                        stdout: request.stdout.as_ref(),
                        stderr: request.stderr.as_ref(),
                    };
                    evaluate(&mut frame, &request.function, request.nargout, &request.args)
                }));
                let eval = match outcome {
                    Ok(eval) => eval,
                    Err(payload) => {
                        warn!(
                            session = session.id,
                            call = %token,
                            function = %request.function,
                            "engine executor panicked: {}",
                            panic_message(payload.as_ref())
                        );
                        shared.terminate(&session);
                        shared.complete(token, Finished::Failed(terminated()));
                        break;
                    }
                };
                match eval {
                    Eval::Values(values) => shared.complete(token, Finished::Values(values)),
                    Eval::Failed(failure) => shared.complete(token, Finished::Failed(failure)),
                    Eval::Interrupted => shared.complete(token, Finished::Cancelled),
                    Eval::Terminate => {
                        shared.terminate(&session);
                        shared.complete(token, Finished::Values(Vec::new()));
                    }
                }
            }
        }
    }
    debug!(session = session.id, "session executor stopped");
}

impl LocalEngine {
    /// Create an engine with no sessions.
    pub fn new(config: LocalEngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }

    /// Traffic counters.
    pub fn stats(&self) -> LocalEngineStats {
        let shared = &self.shared;
        LocalEngineStats {
            launches: shared.launches.load(Ordering::Relaxed),
            attaches: shared.attaches.load(Ordering::Relaxed),
            closes: shared.closes.load(Ordering::Relaxed),
            calls: shared.calls.load(Ordering::Relaxed),
        }
    }

    fn launch(&self, share: Option<Option<String>>) -> Result<CallToken, TransportError> {
        let mut state = self.shared.lock_state();
        let session_id = state.issue_id();
        let shared_name = share.map(|name| {
            name.unwrap_or_else(|| {
                format!(
                    "{}_{}_{}",
                    self.shared.config.name_prefix,
                    std::process::id(),
                    session_id
                )
            })
        });
        if let Some(name) = &shared_name {
            if state.find_shared(name).is_some() {
                return Err(TransportError::StartFailure(format!(
                    "a shared session named '{name}' already exists"
                )));
            }
        }
        let session = Arc::new(Session::new(session_id, shared_name));
        let token = CallToken::from_raw(state.issue_id());
        state.slots.insert(token, Slot::new(SlotStatus::Running));
        state.sessions.insert(session_id, session.clone());
        drop(state);

        let shared = self.shared.clone();
        let executor = session.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("engine-session-{session_id}"))
            .spawn(move || run_session(shared, executor, token));
        if let Err(err) = spawned {
            let mut state = self.shared.lock_state();
            state.slots.remove(&token);
            state.sessions.remove(&session_id);
            return Err(TransportError::StartFailure(format!(
                "spawn session executor: {err}"
            )));
        }

        self.shared.launches.fetch_add(1, Ordering::Relaxed);
        info!(
            session = session_id,
            shared = session.shared_name.as_deref().unwrap_or("-"),
            "launching engine session"
        );
        Ok(token)
    }

    fn attach(&self, name: &str) -> Result<CallToken, TransportError> {
        let (session, token) = {
            let mut state = self.shared.lock_state();
            let Some(session) = state.find_shared(name) else {
                return Err(TransportError::StartFailure(format!(
                    "no shared session named '{name}'"
                )));
            };
            let token = CallToken::from_raw(state.issue_id());
            state.slots.insert(token, Slot::new(SlotStatus::Queued));
            (session, token)
        };
        if !session.push(Job::Attach(token)) {
            self.shared.lock_state().slots.remove(&token);
            return Err(TransportError::StartFailure(format!(
                "shared session '{name}' is shutting down"
            )));
        }
        self.shared.attaches.fetch_add(1, Ordering::Relaxed);
        debug!(session = session.id, name, "attaching to shared session");
        Ok(token)
    }
}

impl Transport for LocalEngine {
    fn submit_start(&self, options: &StartOptions) -> Result<CallToken, TransportError> {
        match options.mode() {
            StartMode::Launch { .. } => self.launch(options.share_request()),
            StartMode::Attach { name } => self.attach(name),
        }
    }

    fn poll_start(&self, token: CallToken) -> RemoteStatus<SessionToken> {
        let state = self.shared.lock_state();
        match state.slots.get(&token).map(|slot| &slot.status) {
            None => RemoteStatus::Errored(unknown_token(token)),
            Some(SlotStatus::Queued) => RemoteStatus::Pending,
            Some(SlotStatus::Running) => RemoteStatus::Running,
            Some(SlotStatus::Finished(Finished::Session(session))) => RemoteStatus::Done(*session),
            Some(SlotStatus::Finished(Finished::Failed(failure))) => {
                RemoteStatus::Errored(failure.clone())
            }
            Some(SlotStatus::Finished(Finished::Cancelled)) => RemoteStatus::Cancelled,
            Some(SlotStatus::Finished(Finished::Values(_))) => {
                RemoteStatus::Errored(unknown_token(token))
            }
        }
    }

    fn submit_call(
        &self,
        session: SessionToken,
        request: CallRequest,
    ) -> Result<CallToken, TransportError> {
        if request.function.is_empty() {
            return Err(TransportError::InvalidInput("function name must not be empty"));
        }
        let (target, token) = {
            let mut state = self.shared.lock_state();
            let target = state
                .session_for(session)
                .ok_or(TransportError::SessionTerminated)?;
            let token = CallToken::from_raw(state.issue_id());
            state.slots.insert(token, Slot::new(SlotStatus::Queued));
            (target, token)
        };
        let function = request.function.clone();
        if !target.push(Job::Call(token, request)) {
            self.shared.lock_state().slots.remove(&token);
            return Err(TransportError::SessionTerminated);
        }
        self.shared.calls.fetch_add(1, Ordering::Relaxed);
        debug!(session = target.id, %token, function = %function, "call queued");
        Ok(token)
    }

    fn poll_call(&self, token: CallToken) -> RemoteStatus<Vec<Value>> {
        let state = self.shared.lock_state();
        match state.slots.get(&token).map(|slot| &slot.status) {
            None => RemoteStatus::Errored(unknown_token(token)),
            Some(SlotStatus::Queued) => RemoteStatus::Pending,
            Some(SlotStatus::Running) => RemoteStatus::Running,
            Some(SlotStatus::Finished(Finished::Values(values))) => {
                RemoteStatus::Done(values.clone())
            }
            Some(SlotStatus::Finished(Finished::Failed(failure))) => {
                RemoteStatus::Errored(failure.clone())
            }
            Some(SlotStatus::Finished(Finished::Cancelled)) => RemoteStatus::Cancelled,
            Some(SlotStatus::Finished(Finished::Session(_))) => {
                RemoteStatus::Errored(unknown_token(token))
            }
        }
    }

    fn cancel_request(&self, token: CallToken) -> bool {
        let mut state = self.shared.lock_state();
        let Some(slot) = state.slots.get_mut(&token) else {
            return false;
        };
        match slot.status {
            SlotStatus::Queued => {
                slot.status = SlotStatus::Finished(Finished::Cancelled);
                true
            }
            SlotStatus::Running => {
                slot.interrupt.store(true, Ordering::SeqCst);
                true
            }
            SlotStatus::Finished(_) => false,
        }
    }

    fn release(&self, token: CallToken) {
        let mut state = self.shared.lock_state();
        let Some(slot) = state.slots.get_mut(&token) else {
            return;
        };
        if matches!(slot.status, SlotStatus::Finished(_)) {
            state.slots.remove(&token);
        } else {
            slot.detached = true;
        }
    }

    fn list_shared_sessions(&self) -> Vec<String> {
        self.shared
            .lock_state()
            .sessions
            .values()
            .filter(|s| s.is_alive())
            .filter_map(|s| s.shared_name.clone())
            .collect()
    }

    fn is_alive(&self, session: SessionToken) -> bool {
        self.shared.lock_state().session_for(session).is_some()
    }

    fn close(&self, session: SessionToken) {
        self.shared.close(session);
    }

    fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self
            .shared
            .lock_state()
            .sessions
            .values()
            .cloned()
            .collect();
        if !sessions.is_empty() {
            warn!(count = sessions.len(), "shutting down engine with live sessions");
        }
        for session in sessions {
            self.shared.terminate(&session);
        }
    }
}
