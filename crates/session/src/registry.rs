//! Process-wide bookkeeping of engine sessions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use enginelink_transport::{
    CallToken, LocalEngine, SessionToken, StartOptions, Transport, TransportError,
};
use tracing::{debug, info, warn};

use crate::api::SessionConfig;
use crate::call::{Call, CallKind, PollCadence};
use crate::error::{EngineError, Result};
use crate::exit_hook;
use crate::future::{EngineFuture, SessionStartFuture};
use crate::future_result::{Dispatched, FutureResult};
use crate::handle::{EngineHandle, HandleId};

static GLOBAL: OnceLock<SessionRegistry> = OnceLock::new();

/// Shared state behind a [`SessionRegistry`] and its handles.
pub(crate) struct RegistryInner {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    /// Guards only the find-or-launch decision of [`SessionRegistry::resolve_shared`].
    /// Not reentrant: nothing under it calls back into the registry.
    launch_lock: Mutex<()>,
    live: Mutex<BTreeMap<HandleId, SessionToken>>,
    next_id: AtomicU64,
    torn_down: AtomicBool,
}

impl RegistryInner {
    fn lock_live(&self) -> MutexGuard<'_, BTreeMap<HandleId, SessionToken>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn cadence(&self) -> PollCadence {
        PollCadence {
            initial: self.config.poll_interval,
            max: self.config.max_poll_interval,
        }
    }

    pub(crate) fn token_of(&self, id: HandleId) -> Option<SessionToken> {
        self.lock_live().get(&id).copied()
    }

    /// Close the session of `id` if it is still registered. Runs the boundary
    /// close at most once per handle.
    pub(crate) fn release(&self, id: HandleId) {
        let token = self.lock_live().remove(&id);
        if let Some(token) = token {
            info!(handle = %id, session = %token, "closing engine session");
            self.transport.close(token);
        }
    }
}

/// Registry of engine sessions.
///
/// Tests build independent registries with [`SessionRegistry::new`]; the
/// process-wide one is reached through [`SessionRegistry::global`].
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Registry over `transport`. Zero intervals and empty shared startup
    /// options in `config` are replaced by defaults.
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                config: config.normalized(),
                launch_lock: Mutex::new(()),
                live: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    /// The process-wide registry, created on first use from the on-disk
    /// client config with an in-process engine.
    pub fn global() -> &'static SessionRegistry {
        let registry = GLOBAL.get_or_init(|| {
            let config = match enginelink_core::load_client_config() {
                Ok(Some(cfg)) => SessionConfig::from(&cfg),
                Ok(None) => SessionConfig::default(),
                Err(err) => {
                    warn!("failed to read client config, using defaults: {err:#}");
                    SessionConfig::default()
                }
            };
            SessionRegistry::new(Arc::new(LocalEngine::default()), config)
        });
        exit_hook::install();
        registry
    }

    /// Make `registry` the process-wide registry. Fails, returning it, if one
    /// was already initialized.
    pub fn install_global(registry: SessionRegistry) -> std::result::Result<(), SessionRegistry> {
        GLOBAL.set(registry)?;
        exit_hook::install();
        Ok(())
    }

    /// Effective configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Start a new, unshared session with `option` (the configured startup
    /// option when `None`).
    pub fn start_session(
        &self,
        option: Option<&str>,
        background: bool,
    ) -> Result<Dispatched<EngineHandle>> {
        let option = option.unwrap_or(&self.inner.config.startup_option);
        let future = self.dispatch_start(StartOptions::launch(option))?;
        Self::finish(future, background)
    }

    /// Connect to the shared session `name`, or to any shared session when
    /// `name` is `None` (launching one if none exists).
    pub fn connect_shared(
        &self,
        name: Option<&str>,
        background: bool,
    ) -> Result<Dispatched<EngineHandle>> {
        let future = self.resolve_shared(name)?;
        Self::finish(future, background)
    }

    /// Dispatch the start that [`SessionRegistry::connect_shared`] resolves.
    ///
    /// Without a name, concurrent callers are serialized until the start is
    /// dispatched (not until it completes), so at most one of them launches
    /// and the others attach to the session it publishes. The first name the
    /// engine lists wins when several shared sessions exist.
    pub fn resolve_shared(&self, name: Option<&str>) -> Result<SessionStartFuture> {
        if let Some(name) = name {
            return self.dispatch_start(StartOptions::attach(name));
        }

        let _decision = self
            .inner
            .launch_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let existing = self.inner.transport.list_shared_sessions();
        match existing.first() {
            Some(name) => {
                debug!(name = %name, found = existing.len(), "attaching to shared session");
                self.dispatch_start(StartOptions::attach(name.as_str()))
            }
            None => {
                debug!("no shared session found, launching one");
                self.dispatch_start(StartOptions::launch(
                    &self.inner.config.shared_startup_option,
                ))
            }
        }
    }

    /// Names of the shared sessions that can be attached, in engine order.
    pub fn list_shared_sessions(&self) -> Vec<String> {
        self.inner.transport.list_shared_sessions()
    }

    /// Number of handles whose session is still registered.
    pub fn live_sessions(&self) -> usize {
        self.inner.lock_live().len()
    }

    /// Whether [`SessionRegistry::teardown`] ran.
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// Close every registered session and release the transport.
    ///
    /// Runs once; later calls return immediately. New starts fail afterwards.
    pub fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained = std::mem::take(&mut *self.inner.lock_live());
        info!(sessions = drained.len(), "tearing down session registry");
        for (id, token) in drained {
            debug!(handle = %id, session = %token, "closing engine session");
            self.inner.transport.close(token);
        }
        self.inner.transport.shutdown();
    }

    fn finish(
        future: SessionStartFuture,
        background: bool,
    ) -> Result<Dispatched<EngineHandle>> {
        if background {
            Ok(Dispatched::Background(FutureResult::new(future)))
        } else {
            future.result(None).map(Dispatched::Ready)
        }
    }

    fn dispatch_start(&self, options: StartOptions) -> Result<SessionStartFuture> {
        if self.is_torn_down() {
            return Err(torn_down());
        }
        let token: CallToken = self
            .inner
            .transport
            .submit_start(&options)
            .map_err(|err| match err {
                TransportError::StartFailure(message) => EngineError::StartFailure(message),
                other => EngineError::StartFailure(other.to_string()),
            })?;
        let call = Call::new(
            token,
            CallKind::SessionStart {
                attach: options.is_attach(),
            },
            self.inner.transport.clone(),
            self.inner.cadence(),
        );
        Ok(SessionStartFuture::new(call, self.clone()))
    }

    /// Register a started session and hand out its handle.
    pub(crate) fn adopt(&self, token: SessionToken) -> Result<EngineHandle> {
        let mut live = self.inner.lock_live();
        if self.is_torn_down() {
            drop(live);
            self.inner.transport.close(token);
            return Err(torn_down());
        }
        let id = HandleId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        live.insert(id, token);
        drop(live);
        info!(handle = %id, session = %token, "engine session ready");
        Ok(EngineHandle::new(id, self.inner.clone()))
    }

    pub(crate) fn close_unadopted(&self, token: SessionToken) {
        self.inner.transport.close(token);
    }
}

fn torn_down() -> EngineError {
    EngineError::StartFailure("the session registry has been torn down".to_string())
}

/// Tear down the process-wide registry if it was ever created.
#[cfg(unix)]
pub(crate) fn teardown_global() {
    if let Some(registry) = GLOBAL.get() {
        registry.teardown();
    }
}
