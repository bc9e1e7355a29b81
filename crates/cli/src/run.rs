use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, info};

use enginelink_core::{ClientConfig, client_config_path, save_client_config};
use enginelink_session::{CallOptions, Dispatched, EngineHandle, FutureResult, SessionRegistry};

use crate::cli::CallArgs;
use crate::format::{format_duration, format_value};
use crate::shutdown::{ShutdownController, ShutdownEvent, spawn_ctrl_c_handler};

pub async fn run_call(registry: &SessionRegistry, args: CallArgs) -> anyhow::Result<()> {
    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown, shutdown_tx);

    let dispatched = match &args.shared {
        None => registry.start_session(None, true),
        Some(name) => registry.connect_shared(name.as_deref(), true),
    }
    .context("start engine session")?;
    let handle: EngineHandle = match dispatched {
        Dispatched::Ready(handle) => handle,
        Dispatched::Background(future) => wait_interruptible(future, &mut shutdown_rx, None)
            .await
            .context("start engine session")?,
    };
    info!(handle = %handle.id(), "engine session ready");

    let outcome = call_in_session(&handle, args, &mut shutdown_rx).await;
    handle.exit();
    outcome
}

async fn call_in_session(
    handle: &EngineHandle,
    args: CallArgs,
    shutdown_rx: &mut mpsc::UnboundedReceiver<ShutdownEvent>,
) -> anyhow::Result<()> {
    if !args.set.is_empty() {
        let session = handle.clone();
        let assignments = args.set;
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            for (name, value) in assignments {
                session
                    .workspace()
                    .set(&name, value)
                    .with_context(|| format!("assign {name}"))?;
            }
            Ok(())
        })
        .await
        .map_err(|err| anyhow::anyhow!("assignment task failed: {err}"))??;
    }

    let timeout = args.timeout_ms.map(Duration::from_millis);
    let started_at = Instant::now();
    let future = handle
        .function(&args.function)
        .call_background(args.args, CallOptions::default().nargout(args.nargout))
        .with_context(|| format!("call {}", args.function))?;
    let value = wait_interruptible(future, shutdown_rx, timeout)
        .await
        .with_context(|| format!("call {}", args.function))?;
    info!(
        function = %args.function,
        elapsed = %format_duration(started_at.elapsed()),
        "call finished"
    );

    if args.json {
        let encoded = serde_json::to_string_pretty(&value).context("encode result")?;
        println!("{encoded}");
    } else if let Some(text) = format_value(&value) {
        println!("{text}");
    }
    Ok(())
}

/// Wait for `future`, cancelling it on the first CTRL+C and leaving on the second.
async fn wait_interruptible<T: Send + 'static>(
    future: FutureResult<T>,
    shutdown_rx: &mut mpsc::UnboundedReceiver<ShutdownEvent>,
    timeout: Option<Duration>,
) -> anyhow::Result<T> {
    let future = Arc::new(future);
    let waiter = future.clone();
    let mut wait = tokio::task::spawn_blocking(move || match timeout {
        Some(limit) => waiter.result_timeout(limit),
        None => waiter.result(),
    });

    let mut signals_open = true;
    loop {
        tokio::select! {
            joined = &mut wait => {
                let outcome = joined.map_err(|err| anyhow::anyhow!("engine wait task failed: {err}"))?;
                return Ok(outcome?);
            }
            event = shutdown_rx.recv(), if signals_open => match event {
                Some(ShutdownEvent::Cancel) => {
                    eprintln!("cancelling the running call (press CTRL+C again to exit now)");
                    if !future.cancel() {
                        debug!("call finished before it could be cancelled");
                    }
                }
                Some(ShutdownEvent::Immediate) => {
                    eprintln!("exiting without waiting for the engine");
                    std::process::exit(130);
                }
                None => signals_open = false,
            }
        }
    }
}

pub fn run_list(registry: &SessionRegistry) {
    let names = registry.list_shared_sessions();
    if names.is_empty() {
        println!("no shared sessions");
        return;
    }
    for name in names {
        println!("{name}");
    }
}

pub fn run_config(
    registry: &SessionRegistry,
    log_filter: Option<String>,
    write: bool,
) -> anyhow::Result<()> {
    let cfg = effective_config(registry, log_filter);
    let encoded = serde_json::to_string_pretty(&cfg).context("encode client config")?;
    println!("{encoded}");
    if write {
        save_client_config(&cfg).context("save client config")?;
        eprintln!("saved {}", client_config_path()?.display());
    }
    Ok(())
}

fn effective_config(registry: &SessionRegistry, log_filter: Option<String>) -> ClientConfig {
    ClientConfig {
        log_filter,
        ..ClientConfig::from(registry.config())
    }
}

#[cfg(test)]
mod tests {
    use enginelink_session::Value;
    use enginelink_transport::{LocalEngine, LocalEngineConfig};

    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            Arc::new(LocalEngine::new(LocalEngineConfig::default())),
            enginelink_session::SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn wait_returns_call_value() {
        let registry = registry();
        let handle = registry
            .start_session(None, false)
            .and_then(Dispatched::resolve)
            .unwrap();
        let future = handle
            .function("plus")
            .call_background(vec![Value::Int(2), Value::Int(3)], CallOptions::default())
            .unwrap();
        let (_tx, mut rx) = mpsc::unbounded_channel();
        let value = wait_interruptible(future, &mut rx, None).await.unwrap();
        assert_eq!(value, Value::Int(5));
        registry.teardown();
    }

    #[tokio::test]
    async fn first_interrupt_cancels_the_call() {
        let registry = registry();
        let handle = registry
            .start_session(None, false)
            .and_then(Dispatched::resolve)
            .unwrap();
        let future = handle
            .function("pause")
            .call_background(vec![Value::Double(30.0)], CallOptions::default().nargout(0))
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ShutdownEvent::Cancel).unwrap();
        let err = wait_interruptible(future, &mut rx, None).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<enginelink_session::EngineError>()
                .map(enginelink_session::EngineError::kind),
            Some(enginelink_session::ErrorKind::Cancelled)
        );
        assert!(handle.is_live());
        registry.teardown();
    }

    #[tokio::test]
    async fn closed_signal_channel_does_not_end_the_wait() {
        let registry = registry();
        let handle = registry
            .start_session(None, false)
            .and_then(Dispatched::resolve)
            .unwrap();
        let future = handle
            .function("sqrt")
            .call_background(vec![Value::Int(9)], CallOptions::default())
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<ShutdownEvent>();
        drop(tx);
        let value = wait_interruptible(future, &mut rx, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(value, Value::Double(3.0));
        registry.teardown();
    }

    #[test]
    fn effective_config_reflects_registry_settings() {
        let registry = SessionRegistry::new(
            Arc::new(LocalEngine::new(LocalEngineConfig::default())),
            enginelink_session::SessionConfig {
                startup_option: "-nojvm".to_string(),
                poll_interval: Duration::ZERO,
                ..enginelink_session::SessionConfig::default()
            },
        );
        let cfg = effective_config(&registry, Some("debug".to_string()));
        assert_eq!(cfg.startup_option, "-nojvm");
        assert_eq!(
            cfg.poll_interval_ms,
            enginelink_core::DEFAULT_POLL_INTERVAL_MS
        );
        assert_eq!(cfg.log_filter.as_deref(), Some("debug"));
    }
}
