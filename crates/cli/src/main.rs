mod bench;
mod cli;
mod format;
mod run;
mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use enginelink_core::load_client_config;
use enginelink_session::{SessionConfig, SessionRegistry};
use enginelink_transport::{LocalEngine, LocalEngineConfig};

use crate::bench::run_benchmark;
use crate::cli::{Cli, Command};
use crate::run::{run_call, run_config, run_list};

fn init_tracing(filter: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter.unwrap_or("warn")))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config = match load_client_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("warning: failed to read client config: {err:#}");
            None
        }
    };

    let log_filter = cli
        .log_filter
        .clone()
        .or_else(|| file_config.as_ref().and_then(|cfg| cfg.log_filter.clone()));
    init_tracing(log_filter.as_deref());

    let mut config = file_config
        .as_ref()
        .map(SessionConfig::from)
        .unwrap_or_default();
    if let Some(option) = &cli.startup_option {
        config.startup_option = option.clone();
    }

    let engine = LocalEngine::new(LocalEngineConfig {
        startup_delay: Duration::from_millis(cli.startup_delay_ms),
        ..LocalEngineConfig::default()
    });
    if SessionRegistry::install_global(SessionRegistry::new(Arc::new(engine), config)).is_err() {
        anyhow::bail!("session registry was already initialized");
    }
    let registry = SessionRegistry::global();

    let outcome = match cli.command {
        Command::Call(args) => run_call(registry, args).await,
        Command::List => {
            run_list(registry);
            Ok(())
        }
        Command::Config(args) => run_config(registry, log_filter, args.write),
        Command::Bench(args) => {
            let parallel = args.parallel as usize;
            tokio::task::spawn_blocking(move || run_benchmark(registry, args.calls, parallel))
                .await
                .map_err(|err| anyhow::anyhow!("benchmark task failed: {err}"))
                .and_then(|res| res)
        }
    };

    registry.teardown();
    outcome
}
