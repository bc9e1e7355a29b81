use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::Context;

use enginelink_session::{Dispatched, SessionRegistry, Value};

use crate::format::{format_duration, format_number};

const BENCH_FUNCTION: &str = "sqrt";
const BENCH_INPUT: f64 = 2.0;
const WARMUP_CALLS: usize = 16;

pub fn run_benchmark(
    registry: &SessionRegistry,
    calls: usize,
    parallel: usize,
) -> anyhow::Result<()> {
    let parallel = parallel.max(1);

    let handle = registry
        .start_session(None, false)
        .and_then(Dispatched::resolve)
        .context("start benchmark session")?;

    for _ in 0..WARMUP_CALLS {
        let out = handle
            .function(BENCH_FUNCTION)
            .call(vec![Value::Double(BENCH_INPUT)])
            .context("warmup call")?;
        validate_output(&out)?;
    }

    println!("Benchmark function: {BENCH_FUNCTION}");
    println!("Parallel callers: {}", format_number(parallel as u64));
    println!("Total calls: {}", format_number(calls as u64));

    let next_task = Arc::new(AtomicUsize::new(0));
    let started_at = Instant::now();
    let mut workers = Vec::with_capacity(parallel);
    for _worker in 0..parallel {
        let next_task = next_task.clone();
        let handle = handle.clone();

        workers.push(thread::spawn(move || -> anyhow::Result<()> {
            loop {
                let task_idx = next_task.fetch_add(1, Ordering::Relaxed);
                if task_idx >= calls {
                    break;
                }
                let out = handle
                    .function(BENCH_FUNCTION)
                    .call(vec![Value::Double(BENCH_INPUT)])
                    .with_context(|| format!("bench call {task_idx}"))?;
                validate_output(&out)?;
            }
            Ok(())
        }));
    }

    let mut outcome = Ok(());
    for worker in workers {
        let res = match worker.join() {
            Ok(res) => res,
            Err(_) => Err(anyhow::anyhow!("benchmark worker thread panicked")),
        };
        if outcome.is_ok() {
            outcome = res;
        }
    }
    let duration = started_at.elapsed();
    handle.exit();
    outcome?;

    let calls_per_sec = (calls as f64) / duration.as_secs_f64().max(f64::EPSILON);
    println!("Duration: {}", format_duration(duration));
    println!("Throughput: {calls_per_sec:.2} calls/s");
    Ok(())
}

fn validate_output(out: &Value) -> anyhow::Result<()> {
    let Some(root) = out.as_f64() else {
        anyhow::bail!("unexpected {} output", out.type_name());
    };
    if (root * root - BENCH_INPUT).abs() > 1e-9 {
        anyhow::bail!("output mismatch: {root}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use enginelink_session::SessionConfig;
    use enginelink_transport::{LocalEngine, LocalEngineConfig};

    use super::*;

    #[test]
    fn validate_output_checks_type_and_value() {
        assert!(validate_output(&Value::Double(BENCH_INPUT.sqrt())).is_ok());
        assert!(validate_output(&Value::Double(1.5)).is_err());
        assert!(validate_output(&Value::from("1.41")).is_err());
    }

    #[test]
    fn benchmark_runs_against_one_session() {
        let engine = LocalEngine::new(LocalEngineConfig::default());
        let registry = SessionRegistry::new(
            Arc::new(engine.clone()),
            SessionConfig {
                poll_interval: Duration::from_millis(1),
                ..SessionConfig::default()
            },
        );
        run_benchmark(&registry, 20, 3).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.launches, 1);
        assert_eq!(stats.calls, (20 + WARMUP_CALLS) as u64);
        assert_eq!(stats.closes, 1);
    }
}
