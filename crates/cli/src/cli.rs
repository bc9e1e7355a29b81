use clap::{Args, Parser, Subcommand};

use enginelink_transport::Value;

pub fn default_parallel_calls() -> u16 {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(64) as u16
}

/// `true`/`false`, then integers, then floats; anything else stays text.
pub fn parse_value(input: &str) -> Result<Value, String> {
    match input {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Ok(v) = input.parse::<i64>() {
        return Ok(Value::Int(v));
    }
    if let Ok(v) = input.parse::<f64>() {
        return Ok(Value::Double(v));
    }
    Ok(Value::Text(input.to_string()))
}

fn parse_assignment(input: &str) -> Result<(String, Value), String> {
    let Some((name, raw)) = input.split_once('=') else {
        return Err(format!("expected NAME=VALUE, got {input:?}"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in {input:?}"));
    }
    Ok((name.to_string(), parse_value(raw)?))
}

#[derive(Debug, Clone, Parser)]
#[command(name = "enginelink", version, about = "Run functions in engine sessions")]
pub struct Cli {
    /// Startup option of new sessions (overrides the config file).
    #[arg(
        long,
        global = true,
        env = "ENGINELINK_STARTUP_OPTION",
        allow_hyphen_values = true
    )]
    pub startup_option: Option<String>,

    /// Simulated startup time of the in-process engine.
    #[arg(
        long,
        global = true,
        env = "ENGINELINK_STARTUP_DELAY_MS",
        default_value_t = 0
    )]
    pub startup_delay_ms: u64,

    /// Log filter directives, used when `RUST_LOG` is unset.
    #[arg(long, global = true, env = "ENGINELINK_LOG")]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Call a function in a new or shared session and print its result.
    Call(CallArgs),
    /// List shared sessions that can be connected to.
    List,
    /// Measure call throughput against one session.
    Bench(BenchArgs),
    /// Print the effective client config.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Save it as the client config file.
    #[arg(long, default_value_t = false)]
    pub write: bool,
}

#[derive(Debug, Clone, Args)]
pub struct CallArgs {
    /// Function name, e.g. `sqrt` or `pkg.fn`.
    pub function: String,

    /// Positional arguments.
    #[arg(value_parser = parse_value, allow_negative_numbers = true)]
    pub args: Vec<Value>,

    #[arg(long, default_value_t = 1)]
    pub nargout: usize,

    /// Assign a workspace variable before the call; repeatable.
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    pub set: Vec<(String, Value)>,

    /// Connect to a shared session instead of starting one: any with
    /// `--shared`, a named one with `--shared=NAME`.
    #[arg(long, value_name = "NAME", num_args = 0..=1, require_equals = true)]
    pub shared: Option<Option<String>>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print the result as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct BenchArgs {
    #[arg(long, default_value_t = 1_000)]
    pub calls: usize,

    #[arg(
        short = 'p',
        long,
        default_value_t = default_parallel_calls(),
        value_parser = clap::value_parser!(u16).range(1..=64)
    )]
    pub parallel: u16,
}
