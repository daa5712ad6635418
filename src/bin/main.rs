//! envproxy CLI - drive built-in environments through a worker proxy
//!
//! Usage:
//!   envproxy run --env <name> [--strategy <strategy>] [--steps <n>] [--action <a>] [--copies <n>]
//!   envproxy list
//!   envproxy worker --env <name> [--poll-interval-ms <ms>]
//!
//! Examples:
//!   envproxy run --env counter --strategy process --steps 3 --action 4
//!   envproxy run --env counter --strategy thread --copies 4
//!   envproxy list

use clap::{Parser, Subcommand, ValueEnum};
use envproxy::config::{init_logging, Settings};
use envproxy::envs::builtin_registry;
use envproxy::handle::EnvFactory;
use envproxy::worker::{serve_stdio, EnvProxy, ExecutionStrategy, WorkerExit, WorkerResult};
use futures::future::try_join_all;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::runtime::{self, Runtime};

#[derive(Parser)]
#[command(name = "envproxy")]
#[command(about = "envproxy - Run environments inline, on a worker task, or in a worker process")]
#[command(version)]
struct Cli {
    /// Path to a settings file (defaults to the usual search locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Step environments through a proxy and print each result as JSON
    Run {
        /// Name of a registered environment
        #[arg(short, long, default_value = "counter")]
        env: String,

        /// Execution strategy (defaults to the configured one)
        #[arg(short, long)]
        strategy: Option<StrategyArg>,

        /// Number of steps after the reset
        #[arg(long, default_value_t = 3)]
        steps: usize,

        /// Action passed to every step, as JSON
        #[arg(short, long, default_value = "1")]
        action: String,

        /// Number of proxies stepped side by side
        #[arg(long, default_value_t = 1)]
        copies: usize,
    },

    /// List registered environments
    List,

    /// Serve an environment over stdin/stdout (launched by isolated proxies)
    Worker {
        /// Name of a registered environment
        #[arg(short, long)]
        env: String,

        /// Milliseconds between interrupt checks while idle
        #[arg(long, default_value_t = 100)]
        poll_interval_ms: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Call the environment directly
    #[value(alias = "none")]
    Inline,
    /// Run a worker on a task in this process
    #[value(alias = "thread")]
    SharedProcess,
    /// Run a worker in a child process
    #[value(alias = "process")]
    IsolatedProcess,
}

impl From<StrategyArg> for ExecutionStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Inline => ExecutionStrategy::Inline,
            StrategyArg::SharedProcess => ExecutionStrategy::SharedProcess,
            StrategyArg::IsolatedProcess => ExecutionStrategy::IsolatedProcess,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&settings.logging);

    match cli.command {
        Commands::Run {
            env,
            strategy,
            steps,
            action,
            copies,
        } => cmd_run(settings, env, strategy, steps, action, copies),
        Commands::List => cmd_list(),
        Commands::Worker {
            env,
            poll_interval_ms,
        } => cmd_worker(env, poll_interval_ms),
    }
}

fn build_runtime() -> Option<Runtime> {
    match runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => Some(rt),
        Err(e) => {
            eprintln!("Error starting async runtime: {}", e);
            None
        }
    }
}

fn cmd_run(
    mut settings: Settings,
    env: String,
    strategy: Option<StrategyArg>,
    steps: usize,
    action: String,
    copies: usize,
) -> ExitCode {
    let factory = match builtin_registry().get(&env) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let action: Value = match serde_json::from_str(&action) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error parsing action '{}': {}", action, e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(strategy) = strategy {
        settings.worker.strategy = strategy.into();
    }

    let Some(rt) = build_runtime() else {
        return ExitCode::FAILURE;
    };

    match rt.block_on(run_copies(factory, &settings, steps, action, copies.max(1))) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_raised() => {
            eprintln!("Environment `{}` failed:\n{}", env, e);
            ExitCode::FAILURE
        }
        Err(e) if e.is_worker_crashed() => {
            eprintln!("Error: {} while running `{}`", e, env);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_copies(
    factory: EnvFactory,
    settings: &Settings,
    steps: usize,
    action: Value,
    copies: usize,
) -> WorkerResult<()> {
    let mut proxies = Vec::with_capacity(copies);
    for _ in 0..copies {
        proxies.push(EnvProxy::spawn_with_settings(factory.clone(), settings).await?);
    }

    let outcome = drive(&mut proxies, steps, &action).await;

    for proxy in &mut proxies {
        proxy.close().await?;
    }
    outcome
}

/// Reset and step every proxy in lockstep, issuing each round before
/// collecting any of its results.
async fn drive(proxies: &mut [EnvProxy], steps: usize, action: &Value) -> WorkerResult<()> {
    let pending = proxies
        .iter_mut()
        .map(|proxy| proxy.reset_deferred())
        .collect::<WorkerResult<Vec<_>>>()?;
    let observations = try_join_all(pending.into_iter().map(|p| p.resolve())).await?;
    for (copy, observation) in observations.into_iter().enumerate() {
        println!("{}", json!({ "copy": copy, "reset": observation }));
    }

    for step in 1..=steps {
        let pending = proxies
            .iter_mut()
            .map(|proxy| proxy.step_deferred(action))
            .collect::<WorkerResult<Vec<_>>>()?;
        let results = try_join_all(pending.into_iter().map(|p| p.resolve())).await?;
        for (copy, result) in results.into_iter().enumerate() {
            println!("{}", json!({ "copy": copy, "step": step, "result": result }));
        }
    }
    Ok(())
}

fn cmd_list() -> ExitCode {
    let registry = builtin_registry();

    println!("Environments:");
    for name in registry.names() {
        println!("  - {}", name);
    }

    ExitCode::SUCCESS
}

fn cmd_worker(env: String, poll_interval_ms: u64) -> ExitCode {
    // An unknown name still gets a worker, so the controller sees the failure
    // as an exception on its first request.
    let factory = builtin_registry()
        .get(&env)
        .unwrap_or_else(|e| EnvFactory::failing(env.as_str(), e));

    let Some(rt) = build_runtime() else {
        return ExitCode::FAILURE;
    };

    let poll_interval = Duration::from_millis(poll_interval_ms.max(1));
    let exit = rt.block_on(serve_stdio(factory, poll_interval));

    // A blocked stdin read would otherwise hold up runtime shutdown.
    rt.shutdown_background();

    match exit {
        WorkerExit::Closed | WorkerExit::Disconnected | WorkerExit::Interrupted => ExitCode::SUCCESS,
        WorkerExit::Failed | WorkerExit::ProtocolViolation => ExitCode::FAILURE,
    }
}
