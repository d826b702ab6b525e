use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use conv_checkpoint::Resolution;
use conv_exec::Interrupt;
use conv_runner::{failure_record, Harness, RunOptions, RunOutcome};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conv", version, about = "Run code-conversion scenarios against a pinned read-only source")]
struct Cli {
    /// Harness root holding `scenarios/`, `runs/` and an optional `conv.toml` (default: current dir)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Debug-level logging unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    scenario: String,
    /// Wipe the target and discard any resumable run
    #[arg(long)]
    force_clean: bool,
    /// Keep existing target contents on a fresh run
    #[arg(long)]
    keep_target: bool,
    /// Replay the scenario's recorded backend responses
    #[arg(long)]
    no_ai: bool,
    /// Interrupt the run after this many seconds
    #[arg(long, value_name = "SECONDS", value_parser = parse_seconds)]
    interrupt_after: Option<Duration>,
    /// Overwrite the scenario's expected/ tree with this run's output
    #[arg(long)]
    update_golden: bool,
    #[arg(long)]
    auto_approve_checkpoints: bool,
    /// Re-realize after a pass and fail on any target change
    #[arg(long)]
    idempotency_check: bool,
}

#[derive(Args)]
struct ResolveArgs {
    #[arg(long)]
    scenario: String,
    /// Checkpoint id; defaults to the run's open checkpoint
    #[arg(long)]
    checkpoint: Option<String>,
    #[arg(long)]
    reason: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run (or resume) a scenario through the conversion pipeline
    Run(RunArgs),

    /// List scenarios
    List,

    /// Show the latest run of a scenario
    Status {
        #[arg(long)]
        scenario: String,
        /// Print the persisted run state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Approve the pending checkpoint
    Approve(ResolveArgs),

    /// Reject the pending checkpoint; the run fails and the target is left as is
    Reject(ResolveArgs),

    /// Approve the pending checkpoint despite its risk, with a recorded reason
    Override(ResolveArgs),
}

/// Non-negative, finite seconds that fit a `Duration`.
fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw.trim().parse().map_err(|e| format!("{raw:?} is not a number of seconds: {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{raw:?} is not a usable duration: {e}"))
}

fn init_tracing(verbose: bool) {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(if verbose { "debug" } else { "info" }),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let root = match cli.root {
        Some(r) => r,
        None => std::env::current_dir()?,
    };

    let code = match cli.cmd {
        Command::Run(args) => run(root, args).await,
        Command::List => {
            let h = Harness::open(root)?;
            for name in h.list() {
                println!("{name}");
            }
            0
        }
        Command::Status { scenario, json } => {
            let h = Harness::open(root)?;
            match h.status(&scenario) {
                Ok(Some(run)) if json => {
                    println!("{}", serde_json::to_string_pretty(&run)?);
                    0
                }
                Ok(Some(run)) => {
                    println!("{} run {}: {:?}", run.scenario, run.run_label, run.status);
                    for st in &run.stages {
                        println!("  {:<17} {:?}", st.stage.to_string(), st.status);
                    }
                    if let Some(cp) = &run.checkpoint {
                        println!("  checkpoint {} {:?}: {}", cp.id, cp.status, cp.risk_description);
                    }
                    if let Some(f) = &run.failure {
                        println!("  failure [{}] {}", f.class, f.message);
                    }
                    0
                }
                Ok(None) => {
                    println!("{scenario}: no runs yet");
                    0
                }
                Err(e) => report_error(&e),
            }
        }
        Command::Approve(a) => resolve(root, a.scenario, a.checkpoint, Resolution::Approve)?,
        Command::Reject(a) => resolve(root, a.scenario, a.checkpoint, Resolution::Reject { reason: a.reason })?,
        Command::Override(a) => {
            let reason = a.reason.unwrap_or_default();
            resolve(root, a.scenario, a.checkpoint, Resolution::Override { reason })?
        }
    };

    std::process::exit(code);
}

async fn run(root: PathBuf, args: RunArgs) -> i32 {
    let h = match Harness::open(root) {
        Ok(h) => h,
        Err(e) => return report_error(&e),
    };
    let opts = RunOptions {
        force_clean: args.force_clean,
        keep_target: args.keep_target,
        no_ai: args.no_ai,
        interrupt_after: args.interrupt_after,
        update_golden: args.update_golden,
        auto_approve: args.auto_approve_checkpoints,
        idempotency_check: args.idempotency_check,
    };

    let interrupt = Interrupt::new();
    let on_signal = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current step");
            on_signal.trigger();
        }
    });

    match h.run(&args.scenario, &opts, &interrupt).await {
        Ok(out) => {
            print_outcome(&out);
            out.exit_code
        }
        Err(e) => report_error(&e),
    }
}

fn resolve(root: PathBuf, scenario: String, id: Option<String>, resolution: Resolution) -> anyhow::Result<i32> {
    let h = Harness::open(root)?;
    match h.resolve_checkpoint(&scenario, id.as_deref(), resolution) {
        Ok(run) => {
            if let Some(cp) = &run.checkpoint {
                println!("checkpoint {} {:?}", cp.id, cp.status);
            }
            if run.status.is_terminal() {
                println!("run {} is {:?}", run.run_label, run.status);
            } else {
                println!("rerun `conv run --scenario {scenario}` to continue");
            }
            info!(scenario = %scenario, "checkpoint resolution recorded");
            Ok(0)
        }
        Err(e) => Ok(report_error(&e)),
    }
}

fn print_outcome(out: &RunOutcome) {
    println!(
        "{} {} run {}: {:?} (exit {})",
        out.scenario,
        if out.resumed { "resumed" } else { "new" },
        out.run_label,
        out.status,
        out.exit_code
    );
    if let Some(f) = &out.failure {
        println!("  failure [{}] {}", f.class, f.message);
    }
    if let Some(cp) = out.checkpoint.as_ref().filter(|c| c.status == conv_core::CheckpointStatus::Pending) {
        println!("  awaiting checkpoint {}: {}", cp.id, cp.risk_description);
        println!("  resolve with `conv approve|reject|override --scenario {}`", out.scenario);
    }
    println!("  records: {}", out.run_dir.display());
}

fn report_error(e: &anyhow::Error) -> i32 {
    let rec = failure_record(e);
    eprintln!("error [{}]: {e:#}", rec.class);
    rec.exit_code
}
