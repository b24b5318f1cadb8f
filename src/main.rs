//! vigil - Continuous test-watch dashboard
//!
//! Watches a Python test tree, reruns tests on change, renders live
//! pass/fail status, and launches an external debugger at the first
//! failing test on demand.

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod watch;

use vigil::config::{DebuggerKind, StopPolicy, WatchConfig};
use vigil::pipeline::{Pipeline, RunOutcome};
use vigil::render;
use vigil::state::persistence::StatePersistence;
use vigil::state::StateTracker;
use watch::Watcher;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(version = "0.1.0")]
#[command(about = "Continuous test-watch dashboard with debugger handoff", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by `watch` and `run`.
#[derive(Args)]
struct RunFlags {
    /// Run every file regardless of failures (default stops after the
    /// first failing file)
    #[arg(short = 'a', long)]
    run_all: bool,

    /// Restrict the sweep to previously-failing files and tests
    #[arg(short = 'f', long)]
    failed_only: bool,

    /// Explicit test directory (overrides the custom/default precedence)
    #[arg(short = 'd', long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Per-test timeout in seconds (0 disables the alarm)
    #[arg(short = 't', long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Debugger used by the default debug keybinding
    #[arg(long, value_enum, value_name = "KIND")]
    debugger: Option<DebuggerKind>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the project and rerun tests whenever files change
    Watch {
        #[command(flatten)]
        flags: RunFlags,

        /// Disable automatic rerun on file changes (only `r` reruns)
        #[arg(short = 'n', long)]
        no_refresh: bool,
    },

    /// Execute one sweep and print the dashboard once
    Run {
        #[command(flatten)]
        flags: RunFlags,
    },

    /// Show persisted pass/fail state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete the scratch directory (generated harnesses and persisted state)
    Clean,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "vigil=debug,info"
    } else {
        "vigil=info,warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Resolve project path
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    match cli.command {
        Commands::Watch { flags, no_refresh } => {
            let config = build_config(&project_path, &flags)?.with_auto_refresh(!no_refresh);
            require_python(&config.python);
            Watcher::new(config).run()?;
        }

        Commands::Run { flags } => {
            let config = build_config(&project_path, &flags)?;
            require_python(&config.python);
            let pipeline = Pipeline::new(&config);
            let mut tracker = StateTracker::from_persisted(pipeline.persistence().load()?);

            let frame = match pipeline.execute(&mut tracker)? {
                RunOutcome::Completed(snapshot) => render::render_snapshot(&snapshot),
                RunOutcome::SyntaxError(report) => render::render_syntax(&report),
                RunOutcome::Crash(report) => render::render_crash(&report),
            };
            print!("{frame}");
        }

        Commands::Status { json } => {
            let config = WatchConfig::load(&project_path)?;
            let state = StatePersistence::new(config.scratch_dir()).load()?;

            if json {
                let statuses: serde_json::Map<String, serde_json::Value> = state
                    .statuses
                    .iter()
                    .map(|(id, status)| (id.to_string(), status.as_str().into()))
                    .collect();
                let failed: Vec<&String> = state.failed_files.iter().collect();
                let doc = serde_json::json!({
                    "statuses": statuses,
                    "failed_files": failed,
                });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else if state.statuses.is_empty() {
                println!("No persisted state (no completed run yet).");
            } else {
                for (identity, status) in &state.statuses {
                    let styled = match status.as_str() {
                        "pass" => status.as_str().green(),
                        "fail" => status.as_str().red(),
                        _ => status.as_str().yellow(),
                    };
                    println!("{identity} {styled}");
                }
                if !state.failed_files.is_empty() {
                    println!(
                        "\n{} {}",
                        "failing files:".red().bold(),
                        state
                            .failed_files
                            .iter()
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
            }
        }

        Commands::Clean => {
            let config = WatchConfig::load(&project_path)?;
            let scratch = config.scratch_dir();
            if scratch.exists() {
                std::fs::remove_dir_all(&scratch)?;
                println!("{} Removed {}", "OK".green().bold(), scratch.display());
            } else {
                println!("Nothing to clean.");
            }
        }
    }

    Ok(())
}

/// Exit early with a clear message when the interpreter is missing; every
/// later step needs it.
fn require_python(python: &str) {
    if which::which(python).is_err() {
        eprintln!(
            "{} Python interpreter '{}' not found in PATH",
            "Error:".red().bold(),
            python
        );
        std::process::exit(1);
    }
}

/// Assemble the layered configuration: file layer, then CLI overrides.
fn build_config(project_path: &std::path::Path, flags: &RunFlags) -> anyhow::Result<WatchConfig> {
    let mut config = WatchConfig::load(project_path)?
        .with_dir_override(flags.dir.clone())
        .with_timeout_secs(flags.timeout)
        .with_debugger(flags.debugger);
    if flags.failed_only {
        config = config.with_failed_only(true);
    }
    if flags.run_all {
        config = config.with_stop_policy(StopPolicy::RunAll);
    }
    Ok(config)
}
