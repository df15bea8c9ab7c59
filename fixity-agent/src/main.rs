use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use fixity_agent::enumerator::Enumerator;
use fixity_agent::lock::{InstanceLock, lock_path_for};
use fixity_agent::runner::DEFAULT_POLL;
use fixity_agent::schedule::{DEFAULT_MIN_GAP_MIN, verify_paths};
use fixity_agent::scheduler::queue_report;
use fixity_agent::signals::StopSignal;
use fixity_agent::{Agent, AgentConfig, AgentError, AgentEvent, ClientState, Result, RunReport};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERBOSE_QUEUE_LIMIT: usize = 20;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "fixity-agent")]
#[command(about = "Hashes files on this machine and reports them to a Fixity server")]
struct Cli {
    /// Agent configuration file (TOML when the extension is .toml, JSON otherwise)
    #[arg(
        long,
        global = true,
        env = "FIXITY_AGENT_CONFIG",
        default_value = "fixity-agent.json"
    )]
    config: PathBuf,

    /// Append logs to this file as well as stderr
    #[arg(long, global = true, env = "FIXITY_AGENT_LOG")]
    log_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan and upload once
    Run {
        /// State file (defaults to `state_path` from the config)
        #[arg(long)]
        state_path: Option<PathBuf>,
        /// Stop hashing after this many GiB (0 = no limit)
        #[arg(long)]
        quota_gb: Option<u64>,
    },
    /// Run scheduled scans from `schedule_quota_gb` until stopped
    Daemon {
        #[arg(long)]
        state_path: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_POLL.as_secs_f64())]
        poll_sec: f64,
    },
    /// Enumerate candidates without hashing or uploading
    DryRun {
        /// Print every candidate
        #[arg(long)]
        list: bool,
    },
    /// Print the effective configuration with the token redacted
    ValidateConfig,
    /// Show how the next run would prioritise files
    DebugQueue {
        #[arg(long)]
        state_path: Option<PathBuf>,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Check several configs for invalid or clashing schedule keys
    VerifySchedules {
        #[arg(required = true)]
        configs: Vec<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_MIN_GAP_MIN)]
        min_gap_min: u32,
    },
}

#[derive(Serialize)]
struct StatusLine<'a, T: Serialize> {
    status: &'a str,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct Candidate<'a> {
    class: &'a str,
    file_path: String,
    size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_scan: Option<&'a str>,
}

#[derive(Serialize)]
struct OrphanedPath<'a> {
    file_path: &'a str,
}

#[derive(Serialize)]
struct DryRunSummary {
    total_files: usize,
    total_bytes: u64,
    total_gb: f64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    // Flushes the file writer when main returns.
    let _log_guard = match init_logging(cli.log_path.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("failed to open log file: {err}");
            return ExitCode::from(2);
        }
    };

    match execute(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(error = %err, "fixity-agent failed");
            print_line(&StatusLine {
                status: "error",
                body: ErrorBody {
                    error: err.to_string(),
                },
            });
            ExitCode::from(err.exit_code())
        }
    }
}

fn init_logging(log_path: Option<&Path>) -> std::io::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_path {
        Some(path) => {
            let file_name = path.file_name().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} does not name a file", path.display()),
                )
            })?;
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let appender = tracing_appender::rolling::RollingFileAppender::builder()
                .rotation(tracing_appender::rolling::Rotation::NEVER)
                .filename_prefix(file_name.to_string_lossy())
                .build(dir)
                .map_err(std::io::Error::other)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn print_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => warn!(error = %err, "failed to encode output line"),
    }
}

fn load_config(path: &Path) -> Result<AgentConfig> {
    let config = AgentConfig::load(path)?;
    info!(
        path = %path.display(),
        machine_name = %config.machine_name,
        roots = config.scan_paths.len(),
        "configuration loaded"
    );
    Ok(config)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

fn execute(cli: Cli) -> Result<u8> {
    match cli.command {
        Command::Run {
            state_path,
            quota_gb,
        } => {
            let config = load_config(&cli.config)?;
            run_once(config, state_path, quota_gb)
        }
        Command::Daemon {
            state_path,
            poll_sec,
        } => {
            let poll = Duration::try_from_secs_f64(poll_sec)
                .ok()
                .filter(|poll| !poll.is_zero())
                .ok_or_else(|| AgentError::Config("--poll-sec must be a positive number".into()))?;
            let config = load_config(&cli.config)?;
            run_daemon(config, state_path, poll)
        }
        Command::DryRun { list } => dry_run(&load_config(&cli.config)?, list),
        Command::ValidateConfig => {
            let config = load_config(&cli.config)?;
            let pretty = serde_json::to_string_pretty(&config.redacted())
                .map_err(|e| AgentError::Config(format!("encoding config: {e}")))?;
            println!("{pretty}");
            Ok(0)
        }
        Command::DebugQueue {
            state_path,
            verbose,
        } => {
            let config = load_config(&cli.config)?;
            debug_queue(&config, state_path, verbose)
        }
        Command::VerifySchedules {
            configs,
            min_gap_min,
        } => {
            let report = verify_paths(&configs, min_gap_min)?;
            let clean = report.is_clean();
            print_line(&StatusLine {
                status: if clean { "ok" } else { "schedule_findings" },
                body: report,
            });
            Ok(if clean { 0 } else { 1 })
        }
    }
}

fn resolve_state_path(config: &AgentConfig, state_path: Option<PathBuf>) -> PathBuf {
    state_path.unwrap_or_else(|| config.state_path.clone())
}

fn run_once(config: AgentConfig, state_path: Option<PathBuf>, quota_gb: Option<u64>) -> Result<u8> {
    let state_path = resolve_state_path(&config, state_path);
    let _lock = InstanceLock::acquire(&lock_path_for(&state_path))?;
    let signals = StopSignal::install();
    let mut state = ClientState::load(&state_path)?;
    let agent = Agent::new(config, signals.flag())?;

    let mut emit = |event: AgentEvent| print_line(&event);
    let report: RunReport =
        runtime()?.block_on(agent.run_cycle(&mut state, &state_path, quota_gb, &mut emit))?;

    let code = report.exit_code();
    print_line(&StatusLine {
        status: if code == 0 { "done" } else { "upload_error" },
        body: report,
    });
    Ok(code)
}

fn run_daemon(config: AgentConfig, state_path: Option<PathBuf>, poll: Duration) -> Result<u8> {
    let state_path = resolve_state_path(&config, state_path);
    let _lock = InstanceLock::acquire(&lock_path_for(&state_path))?;
    let signals = StopSignal::install();
    let mut state = ClientState::load(&state_path)?;
    if config.schedule_quota_gb.values().all(|quota| *quota == 0) {
        warn!("no schedule entry has a positive quota; the daemon will stay idle");
    }
    let agent = Agent::new(config, signals.flag())?;

    let mut emit = |event: AgentEvent| print_line(&event);
    runtime()?.block_on(agent.run_daemon(&mut state, &state_path, poll, &mut emit))?;
    Ok(0)
}

fn dry_run(config: &AgentConfig, list: bool) -> Result<u8> {
    let entries = Enumerator::from_config(config).entries();
    let total_bytes = entries
        .iter()
        .fold(0u64, |acc, entry| acc.saturating_add(entry.size_bytes));
    if list {
        for entry in &entries {
            print_line(&Candidate {
                class: "candidate",
                file_path: entry.key(),
                size_bytes: entry.size_bytes,
                last_scan: None,
            });
        }
    }
    print_line(&StatusLine {
        status: "dry_run",
        body: DryRunSummary {
            total_files: entries.len(),
            total_bytes,
            total_gb: (total_bytes as f64 / GIB * 1000.0).round() / 1000.0,
        },
    });
    Ok(0)
}

fn debug_queue(config: &AgentConfig, state_path: Option<PathBuf>, verbose: bool) -> Result<u8> {
    let state_path = resolve_state_path(config, state_path);
    let state = ClientState::load(&state_path)?;
    let report = queue_report(Enumerator::from_config(config).entries(), &state);

    print_line(&StatusLine {
        status: "queue",
        body: &report.stats,
    });
    if verbose {
        let classes = [("unscanned", &report.unscanned), ("scanned", &report.scanned)];
        for (class, entries) in classes {
            for entry in entries.iter().take(VERBOSE_QUEUE_LIMIT) {
                let file_path = entry.key();
                let last_scan = state.files.get(&file_path).map(String::as_str);
                print_line(&Candidate {
                    class,
                    file_path,
                    size_bytes: entry.size_bytes,
                    last_scan,
                });
            }
        }
        for path in report.orphaned.iter().take(VERBOSE_QUEUE_LIMIT) {
            print_line(&StatusLine {
                status: "orphaned",
                body: OrphanedPath { file_path: path },
            });
        }
    }
    Ok(0)
}
