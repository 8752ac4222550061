//! hive-monitor - watch task progress from the terminal
//!
//! Wires the simulated status source and a renderer into a `ProgressMonitor`.

use clap::Parser;
use hive_monitor::{
    config::MonitorConfig,
    log_error, log_info, log_warn, logging,
    monitor::{
        JsonRenderer, MonitorEvent, ProgressMonitor, Renderer, SimulatedSource, StopReason,
        TaskStatus, TerminalRenderer,
    },
    signal,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Monitor tasks against the simulated status source
    Watch {
        /// Task ids to monitor (random ids are generated when omitted)
        task_ids: Vec<String>,
        /// Number of generated tasks when no ids are given
        #[arg(long, default_value_t = 3)]
        count: usize,
        /// Tick interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Grace delay after a task finishes, in milliseconds
        #[arg(long)]
        grace_ms: Option<u64>,
        /// Probability that a simulated tick crashes the task
        #[arg(long)]
        failure_rate: Option<f64>,
    },
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigCmd {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Destination (default: ~/.config/hive-monitor/config.{env}.json)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Parser, Debug)]
#[command(name = "hive-monitor")]
#[command(version = "0.1.0")]
#[command(about = "Poll-driven progress monitor for external tasks", long_about = None)]
struct Args {
    /// Configuration file path (overrides defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit one JSON snapshot per line instead of drawing progress bars
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logs and file logging of every tick
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Default)]
struct RunSummary {
    completed: Vec<String>,
    failed: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = MonitorConfig::load(args.config.as_deref())?;
    config.debug |= args.debug;

    match args.command {
        Command::Config { cmd } => run_config(cmd, &config),
        Command::Watch {
            task_ids,
            count,
            interval_ms,
            grace_ms,
            failure_rate,
        } => {
            if let Some(ms) = interval_ms {
                config.tick_interval_ms = ms;
            }
            if let Some(ms) = grace_ms {
                config.grace_delay_ms = ms;
            }
            if let Some(rate) = failure_rate {
                config.simulation.failure_rate = rate;
            }
            config.validate()?;

            init_logging(args.verbose, !args.json, config.debug);
            run_watch(config, task_ids, count, args.json).await
        }
    }
}

fn run_config(cmd: ConfigCmd, config: &MonitorConfig) -> anyhow::Result<()> {
    match cmd {
        ConfigCmd::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigCmd::Init { path, force } => {
            let path = path
                .or_else(MonitorConfig::default_path)
                .ok_or_else(|| anyhow::anyhow!("Cannot determine config directory"))?;
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            MonitorConfig::default().save_to_file(&path)?;
            println!("✅ Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

async fn run_watch(
    config: MonitorConfig,
    task_ids: Vec<String>,
    count: usize,
    json: bool,
) -> anyhow::Result<()> {
    let renderer: Arc<dyn Renderer> = if json {
        Arc::new(JsonRenderer::stdout())
    } else {
        Arc::new(TerminalRenderer::new(config.bar_width))
    };
    let source = Arc::new(SimulatedSource::new(config.simulation.clone()));
    let monitor = ProgressMonitor::new(&config, source, renderer);

    let task_ids = if task_ids.is_empty() {
        (0..count)
            .map(|_| format!("task-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]))
            .collect()
    } else {
        task_ids
    };

    let events = monitor.subscribe();
    for task_id in &task_ids {
        monitor.start_monitoring(task_id)?;
    }
    log_info!("Watching {} task(s): {}", task_ids.len(), task_ids.join(", "));

    let summary = tokio::select! {
        summary = collect_until_idle(&monitor, events) => Some(summary),
        result = signal::shutdown_on_signal(&monitor) => {
            result?;
            log_warn!("Interrupted, {} task(s) abandoned", task_ids.len());
            None
        }
    };
    monitor.shutdown().await;

    let Some(summary) = summary else {
        eprintln!("⚠️  Interrupted");
        return Ok(());
    };

    eprintln!(
        "✅ {} completed, ❌ {} failed",
        summary.completed.len(),
        summary.failed.len()
    );
    if !summary.failed.is_empty() {
        log_error!("Failed tasks: {}", summary.failed.join(", "));
        anyhow::bail!("{} task(s) failed: {}", summary.failed.len(), summary.failed.join(", "));
    }
    Ok(())
}

/// Tallies finished tasks until nothing is monitored any more
async fn collect_until_idle(
    monitor: &ProgressMonitor,
    mut events: broadcast::Receiver<MonitorEvent>,
) -> RunSummary {
    let mut summary = RunSummary::default();
    loop {
        if monitor.active_count() == 0 {
            // Events already queued may still carry results
            while let Ok(event) = events.try_recv() {
                summary.record(event);
            }
            return summary;
        }
        match events.recv().await {
            Ok(event) => summary.record(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                log_warn!("Missed {} monitor events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => return summary,
        }
    }
}

impl RunSummary {
    fn record(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::Finished { task_id, status } => {
                log_info!("{} finished: {}", task_id, status);
                match status {
                    TaskStatus::Failed => self.failed.push(task_id),
                    _ => self.completed.push(task_id),
                }
            }
            MonitorEvent::Stopped { task_id, reason } => {
                if reason != StopReason::Finished {
                    log_warn!("{} stopped early ({:?})", task_id, reason);
                }
            }
            MonitorEvent::Started { .. } => {}
        }
    }
}

/// Initialize logging
fn init_logging(verbose: bool, terminal_mode: bool, debug_mode: bool) {
    let filter = if verbose || debug_mode {
        "hive_monitor=debug,info"
    } else {
        "hive_monitor=info,warn"
    };
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    // The terminal renderer owns stdout, so logs go to a file instead
    if terminal_mode {
        if let Err(e) = logging::init_logger(None) {
            eprintln!(
                "Cannot open log file {}: {}",
                logging::get_log_path_display(),
                e
            );
            return;
        }
        logging::set_debug_mode(debug_mode);

        if let Some(file) = logging::log_file_handle() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        return;
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
