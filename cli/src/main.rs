//! Cirdan - Command-line interface for the verified copy engine.
//!
//! Copies one or more case directories to the configured destination,
//! echoing the copy tool's output and reporting every failed source.

use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use engine::{
    fs_ops, BatchReport, CancelToken, ChecksumAlgorithm, Config, ProgressCallback, RoboCopy,
    RunLogger, RunSettings, SourceRequest, TransferOrchestrator,
};
use signal_hook::consts::TERM_SIGNALS;
use tracing_subscriber::EnvFilter;

/// Cirdan - verified bulk copy of case directories
#[derive(Parser, Debug)]
#[command(name = "cirdan")]
#[command(version = "0.1.0")]
#[command(about = "Copy case directories, verify them and write a manifest")]
struct Args {
    /// Source directories to copy
    #[arg(value_name = "SOURCE", required = true)]
    sources: Vec<PathBuf>,

    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,

    /// Settings file, read before and written after the run
    #[arg(long, value_name = "FILE", default_value = "settings.json")]
    settings: PathBuf,

    /// Destination key from the configuration
    #[arg(short, long, value_name = "KEY")]
    destination: Option<String>,

    /// User name for markers and the notification address
    #[arg(short, long, value_name = "NAME")]
    user: Option<String>,

    /// Additional log file for this run
    #[arg(short, long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Do not write the completion marker
    #[arg(long)]
    notrigger: bool,

    /// Do not drop a notification for the mail relay
    #[arg(long)]
    nomail: bool,

    /// Write the quality-check marker
    #[arg(long)]
    qualicheck: bool,

    /// Copy sources even if they match a blacklist pattern
    #[arg(long)]
    tolerant: bool,

    /// Digest algorithm: md5, sha256 or blake3 (overrides the configuration)
    #[arg(long, value_name = "ALGORITHM")]
    hash: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Terminal echo: permanent lines are printed, transient ones overwrite each other.
struct CliProgress {
    verbose: bool,
    start_time: Instant,
    transient_pending: AtomicBool,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
            transient_pending: AtomicBool::new(false),
        }
    }

    fn clear_transient(&self) {
        if self.transient_pending.swap(false, Ordering::SeqCst) {
            print!("\r{:40}\r", "");
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_line(&self, line: &str) {
        self.clear_transient();
        println!("{}", line);
    }

    fn on_transient(&self, status: &str) {
        self.transient_pending.store(true, Ordering::SeqCst);
        print!("\r{}", status);
        let _ = std::io::stdout().flush();
    }

    fn on_source_started(&self, source: &Path) {
        self.clear_transient();
        println!("==> {}", source.display());
    }

    fn on_source_finished(&self, source: &Path, succeeded: bool) {
        self.clear_transient();
        if self.verbose || !succeeded {
            let status = if succeeded { "done" } else { "FAILED" };
            println!("<== {}: {}", source.display(), status);
        }
    }

    fn on_batch_finished(&self, report: &BatchReport) {
        self.clear_transient();
        println!();
        println!(
            "Summary: {} source(s) attempted, {} failure(s){}",
            report.attempted,
            report.failures.len(),
            if report.cancelled { ", cancelled" } else { "" }
        );
        println!("Elapsed: {}", fs_ops::format_duration(self.start_time.elapsed()));
        if report.had_failures() {
            println!();
            println!("Failures:");
            for failure in &report.failures {
                println!("  {}", failure);
            }
        }
    }
}

/// Parse arguments, run the batch and exit with 0 (clean), 1 (failures) or 2 (fatal)
fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let exit_code = match run_cli(&args) {
        Ok(report) if report.had_failures() => 1,
        Ok(_) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Load configuration, apply the command line on top and validate it.
fn prepare(args: &Args) -> Result<(Config, RunSettings), String> {
    let mut config = Config::load(&args.config).map_err(|e| e.to_string())?;
    if let Some(hash) = &args.hash {
        config.hash_algorithm = hash.parse::<ChecksumAlgorithm>().map_err(|e| e.to_string())?;
    }
    let settings = RunSettings::load(&args.settings, &config).map_err(|e| e.to_string())?;
    let settings = apply_overrides(args, settings, &config)?;
    Ok((config, settings))
}

fn apply_overrides(
    args: &Args,
    mut settings: RunSettings,
    config: &Config,
) -> Result<RunSettings, String> {
    if let Some(destination) = &args.destination {
        if !config.destinations.contains_key(destination) {
            let known: Vec<_> = config.destinations.keys().map(String::as_str).collect();
            return Err(format!(
                "Unknown destination '{}'. Must be one of: {}",
                destination,
                known.join(", ")
            ));
        }
        settings.destination = destination.clone();
    }
    if let Some(user) = &args.user {
        settings.user = user.trim().to_string();
    }
    if args.notrigger {
        settings.write_trigger = false;
    }
    if args.nomail {
        settings.send_notification = false;
    }
    if args.qualicheck {
        settings.write_qualicheck = true;
    }
    if args.tolerant {
        settings.tolerant = true;
    }
    Ok(settings)
}

/// Route Ctrl-C and termination signals to `cancel`.
///
/// The first signal stops the run at the next checkpoint; a second one while
/// the flag is still set exits immediately.
fn install_interrupt_handler(cancel: &CancelToken) -> std::io::Result<()> {
    let flag = cancel.as_flag();
    for &signal in TERM_SIGNALS {
        signal_hook::flag::register_conditional_shutdown(signal, 130, Arc::clone(&flag))?;
        signal_hook::flag::register(signal, Arc::clone(&flag))?;
    }
    Ok(())
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<BatchReport, String> {
    let (config, settings) = prepare(args)?;

    let logger = Arc::new(RunLogger::from_config(&config).map_err(|e| e.to_string())?);
    if let Some(user_log) = &args.log {
        if let Err(e) = logger.add_user(user_log, &args.sources) {
            logger.error(&format!("user log not available: {}", e));
        }
    }

    let tool = match RoboCopy::detect(&config.copy_tool) {
        Ok(tool) => tool,
        Err(e) => {
            let message = e.to_string();
            logger.crash(&message);
            return Err(message);
        }
    };

    let requests: Vec<_> = args
        .sources
        .iter()
        .map(|path| SourceRequest::new(path, settings.destination.clone()))
        .collect();
    let orchestrator =
        TransferOrchestrator::new(config, settings.clone(), Arc::clone(&logger), Box::new(tool))
            .map_err(|e| e.to_string())?
            .with_progress(Arc::new(CliProgress::new(args.verbose)));
    if let Err(e) = install_interrupt_handler(&orchestrator.cancel_token()) {
        logger.warn(&format!("Ctrl-C will not cancel this run: {}", e));
    }
    let report = orchestrator.run(&requests).map_err(|e| e.to_string())?;

    if let Err(e) = settings.save(&args.settings) {
        logger.warn(&format!("settings not saved: {}", e));
    }
    logger.close();
    Ok(report)
}
