//! Command-line runner for Appium-driven mobile UI checks.
//!
//! # Usage
//!
//! ```bash
//! # Show the capabilities a session would be started with
//! mobdrive capabilities
//! mobdrive --platform ios --format json capabilities
//!
//! # Start a session (with retries), print its id, quit it
//! mobdrive probe
//!
//! # Run a JSON step file against one session
//! mobdrive run login.json
//! mobdrive run login.json --wait 30 --screenshots target/screenshots
//!
//! # Use a specific settings file and log to a file as well
//! mobdrive --config ./ci/android.json --log-file target/mobdrive.log run smoke.json
//! ```
//!
//! Exit codes: 0 success, 1 step failed, 2 configuration error, 3 session error.

mod steps;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mobdrive_core::capabilities::{self, ConfigurationError};
use mobdrive_core::config::{ConfigSource, PLATFORM_KEY};
use mobdrive_core::screen::ScreenContext;
use mobdrive_core::session::{ContextId, Session, SessionError, SessionManager, SessionManagerConfig};
use mobdrive_core::wait::WaitPolicy;
use mobdrive_core::webdriver::WebDriverClient;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::steps::{Step, StepReport};

/// Command-line runner for Appium-driven mobile UI checks.
#[derive(Parser)]
#[command(name = "mobdrive")]
#[command(about = "Resolve capabilities, probe sessions and run UI step files against an Appium server")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to ~/.mobdrive/config.json)
    #[arg(short, long, global = true, env = "MOBDRIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Target platform: android or ios
    #[arg(short, long, global = true, env = "MOBDRIVE_PLATFORM")]
    platform: Option<String>,

    /// Output format: text or json
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Also write logs (JSON lines) to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved capabilities and server URL
    Capabilities,

    /// Start a session, print its id, and quit it
    Probe,

    /// Run a JSON step file against one session
    Run {
        /// Path to the step file
        steps: PathBuf,
        /// Wait budget per lookup and interaction, in seconds
        #[arg(
            short,
            long,
            default_value = "15",
            env = "MOBDRIVE_WAIT",
            value_parser = clap::value_parser!(u64).range(1..=86_400)
        )]
        wait: u64,
        /// Directory for failure screenshots
        #[arg(long, default_value = "target/screenshots")]
        screenshots: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn init_tracing(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let file_layer = log_file.map(|path| {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("mobdrive.log"));
        tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(tracing_appender::rolling::never(dir, name))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

#[derive(Debug)]
enum CliError {
    StepFailed(String),
    Configuration(String),
    Session(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::StepFailed(_) => ExitCode::from(1),
            CliError::Configuration(_) => ExitCode::from(2),
            CliError::Session(_) => ExitCode::from(3),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::StepFailed(msg) => write!(f, "Step failed: {}", msg),
            CliError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Session(msg) => write!(f, "Session error: {}", msg),
        }
    }
}

impl From<ConfigurationError> for CliError {
    fn from(e: ConfigurationError) -> Self {
        CliError::Configuration(e.to_string())
    }
}

impl From<SessionError> for CliError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Configuration(e) => e.into(),
            SessionError::InitFailed { ref source, .. } => CliError::Session(format!("{}: {}", e, source)),
            other => CliError::Session(other.to_string()),
        }
    }
}

fn load_config(cli: &Cli) -> Result<ConfigSource, CliError> {
    let config = match &cli.config {
        Some(path) => ConfigSource::from_file(path)?.with_env_overrides(),
        None => ConfigSource::load(),
    };
    Ok(match &cli.platform {
        Some(platform) => config.with_override(PLATFORM_KEY, platform.as_str()),
        None => config,
    })
}

fn session_manager(config: ConfigSource, wait: WaitPolicy) -> Result<SessionManager, CliError> {
    let client = WebDriverClient::new().map_err(|e| CliError::Session(e.to_string()))?;
    let settings = SessionManagerConfig {
        default_wait: wait,
        ..SessionManagerConfig::default()
    };
    Ok(SessionManager::with_settings(config, Arc::new(client), settings))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Capabilities => {
            let platform = capabilities::resolve_platform(&config)?;
            let bundle = capabilities::resolve(platform, &config)?;
            let server = capabilities::server_url(platform, &config)?;

            if cli.format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::json!({
                        "platform": platform,
                        "server": server.as_str(),
                        "capabilities": bundle,
                    })
                );
            } else {
                println!("platform: {}", platform);
                println!("server: {}", server);
                for (name, value) in bundle.iter() {
                    println!("  {} = {}", name, value);
                }
            }
            Ok(())
        }
        Command::Probe => {
            let manager = session_manager(config, WaitPolicy::default())?;
            let ctx = ContextId::named("probe");
            let session = manager.get_session(&ctx).await?;

            if cli.format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::json!({
                        "session": session.id(),
                        "platform": session.platform(),
                        "server": session.server().as_str(),
                    })
                );
            } else {
                println!("session {} on {} ({})", session.id(), session.server(), session.platform());
            }
            manager.quit_session(&ctx).await;
            Ok(())
        }
        Command::Run {
            steps: path,
            wait,
            screenshots,
        } => {
            let steps = steps::load(path).map_err(CliError::StepFailed)?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "steps".to_string());
            let manager = session_manager(config, WaitPolicy::from_secs(*wait))?;
            let ctx = ContextId::named(name.clone());
            let format = cli.format;

            let reports = manager
                .scoped(&ctx, |session| async move {
                    run_steps(session, &steps, &name, screenshots, format).await
                })
                .await?;

            if format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::json!({ "success": true, "steps": reports })
                );
            } else {
                println!("{} steps passed", reports.len());
            }
            Ok(())
        }
    }
}

async fn run_steps(
    session: Arc<Session>,
    steps: &[Step],
    name: &str,
    screenshot_dir: &Path,
    format: OutputFormat,
) -> Result<Vec<StepReport>, CliError> {
    let screen = ScreenContext::new(session.clone()).with_short_wait(WaitPolicy::short());
    let mut reports = Vec::with_capacity(steps.len());

    for (index, step) in steps.iter().enumerate() {
        info!(index = index + 1, %step, "running step");
        match steps::execute(&screen, index + 1, step).await {
            Ok(report) => {
                if format == OutputFormat::Text {
                    match &report.value {
                        Some(value) => println!("ok   {:>3}  {} -> {}", index + 1, step, value),
                        None => println!("ok   {:>3}  {}", index + 1, step),
                    }
                }
                reports.push(report);
            }
            Err(failure) => {
                if format == OutputFormat::Text {
                    println!("FAIL {:>3}  {}", index + 1, step);
                }
                if let Some(path) = capture_screenshot(&session, name, screenshot_dir).await {
                    eprintln!("Screenshot saved to {}", path.display());
                }
                return Err(CliError::StepFailed(format!("step {} ({}): {}", index + 1, step, failure)));
            }
        }
    }
    Ok(reports)
}

/// Save a failure screenshot as `<dir>/<name>_<timestamp>.png`. Best effort.
async fn capture_screenshot(session: &Session, name: &str, dir: &Path) -> Option<PathBuf> {
    let png = match session.screenshot().await {
        Ok(png) => png,
        Err(e) => {
            warn!(error = %e, "failed to capture screenshot");
            return None;
        }
    };
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{}_{}.png", name, timestamp));
    let written = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, png));
    match written {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to save screenshot");
            None
        }
    }
}
