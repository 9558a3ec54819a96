//! knocksentry binary entry point.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use knocksentry_core::config::EngineSettings;
use knocksentry_daemon::capture::JsonLinesCapture;
use knocksentry_daemon::report::OutputMode;
use knocksentry_daemon::Daemon;

/// knocksentry - port-knock and SPA covert-channel detector.
#[derive(Parser, Debug)]
#[command(name = "knocksentry", version, about)]
struct Args {
    /// Interface the capture collaborator observes; recorded for capture
    /// backends. The bundled backend reads JSON-lines observations from
    /// stdin.
    #[arg(short, long)]
    interface: Option<String>,

    /// Sliding window in milliseconds (overrides the config file).
    #[arg(short, long)]
    window: Option<i64>,

    /// Emit detections and the summary as JSON, one object per line.
    #[arg(short, long)]
    json: bool,

    /// Verbose logging (debug level unless KNOCKSENTRY_LOG is set).
    #[arg(short, long)]
    verbose: bool,

    /// Path to the configuration file.
    #[arg(short, long, default_value = "~/.config/knocksentry/config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // KNOCKSENTRY_LOG takes priority over the verbosity flag. Logs go to
    // stderr; stdout is reserved for detections and the summary.
    let env_filter = EnvFilter::try_from_env("KNOCKSENTRY_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = expand_tilde(&args.config);
    let mut settings = EngineSettings::load(&config_path).context("loading configuration")?;
    if let Some(window_ms) = args.window {
        settings.window_ms = window_ms;
    }

    if let Some(ref interface) = args.interface {
        tracing::info!(
            interface = %interface,
            "interface recorded for capture collaborator; reading JSON lines from stdin"
        );
    }

    let output = if args.json {
        OutputMode::Json
    } else {
        OutputMode::Text {
            color: std::io::stdout().is_terminal(),
        }
    };

    let daemon = Daemon::new(settings, output);
    daemon.run(JsonLinesCapture::stdin()).await?;
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
        return PathBuf::from("/tmp").join(rest);
    }
    PathBuf::from(path)
}
