//! CLI command definitions, routing, and tracing setup.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use jobrelay_core::loader::{self, LoadProgress};
use jobrelay_core::{Backends, WorkerOptions, channel_settings, connect_channel, run_worker};
use jobrelay_shared::{AppConfig, RelaySettings, init_config, load_config, load_config_from};
use serde_json::Value;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// jobrelay: context-grounded answers to job questions over PubNub.
#[derive(Parser)]
#[command(
    name = "jobrelay",
    version,
    about = "Answer job questions from a PubNub channel using stored job context.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.jobrelay/jobrelay.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Subscribe to the request channel and answer requests until ctrl-c.
    Listen {
        /// Stop after this many messages.
        #[arg(long)]
        max_messages: Option<usize>,
    },

    /// Run a single request message through the pipeline.
    Process {
        /// Request JSON. Read from stdin when omitted.
        #[arg(short, long)]
        message: Option<String>,

        /// Publish the envelope on the response channel as well as printing it.
        #[arg(long)]
        publish: bool,
    },

    /// Embed job postings and profiles into the context store.
    Load {
        /// JSON array of job postings.
        #[arg(long)]
        jobs: Option<PathBuf>,

        /// JSON array of profiles.
        #[arg(long)]
        profiles: Option<PathBuf>,

        /// Owner recorded on every loaded row.
        #[arg(long, default_value = "1")]
        user_id: i64,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "jobrelay=info",
        1 => "jobrelay=debug",
        _ => "jobrelay=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so `process` output stays pipeable.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Listen { max_messages } => cmd_listen(config_path, max_messages).await,
        Command::Process { message, publish } => {
            cmd_process(config_path, message, publish).await
        }
        Command::Load {
            jobs,
            profiles,
            user_id,
        } => cmd_load(config_path, jobs.as_deref(), profiles.as_deref(), user_id).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn read_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_listen(config_path: Option<&Path>, max_messages: Option<usize>) -> Result<()> {
    let config = read_config(config_path)?;
    let settings = RelaySettings::from_env(&config, true)?;
    let channel = channel_settings(&settings)?;

    let backends = Backends::connect(&settings).await?;
    let pipeline = backends.pipeline(&settings);
    let (relay, mut subscription) = connect_channel(channel)?;

    let options = WorkerOptions {
        reconnect_delay: Duration::from_millis(channel.reconnect_delay_ms),
        max_messages,
    };

    info!(
        job_channel = %channel.job_channel,
        response_channel = %channel.response_channel,
        "listening for job requests"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c, run until the channel closes");
            std::future::pending::<()>().await;
        }
    };

    let stats = run_worker(&mut subscription, &pipeline, &relay, &options, shutdown).await;

    println!();
    println!("  Listener stopped.");
    println!("  Received:       {}", stats.received);
    println!("  Succeeded:      {}", stats.succeeded);
    println!("  Failed:         {}", stats.failed);
    println!("  Relay failures: {}", stats.relay_failures);
    println!();

    Ok(())
}

async fn cmd_process(
    config_path: Option<&Path>,
    message: Option<String>,
    publish: bool,
) -> Result<()> {
    let raw = match message {
        Some(m) => m,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| eyre!("failed to read message from stdin: {e}"))?;
            buf
        }
    };
    // Unparseable input becomes a string message, which validation rejects
    // with an error envelope like any other malformed request.
    let message: Value =
        serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw.trim().to_string()));

    let config = read_config(config_path)?;
    let settings = RelaySettings::from_env(&config, publish)?;
    let backends = Backends::connect(&settings).await?;
    let pipeline = backends.pipeline(&settings);

    let processed = if publish {
        let (relay, _) = connect_channel(channel_settings(&settings)?)?;
        pipeline.handle(&message, &relay).await
    } else {
        pipeline.process(&message).await
    };

    info!(state = %processed.state(), published = processed.published, "request finished");
    println!("{}", serde_json::to_string_pretty(&processed.envelope)?);
    Ok(())
}

async fn cmd_load(
    config_path: Option<&Path>,
    jobs: Option<&Path>,
    profiles: Option<&Path>,
    user_id: i64,
) -> Result<()> {
    if jobs.is_none() && profiles.is_none() {
        return Err(eyre!("nothing to load: pass --jobs and/or --profiles"));
    }

    let config = read_config(config_path)?;
    let settings = RelaySettings::from_env(&config, false)?;
    let backends = Backends::connect(&settings).await?;

    let progress = CliProgress::new();
    let report = loader::load_files(
        jobs,
        profiles,
        user_id,
        backends.embedder.as_ref(),
        backends.context.as_ref(),
        &progress,
    )
    .await;
    progress.finish();
    let report = report?;

    println!();
    println!("  Context loading complete!");
    println!("  Loaded: {}", report.loaded);
    println!("  Failed: {}", report.failed);
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl LoadProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item(&self, current: usize, total: usize, label: &str) {
        self.spinner
            .set_message(format!("Embedding [{current}/{total}] {label}"));
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = read_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
