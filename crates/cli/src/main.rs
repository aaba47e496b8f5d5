//! CLI for context-window tracking on captured AI chat pages.
//!
//! Pages are read from JSON captures of their DOM. The tool can detect the
//! platform for a URL, count the tokens of a capture, print its transcript,
//! replay scripted page changes through the live observer, process a whole
//! directory of captures, and summarize a capture through the gateway.

mod http;
mod replay;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use context_gauge_core::{
    detect_platform, keys, load_capture, process_all_captures, selectors_for, write_jsonl_output,
    ConversationExtractor, Document, ErrorReporter, JsonFileSettings, ObservationController,
    RecordingIndicator, Runtime, SettingsStore, SnapshotPage, SummarizeAction, TokenEstimator,
    TracingReporter, TrackerConfig, UsageSnapshot,
};

use crate::http::{HttpGateway, HttpReporter};

/// Track context-window usage of AI chat pages.
#[derive(Parser, Debug)]
#[command(name = "context-gauge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tracker configuration (JSON). Missing fields use defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Settings file holding the API key and installation id
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// URL that receives error reports
    #[arg(long, global = true, env = "CONTEXT_GAUGE_REPORT_URL")]
    report_url: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the platform serving a URL
    Detect { url: String },

    /// Count the tokens of a captured page
    Count {
        capture: PathBuf,

        /// Print the usage as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the ordered transcript of a captured page
    Extract {
        capture: PathBuf,

        /// Print the transcript as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay a script of page changes through the observer
    Replay {
        capture: PathBuf,
        script: PathBuf,
    },

    /// Process every capture under a directory into JSONL
    Batch {
        /// Root directory containing capture files
        #[arg(long)]
        input_dir: PathBuf,

        /// Output JSONL file
        #[arg(long)]
        output: PathBuf,
    },

    /// Summarize a captured conversation through the gateway
    Summarize {
        capture: PathBuf,

        /// Summarization gateway URL
        #[arg(long, env = "CONTEXT_GAUGE_GATEWAY_URL")]
        gateway_url: String,

        /// API key, stored in the settings file when given
        #[arg(long, env = "CONTEXT_GAUGE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<TrackerConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read config {:?}: {}", path, e))?;
            Ok(TrackerConfig::from_json(&json)?)
        }
        None => Ok(TrackerConfig::default()),
    }
}

fn settings_path(explicit: Option<PathBuf>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let dir = dirs::config_dir().ok_or("no config directory on this system; pass --settings")?;
    Ok(dir.join("context-gauge").join("settings.json"))
}

fn load_page(path: &Path) -> Result<SnapshotPage, Box<dyn std::error::Error>> {
    let capture = load_capture(path)?;
    Ok(SnapshotPage::from_capture(&capture))
}

fn controller_for(
    page: &SnapshotPage,
    config: &TrackerConfig,
    reporter: Arc<dyn ErrorReporter>,
) -> Result<ObservationController<SnapshotPage, RecordingIndicator>, Box<dyn std::error::Error>> {
    let url = page.location();
    ObservationController::for_location(
        url,
        config,
        TokenEstimator::detect(config.chars_per_token),
        RecordingIndicator::default(),
        reporter,
    )?
    .ok_or_else(|| format!("unsupported page: {url}").into())
}

fn print_usage(usage: &UsageSnapshot) {
    println!("{}  {}", usage.percent_label(), usage.detail_label());
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = load_config(args.config.as_deref())?;
    let reporter: Arc<dyn ErrorReporter> = match &args.report_url {
        Some(url) => Arc::new(HttpReporter::new(url.as_str())?),
        None => Arc::new(TracingReporter),
    };

    match args.command {
        Command::Detect { url } => match detect_platform(&url) {
            Some(platform) => {
                let window = config.context_window(platform);
                println!("{platform} (context window {window} tokens)");
            }
            None => println!("unsupported"),
        },

        Command::Count { capture, json } => {
            let page = load_page(&capture)?;
            let controller = controller_for(&page, &config, reporter)?;
            let mut runtime = Runtime::new(page, controller, &config);
            runtime.start();
            let usage = runtime.controller().usage();
            if json {
                let value = serde_json::json!({
                    "usage": usage,
                    "percent": usage.percent(),
                    "label": usage.percent_label(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print_usage(&usage);
            }
        }

        Command::Extract { capture, json } => {
            let page = load_page(&capture)?;
            let url = page.location();
            let platform = detect_platform(url).ok_or_else(|| format!("unsupported page: {url}"))?;
            let extractor = ConversationExtractor::new(selectors_for(platform))?;
            let transcript = extractor.extract(&page, reporter.as_ref());
            if json {
                println!("{}", serde_json::to_string_pretty(&transcript)?);
            } else {
                print!("{}", transcript.to_text());
            }
        }

        Command::Replay { capture, script } => {
            let page = load_page(&capture)?;
            let steps = replay::parse_script(&std::fs::read_to_string(&script)?)?;
            let controller = controller_for(&page, &config, reporter)?;
            let mut runtime = Runtime::new(page, controller, &config);

            info!(steps = steps.len(), "replaying {:?}", script);
            let settle = config.debounce() * 2;
            replay::replay(&mut runtime, steps, settle).await?;

            let controller = runtime.controller();
            for usage in &controller.indicator().usages {
                print_usage(usage);
            }
            println!("final state: {:?}, recounts: {}", controller.state(), controller.recount_count());
        }

        Command::Batch { input_dir, output } => {
            let estimator = TokenEstimator::detect(config.chars_per_token);
            println!("Processing captures from {:?}...", input_dir);
            let outcome = process_all_captures(&input_dir, &estimator, &config)?;

            println!("Writing output to {:?}...", output);
            let summary = write_jsonl_output(&outcome, &output)?;

            println!("\n[summary]");
            println!("  Captures found: {}", summary.total_captures);
            println!("  Records written: {}", summary.records);
            println!("  Unsupported pages: {}", summary.unsupported);
            println!("  Failed captures: {}", summary.errors);
            println!("  Total messages: {}", summary.total_messages);
            println!("  Total tokens: {}", summary.total_tokens);
            println!("  Output: {:?}", output);
        }

        Command::Summarize {
            capture,
            gateway_url,
            api_key,
        } => {
            let settings = JsonFileSettings::new(settings_path(args.settings)?);
            if let Some(key) = api_key {
                settings.set(keys::API_KEY, &key)?;
            }
            let page = load_page(&capture)?;
            let controller = controller_for(&page, &config, Arc::clone(&reporter))?;
            let mut runtime = Runtime::new(page, controller, &config);
            let action = SummarizeAction::new(HttpGateway::new(gateway_url)?, settings, reporter, &config);

            let result = runtime.summarize(&action).await;
            for notification in &runtime.controller().indicator().notifications {
                eprintln!("{notification}");
            }
            println!("{}", result?);
        }
    }

    Ok(())
}
