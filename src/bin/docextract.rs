//! CLI binary for docextract.
//!
//! `docextract serve` runs the HTTP service; `docextract extract` runs the
//! same pipeline once over local files and prints the model's answer.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docextract::{
    router, AppState, CleanupPolicy, ExtractConfig, ExtractionStats, Extractor, GeminiClient,
    PipelineProgressCallback, ProgressCallback, RemoteFile, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that follows the request through its stages.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage(&self, _request_id: &str, stage: Stage) {
        let (prefix, msg) = match stage {
            Stage::Received | Stage::FilesStored => ("Preparing", "reading files…"),
            Stage::Normalized => ("Uploading", "sending files to Gemini…"),
            Stage::Uploaded => ("Waiting", "Gemini is processing the files…"),
            Stage::FilesReady => ("Extracting", "asking the model…"),
            Stage::Extracted | Stage::Responded => ("Finishing", "cleaning up…"),
            Stage::CleanedUp | Stage::Failed => return,
        };
        self.bar.set_prefix(prefix);
        self.bar.set_message(msg);
    }

    fn on_file_converted(&self, _request_id: &str, original: &str, converted: &str) {
        self.bar
            .println(format!("  {} {} → {}", green("✓"), original, dim(converted)));
    }

    fn on_file_uploaded(&self, _request_id: &str, index: usize, total: usize, remote: &RemoteFile) {
        self.bar.println(format!(
            "  {} uploaded {:>2}/{:<2} {}  {}",
            green("✓"),
            index + 1,
            total,
            remote.display_name,
            dim(&remote.name)
        ));
    }

    fn on_pipeline_complete(&self, _request_id: &str, stats: &ExtractionStats) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} file(s) in {}ms  {}",
            green("✔"),
            stats.files,
            stats.total_duration_ms,
            dim(&format!(
                "{} tokens in / {} tokens out",
                stats.prompt_tokens, stats.completion_tokens
            ))
        );
    }

    fn on_pipeline_error(&self, _request_id: &str, stage: Stage, error: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} failed after {}: {}", red("✘"), stage, error);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on :5000
  docextract serve

  # Upload to the running service
  curl -F files=@invoices.xlsx -F files=@receipt.pdf http://localhost:5000/upload

  # One-off extraction from local files
  docextract extract invoices.xlsx receipt.pdf

  # Full output (files, stats) as JSON
  docextract extract --json --validate-output invoices.xlsx > result.json

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY        Google Gemini API key (required)
  GEMINI_MODEL          Model ID (default: gemini-1.5-flash)
  GEMINI_BASE_URL       Override the API endpoint
  PORT                  Listen port for `serve` (default: 5000)
  UPLOADS_DIR           Root for per-request storage (default: uploads)
  POLL_INTERVAL_SECS    Pause between file status queries (default: 10)
  POLL_MAX_WAIT_SECS    Give up on a file after this long; 0 = never (default: 600)
  CLEANUP_POLICY        always | on-success (default: always)
  UPLOAD_CONCURRENCY    Files uploaded and polled at once (default: 1)
  VALIDATE_OUTPUT       Parse the model's JSON and fail on invalid output
  MAX_UPLOAD_BYTES      Request body cap for /upload (default: 52428800)
"#;

/// Extract invoices, products and customers from documents with Gemini.
#[derive(Parser, Debug)]
#[command(
    name = "docextract",
    version,
    about = "Extract invoices, products and customers from documents with Gemini",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCEXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCEXTRACT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Extract from local files and print the result.
    Extract(ExtractArgs),
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Gemini API key.
    #[arg(long, global = true, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Gemini model ID.
    #[arg(long, global = true, env = "GEMINI_MODEL", default_value = docextract::config::DEFAULT_MODEL)]
    model: String,

    /// Override the Gemini API endpoint.
    #[arg(long, global = true, env = "GEMINI_BASE_URL")]
    base_url: Option<String>,

    /// Per-call HTTP timeout in seconds (0 = none).
    #[arg(long, global = true, env = "GEMINI_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Root directory for per-request storage.
    #[arg(long, global = true, env = "UPLOADS_DIR", default_value = docextract::config::DEFAULT_UPLOADS_ROOT)]
    uploads_dir: PathBuf,

    /// Seconds between file status queries.
    #[arg(long, global = true, env = "POLL_INTERVAL_SECS", default_value_t = 10)]
    poll_interval: u64,

    /// Give up on a file after this many seconds (0 = wait indefinitely).
    #[arg(long, global = true, env = "POLL_MAX_WAIT_SECS", default_value_t = 600)]
    poll_max_wait: u64,

    /// When to remove request storage: always, on-success.
    #[arg(long, global = true, env = "CLEANUP_POLICY", default_value = "always")]
    cleanup: CleanupPolicy,

    /// Files uploaded and polled at once.
    #[arg(long, global = true, env = "UPLOAD_CONCURRENCY", default_value_t = 1)]
    upload_concurrency: usize,

    /// Parse the model's answer and fail when it is not valid JSON.
    #[arg(long, global = true, env = "VALIDATE_OUTPUT")]
    validate_output: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 5000)]
    port: u16,

    /// Listen address.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Request body cap for /upload, in bytes.
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = docextract::server::DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Files to extract from (PDF, images, CSV, XLSX, XLS).
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Print the full output (files, stats, parsed extraction) as JSON.
    #[arg(long)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "DOCEXTRACT_NO_PROGRESS")]
    no_progress: bool,
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = match &cli.command {
        Command::Extract(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Serve(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let extractor = build_extractor(&cli.pipeline, progress_cb)?;

    match cli.command {
        Command::Serve(args) => serve(extractor, args).await,
        Command::Extract(args) => extract(extractor, args, cli.quiet).await,
    }
}

/// Map CLI args to an [`Extractor`].
fn build_extractor(args: &PipelineArgs, progress: Option<ProgressCallback>) -> Result<Extractor> {
    let api_key = args
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .context("GEMINI_API_KEY is not set (use --api-key or the environment variable)")?;

    let timeout = (args.api_timeout > 0).then(|| Duration::from_secs(args.api_timeout));
    let client = match args.base_url {
        Some(ref url) => GeminiClient::with_base_url(api_key, url.as_str(), timeout),
        None => GeminiClient::with_base_url(
            api_key,
            docextract::provider::gemini::DEFAULT_BASE_URL,
            timeout,
        ),
    }
    .context("Failed to create Gemini client")?;

    let max_wait = (args.poll_max_wait > 0).then(|| Duration::from_secs(args.poll_max_wait));
    let mut builder = ExtractConfig::builder()
        .uploads_root(&args.uploads_dir)
        .model(&args.model)
        .poll_interval(Duration::from_secs(args.poll_interval))
        .max_poll_wait(max_wait)
        .cleanup(args.cleanup)
        .upload_concurrency(args.upload_concurrency)
        .validate_output(args.validate_output);
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    Ok(Extractor::new(Arc::new(client), config))
}

async fn serve(extractor: Extractor, args: ServeArgs) -> Result<()> {
    let root = extractor.config().uploads_root.clone();
    tokio::fs::create_dir_all(&root)
        .await
        .with_context(|| format!("Failed to create uploads directory {}", root.display()))?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!(
        "Server running on port {} (model {}, uploads in {})",
        args.port,
        extractor.config().model,
        root.display()
    );

    let app = router(AppState::new(extractor), args.max_upload_bytes);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn extract(extractor: Extractor, args: ExtractArgs, quiet: bool) -> Result<()> {
    let output = extractor
        .extract_files(&args.files)
        .await
        .context("Extraction failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.raw_text.as_bytes())
            .context("Failed to write to stdout")?;
        if !output.raw_text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !quiet && args.no_progress && !args.json {
        eprintln!(
            "Extracted from {} file(s) ({} converted) in {}ms",
            output.stats.files, output.stats.converted_files, output.stats.total_duration_ms
        );
    }
    Ok(())
}
