use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod orchestrator;
mod process;
mod server;
mod staging;

#[derive(Parser, Debug)]
#[command(name = "plate-ocr-server")]
#[command(about = "HTTP front for an external license plate recognition script")]
#[command(version)]
pub struct Args {
    /// Host address to bind to
    #[arg(long, env = "PLATE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PLATE_PORT", default_value = "8080")]
    pub port: u16,

    /// Directory holding the recognition script; uploads are staged below it
    #[arg(long, env = "PLATE_WORK_DIR", default_value = "/opt/deadplate")]
    pub work_dir: String,

    /// Executable used to run the script (e.g. an interpreter)
    #[arg(long, env = "PLATE_COMMAND", default_value = "python3")]
    pub command: String,

    /// Script file name inside the working directory
    #[arg(long, env = "PLATE_SCRIPT", default_value = "deadplate.py")]
    pub script: String,

    /// File name the uploaded image is written under
    #[arg(long, env = "PLATE_INPUT_IMAGE", default_value = "plate.jpg")]
    pub input_image: String,

    /// Maximum time to wait for the script, in seconds
    #[arg(long, env = "PLATE_TIMEOUT_SECS", default_value = "30")]
    pub timeout_secs: u64,

    /// Maximum upload size in bytes (default: 10MB)
    #[arg(long, env = "PLATE_MAX_FILE_SIZE", default_value = "10485760")]
    pub max_file_size: usize,

    /// Return script output even when it exits with a non-zero status
    #[arg(long, env = "PLATE_ALLOW_NONZERO_EXIT")]
    pub allow_nonzero_exit: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::try_from(args)?;

    tracing::info!("Starting plate-ocr-server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Running `{} {}` in {} (timeout {}s)",
        config.orchestrator.command,
        config.orchestrator.script,
        config.orchestrator.work_dir.display(),
        config.orchestrator.timeout.as_secs()
    );

    server::run(config).await
}
