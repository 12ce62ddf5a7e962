use crate::Args;
use anyhow::bail;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_file_size: usize,
    pub orchestrator: OrchestratorConfig,
}

/// Settings for staging uploads and running the recognition script.
///
/// Fixed at startup and shared read-only by every request.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory containing the script; per-request staging directories
    /// are created inside it.
    pub work_dir: PathBuf,
    pub command: String,
    pub script: String,
    /// Name the uploaded image is written under in its staging directory.
    pub input_image: String,
    pub timeout: Duration,
    pub fail_on_nonzero_exit: bool,
}

impl OrchestratorConfig {
    /// Script location as configured; may be relative to the server's cwd.
    pub fn script_path(&self) -> PathBuf {
        self.work_dir.join(&self.script)
    }
}

impl TryFrom<Args> for Config {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> anyhow::Result<Self> {
        ensure_file_name("--script", &args.script)?;
        ensure_file_name("--input-image", &args.input_image)?;

        if args.timeout_secs == 0 {
            bail!("--timeout-secs must be greater than zero");
        }

        Ok(Self {
            host: args.host,
            port: args.port,
            max_file_size: args.max_file_size,
            orchestrator: OrchestratorConfig {
                work_dir: PathBuf::from(args.work_dir),
                command: args.command,
                script: args.script,
                input_image: args.input_image,
                timeout: Duration::from_secs(args.timeout_secs),
                fail_on_nonzero_exit: !args.allow_nonzero_exit,
            },
        })
    }
}

/// Rejects values that would escape the directory they are joined onto.
fn ensure_file_name(flag: &str, value: &str) -> anyhow::Result<()> {
    let is_plain = Path::new(value)
        .file_name()
        .is_some_and(|name| name == value);
    if !is_plain {
        bail!("{} must be a plain file name, got {:?}", flag, value);
    }
    Ok(())
}
