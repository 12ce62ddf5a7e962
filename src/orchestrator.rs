//! Upload handling: stage the image, run the recognition script, return
//! whatever it printed.

use crate::config::OrchestratorConfig;
use crate::error::OcrError;
use crate::process;
use crate::staging::StagedInput;
use serde::Serialize;
use std::time::Instant;
use tokio::process::Command;

/// Text captured from one run of the recognition script
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub plate_text: String,
}

/// Runs the configured recognition script against uploaded images
pub struct UploadOrchestrator {
    config: OrchestratorConfig,
}

impl UploadOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Stage `image`, run the script on it and return its combined output.
    ///
    /// The staged file and its directory are gone by the time this returns,
    /// on success and on every error path.
    pub async fn handle_upload(&self, image: &[u8]) -> Result<OcrResult, OcrError> {
        if image.is_empty() {
            return Err(OcrError::EmptyFile);
        }

        let start = Instant::now();

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        // The child runs inside the staging directory, so the script must be
        // addressed absolutely.
        let work_dir = tokio::fs::canonicalize(&self.config.work_dir).await?;
        tracing::debug!("Working directory ready at {}", work_dir.display());

        let staged = StagedInput::write(&work_dir, &self.config.input_image, image).await?;

        let mut cmd = Command::new(&self.config.command);
        cmd.arg(work_dir.join(&self.config.script))
            .arg(staged.image_path())
            .current_dir(staged.dir());

        let finished = process::run_merged(cmd, self.config.timeout).await;
        staged.remove().await;
        let finished = finished?;

        let code = finished.status.code();
        tracing::info!(
            "Script finished in {}ms, exit code: {:?}, output length: {}",
            start.elapsed().as_millis(),
            code,
            finished.output.len()
        );

        if self.config.fail_on_nonzero_exit && !finished.status.success() {
            return Err(OcrError::ScriptFailed {
                code,
                output: finished.output,
            });
        }

        Ok(OcrResult {
            plate_text: finished.output,
        })
    }
}
