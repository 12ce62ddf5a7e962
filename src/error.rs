use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Upload exceeds the maximum size of {max} bytes")]
    FileTooLarge { max: usize },

    #[error("Malformed multipart request: {0}")]
    Multipart(String),

    #[error("Missing `image` field in request")]
    MissingFile,

    #[error("Uploaded image is empty")]
    EmptyFile,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Recognition script did not finish within {}s", .timeout.as_secs())]
    Timeout { timeout: Duration },

    #[error("Recognition script printed more than {max} bytes")]
    OutputTooLarge { max: usize },

    #[error("Recognition script exited with {}", describe_exit(.code))]
    ScriptFailed { code: Option<i32>, output: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl OcrError {
    pub fn status(&self) -> StatusCode {
        match self {
            OcrError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            OcrError::Multipart(_) | OcrError::MissingFile | OcrError::EmptyFile => {
                StatusCode::BAD_REQUEST
            }
            OcrError::Io(_) | OcrError::Launch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            OcrError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            OcrError::OutputTooLarge { .. } | OcrError::ScriptFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            OcrError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            OcrError::Multipart(_) => "MULTIPART_ERROR",
            OcrError::MissingFile => "MISSING_FILE",
            OcrError::EmptyFile => "EMPTY_FILE",
            OcrError::Io(_) => "IO_ERROR",
            OcrError::Launch { .. } => "LAUNCH_ERROR",
            OcrError::Timeout { .. } => "OCR_TIMEOUT",
            OcrError::OutputTooLarge { .. } => "OUTPUT_TOO_LARGE",
            OcrError::ScriptFailed { .. } => "SCRIPT_FAILED",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for OcrError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            match &self {
                OcrError::ScriptFailed { output, .. } => {
                    tracing::error!("{}; output: {:?}", self, output)
                }
                _ => tracing::error!("{}", self),
            }
        } else {
            tracing::warn!("Rejected upload: {}", self);
        }

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}
