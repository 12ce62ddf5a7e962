use crate::config::Config;
use crate::error::OcrError;
use crate::orchestrator::{OcrResult, UploadOrchestrator};
use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Multipart field carrying the uploaded image
const IMAGE_FIELD: &str = "image";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<UploadOrchestrator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            orchestrator: Arc::new(UploadOrchestrator::new(config.orchestrator.clone())),
            config: Arc::new(config),
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub command: String,
    pub script: String,
    pub timeout_secs: u64,
    pub max_file_size_bytes: usize,
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let max_file_size = state.config.max_file_size;

    Router::new()
        .route("/api/plates/upload", post(handle_upload))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .layer(DefaultBodyLimit::max(max_file_size))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Handle plate upload requests
async fn handle_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<OcrResult>, OcrError> {
    let mut multipart = multipart.map_err(|e| OcrError::Multipart(e.body_text()))?;
    let max = state.config.max_file_size;

    let mut image: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max))?
    {
        if field.name() != Some(IMAGE_FIELD) || image.is_some() {
            continue;
        }

        tracing::debug!(
            "Received image {:?} ({:?})",
            field.file_name().unwrap_or_default(),
            field.content_type().unwrap_or_default()
        );
        image = Some(field.bytes().await.map_err(|e| multipart_error(e, max))?);
    }

    let image = image.ok_or(OcrError::MissingFile)?;
    let result = state.orchestrator.handle_upload(&image).await?;

    Ok(Json(result))
}

/// Body limit violations surface as multipart read errors carrying 413.
fn multipart_error(err: MultipartError, max: usize) -> OcrError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        OcrError::FileTooLarge { max }
    } else {
        OcrError::Multipart(err.body_text())
    }
}

/// Handle health check requests
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle info requests
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = state.orchestrator.config();
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        command: orchestrator.command.clone(),
        script: orchestrator.script_path().display().to_string(),
        timeout_secs: orchestrator.timeout.as_secs(),
        max_file_size_bytes: state.config.max_file_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "plate-test-boundary";

    fn test_app(script: &str, max_file_size: usize) -> (Router, TempDir) {
        test_app_with(script, |config| config.max_file_size = max_file_size)
    }

    fn test_app_with(script: &str, tweak: impl FnOnce(&mut Config)) -> (Router, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("script.sh"), script).unwrap();

        let mut config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_file_size: 1024 * 1024,
            orchestrator: OrchestratorConfig {
                work_dir: dir.path().to_path_buf(),
                command: "/bin/sh".to_string(),
                script: "script.sh".to_string(),
                input_image: "plate.jpg".to_string(),
                timeout: Duration::from_secs(5),
                fail_on_nonzero_exit: true,
            },
        };
        tweak(&mut config);

        (router(AppState::new(config)), dir)
    }

    fn multipart_request(field: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"car.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post("/api/plates/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_upload_returns_plate_text() {
        let (app, _dir) = test_app("echo ABC123\n", 1024 * 1024);

        let (status, body) = send(app, multipart_request("image", b"jpeg")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "plateText": "ABC123\n" }));
    }

    #[tokio::test]
    async fn test_missing_image_field() {
        let (app, _dir) = test_app("echo ABC123\n", 1024 * 1024);

        let (status, body) = send(app, multipart_request("photo", b"jpeg")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "MISSING_FILE");
    }

    #[tokio::test]
    async fn test_empty_image_field() {
        let (app, _dir) = test_app("echo ABC123\n", 1024 * 1024);

        let (status, body) = send(app, multipart_request("image", b"")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "EMPTY_FILE");
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let (app, dir) = test_app("touch launched.log; echo ABC123\n", 256);

        let (status, body) = send(app, multipart_request("image", &[0u8; 4096])).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "FILE_TOO_LARGE");
        assert!(body["message"].as_str().unwrap().contains("256"));
        assert!(!dir.path().join("launched.log").exists());
    }

    #[tokio::test]
    async fn test_missing_boundary_is_multipart_error() {
        let (app, _dir) = test_app("echo ABC123\n", 1024 * 1024);

        let request = Request::post("/api/plates/upload")
            .header(header::CONTENT_TYPE, "multipart/form-data")
            .body(Body::from("garbage"))
            .unwrap();
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "MULTIPART_ERROR");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_script_timeout_maps_to_gateway_timeout() {
        let (app, _dir) = test_app_with("exec sleep 30\n", |config| {
            config.orchestrator.timeout = Duration::from_secs(1)
        });

        let (status, body) = send(app, multipart_request("image", b"jpeg")).await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "OCR_TIMEOUT");
    }

    #[tokio::test]
    async fn test_failing_script_maps_to_bad_gateway() {
        let (app, _dir) = test_app("echo 'cannot read image'; exit 2\n", 1024 * 1024);

        let (status, body) = send(app, multipart_request("image", b"jpeg")).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "SCRIPT_FAILED");
        assert_eq!(body["message"], "Recognition script exited with status 2");
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _dir) = test_app("echo\n", 1024);

        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_info() {
        let (app, _dir) = test_app("echo\n", 2048);

        let request = Request::get("/info").body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["command"], "/bin/sh");
        assert_eq!(body["timeout_secs"], 5);
        assert_eq!(body["max_file_size_bytes"], 2048);
        assert!(body["script"].as_str().unwrap().ends_with("script.sh"));
    }
}
