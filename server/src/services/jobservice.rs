use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use joblib::storage::ObjectStore;
use joblib::{JobError, JobOutcome, JobRequest, Orchestrator};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

pub type JobOrchestrator = Orchestrator<dyn ObjectStore>;

/// Shared state of the HTTP surface: one orchestrator, and with it one admission gate.
#[derive(Clone)]
pub struct JobService {
    orchestrator: Arc<JobOrchestrator>,
}

impl JobService {
    pub fn new(orchestrator: Arc<JobOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/preprocess", post(preprocess))
            .route("/generate", post(generate))
            .route("/health", get(health))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    /// Run the job on its own task so a dropped connection cannot cancel it halfway.
    async fn execute(&self, request: JobRequest) -> Result<JobOutcome, ApiError> {
        let orchestrator = self.orchestrator.clone();
        match tokio::spawn(async move { orchestrator.run(request).await }).await {
            Ok(outcome) => Ok(outcome?),
            Err(join_err) => {
                error!(error = %join_err, "job task did not complete");
                Err(ApiError::internal("Job execution aborted unexpectedly"))
            }
        }
    }
}

/// Error response carrying `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        let status = match &err {
            JobError::Busy => StatusCode::TOO_MANY_REQUESTS,
            JobError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            JobError::InvalidLocation { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = wire::ErrorResponse {
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

async fn preprocess(
    State(service): State<JobService>,
    payload: Result<Json<wire::PreprocessRequest>, JsonRejection>,
) -> Result<Json<wire::PreprocessResponse>, ApiError> {
    let Json(payload) = payload?;
    let request = JobRequest::try_from(payload)?;
    let outcome = service.execute(request).await?;
    Ok(Json(outcome.into()))
}

async fn generate(
    State(service): State<JobService>,
    payload: Result<Json<wire::GenerateRequest>, JsonRejection>,
) -> Result<Json<wire::GenerateResponse>, ApiError> {
    let Json(payload) = payload?;
    let request = JobRequest::try_from(payload)?;
    let outcome = service.execute(request).await?;
    Ok(Json(outcome.into()))
}

async fn health(State(service): State<JobService>) -> Json<wire::HealthResponse> {
    Json(wire::HealthResponse {
        status: "ok".to_string(),
        busy: service.orchestrator.gate().is_busy(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use joblib::command::CommandSettings;
    use joblib::storage::{ObjectEntry, StorageError, StorageResult};
    use joblib::{AdmissionGate, PipelineSettings};
    use std::path::Path;
    use std::time::Duration;
    use tower::ServiceExt;

    /// A store that holds nothing.
    struct EmptyStore;

    #[async_trait]
    impl ObjectStore for EmptyStore {
        async fn get_object_to_path(&self, bucket: &str, key: &str, _: &Path) -> StorageResult<()> {
            Err(StorageError::NotFound(format!("s3://{bucket}/{key}")))
        }

        async fn list_objects(&self, _: &str, _: &str) -> StorageResult<Vec<ObjectEntry>> {
            Ok(vec![])
        }

        async fn put_object_from_path(&self, _: &str, _: &str, _: &Path) -> StorageResult<()> {
            Err(StorageError::Remote("read only".into()))
        }

        async fn presign_get(&self, _: &str, _: &str, _: Duration) -> StorageResult<String> {
            Err(StorageError::Remote("read only".into()))
        }
    }

    /// A store whose downloads blow up mid-job.
    struct PanickingStore;

    #[async_trait]
    impl ObjectStore for PanickingStore {
        async fn get_object_to_path(&self, _: &str, _: &str, _: &Path) -> StorageResult<()> {
            panic!("store connection poisoned");
        }

        async fn list_objects(&self, _: &str, _: &str) -> StorageResult<Vec<ObjectEntry>> {
            panic!("store connection poisoned");
        }

        async fn put_object_from_path(&self, _: &str, _: &str, _: &Path) -> StorageResult<()> {
            panic!("store connection poisoned");
        }

        async fn presign_get(&self, _: &str, _: &str, _: Duration) -> StorageResult<String> {
            panic!("store connection poisoned");
        }
    }

    fn service(workspace_root: &Path) -> JobService {
        service_with(workspace_root, Arc::new(EmptyStore))
    }

    fn service_with(workspace_root: &Path, store: Arc<dyn ObjectStore>) -> JobService {
        let settings = PipelineSettings {
            command: CommandSettings {
                python: "sh".into(),
                project_root: workspace_root.to_path_buf(),
                inherited_pythonpath: None,
                preprocess_script: "preprocess.sh".into(),
                generate_script: "generate.sh".into(),
                preprocess_ckpt_path: "/ckpt/process".into(),
                inference_ckpt_path: "/ckpt/animate".into(),
            },
            output_bucket: "outputs".into(),
            upload_prefix: "base".into(),
            workspace_root: workspace_root.join("workspaces"),
            gate_timeout: Duration::from_millis(20),
            process_timeout: Duration::from_secs(10),
            url_expiry: Duration::from_secs(3600),
            line_capacity: 16,
        };
        let orchestrator = Orchestrator::new(AdmissionGate::new(), store, Arc::new(settings));
        JobService::new(Arc::new(orchestrator))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(service: &JobService, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = service.clone().router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn valid_preprocess() -> serde_json::Value {
        serde_json::json!({
            "video_path": "s3://media/in/clip.mp4",
            "refer_path": "s3://media/in/face.png",
            "resolution_area": [1280, 720],
        })
    }

    #[tokio::test]
    async fn health_reports_idle_gate() {
        let scratch = tempfile::tempdir().unwrap();
        let service = service(scratch.path());
        let request = Request::get("/health").body(Body::empty()).unwrap();

        let (status, body) = send(&service, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["busy"], false);
    }

    #[tokio::test]
    async fn conflicting_flags_are_unprocessable() {
        let scratch = tempfile::tempdir().unwrap();
        let service = service(scratch.path());
        let mut body = valid_preprocess();
        body["replace_flag"] = true.into();
        body["use_flux"] = true.into();
        body["retarget_flag"] = true.into();

        let (status, body) = send(&service, post_json("/preprocess", body)).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let detail = body["detail"].as_str().unwrap();
        assert!(detail.contains("cannot be True simultaneously"), "{detail}");
    }

    #[tokio::test]
    async fn multi_card_generation_requires_sharding() {
        let scratch = tempfile::tempdir().unwrap();
        let service = service(scratch.path());
        let body = serde_json::json!({
            "task": "animate-14B",
            "src_root_path": "s3://media/runs/7",
            "nproc_per_node": 4,
        });

        let (status, _) = send(&service, post_json("/generate", body)).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn missing_field_is_unprocessable() {
        let scratch = tempfile::tempdir().unwrap();
        let service = service(scratch.path());
        let body = serde_json::json!({ "video_path": "s3://media/in/clip.mp4" });

        let (status, body) = send(&service, post_json("/preprocess", body)).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn unparseable_location_is_bad_request() {
        let scratch = tempfile::tempdir().unwrap();
        let service = service(scratch.path());
        let mut body = valid_preprocess();
        body["video_path"] = "ftp://media/in/clip.mp4".into();

        let (status, _) = send(&service, post_json("/preprocess", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn busy_gate_is_too_many_requests() {
        let scratch = tempfile::tempdir().unwrap();
        let service = service(scratch.path());
        let held = service
            .orchestrator
            .gate()
            .acquire(Duration::from_millis(10))
            .await
            .unwrap();

        let (status, body) = send(&service, post_json("/preprocess", valid_preprocess())).await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["detail"], "System busy, please try again later");
        held.release();
    }

    #[tokio::test]
    async fn failed_download_is_internal_error() {
        let scratch = tempfile::tempdir().unwrap();
        let service = service(scratch.path());

        let (status, body) = send(&service, post_json("/preprocess", valid_preprocess())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let detail = body["detail"].as_str().unwrap();
        assert!(detail.contains("s3://media/in/clip.mp4"), "{detail}");
        assert!(!service.orchestrator.gate().is_busy());
    }

    #[tokio::test]
    async fn panicking_job_is_internal_error_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let service = service_with(scratch.path(), Arc::new(PanickingStore));

        let (status, body) = send(&service, post_json("/preprocess", valid_preprocess())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Job execution aborted unexpectedly");
        assert!(!service.orchestrator.gate().is_busy());
        let leftovers = std::fs::read_dir(scratch.path().join("workspaces"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0, "workspace left behind");
    }
}
