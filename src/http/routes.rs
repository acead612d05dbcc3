use axum::extract::{multipart::Field, DefaultBodyLimit, Multipart, State};
use axum::middleware;
use axum::routing::post;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use super::auth::api_key_auth;
use super::AppState;
use crate::db::PocRecord;
use crate::error::AppError;
use crate::task_id::Mode;
use crate::types::{post_process, PocQuery, SubmitResponse, VerifyAllResponse, VerifyPocs};

pub fn build_router(state: AppState) -> Router {
    let private = Router::new()
        .route("/submit-fix", post(submit_fix))
        .route("/query-poc", post(query_poc))
        .route("/verify-agent-pocs", post(verify_agent_pocs))
        .route_layer(middleware::from_fn_with_state(state.clone(), api_key_auth));

    let public = Router::new().route("/submit-vul", post(submit_vul));

    public
        .merge(private)
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn submit_vul(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SubmitResponse>, AppError> {
    handle_submit(state, multipart, Mode::Vul).await
}

async fn submit_fix(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SubmitResponse>, AppError> {
    handle_submit(state, multipart, Mode::Fix).await
}

async fn handle_submit(
    state: AppState,
    mut multipart: Multipart,
    mode: Mode,
) -> Result<Json<SubmitResponse>, AppError> {
    let mut metadata: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::InvalidMetadata)?
    {
        match field.name() {
            Some("metadata") => {
                metadata = Some(field.text().await.map_err(|_| AppError::InvalidMetadata)?);
            }
            Some("file") => {
                file_bytes = Some(read_limited_field(field, state.config.max_file_size_mb).await?);
            }
            _ => {}
        }
    }

    let metadata = metadata.ok_or(AppError::InvalidMetadata)?;
    let file_bytes = file_bytes.ok_or(AppError::InvalidMetadata)?;

    let payload: crate::types::Payload =
        serde_json::from_str(&metadata).map_err(|_| AppError::InvalidMetadata)?;

    let require_flag = payload.require_flag;
    let task_id = payload.task_id.clone();

    let outcome = state.coordinator.submit(&payload, file_bytes, mode).await?;

    Ok(Json(post_process(
        task_id,
        outcome.exit_code,
        outcome.output,
        outcome.poc_id,
        require_flag,
    )))
}

/// Reads a multipart field up to `(max_file_size_mb * 1MiB) + 1` bytes —
/// the extra byte is what lets us distinguish "exactly at the limit"
/// from "over the limit" without buffering unbounded data.
async fn read_limited_field(mut field: Field<'_>, max_file_size_mb: u64) -> Result<Vec<u8>, AppError> {
    let max_bytes = max_file_size_mb * 1024 * 1024;
    let mut buf = Vec::new();

    while let Some(chunk) = field.chunk().await.map_err(|_| AppError::InvalidMetadata)? {
        buf.extend_from_slice(&chunk);
        if buf.len() as u64 > max_bytes {
            return Err(AppError::FileTooLarge(max_file_size_mb));
        }
    }

    Ok(buf)
}

async fn query_poc(
    State(state): State<AppState>,
    Json(query): Json<PocQuery>,
) -> Result<Json<Vec<PocRecord>>, AppError> {
    let records = state
        .coordinator
        .store()
        .get_by_query(query.agent_id.as_deref(), query.task_id.as_deref())
        .await?;

    if records.is_empty() {
        return Err(AppError::RecordNotFound);
    }

    Ok(Json(records))
}

async fn verify_agent_pocs(
    State(state): State<AppState>,
    Json(query): Json<VerifyPocs>,
) -> Result<Json<VerifyAllResponse>, AppError> {
    let poc_ids = state.coordinator.verify_all(&query.agent_id).await?;
    let message = format!(
        "All {} PoCs for this agent_id have been verified",
        poc_ids.len()
    );

    Ok(Json(VerifyAllResponse { message, poc_ids }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::blob::BlobStore;
    use crate::checksum::compute_checksum;
    use crate::config::Config;
    use crate::coordinator::Coordinator;
    use crate::db::PocStore;
    use crate::sandbox::{ContainerEngine, ContainerSpec, RunOutcome};

    struct FakeEngine;

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn run(&self, _spec: ContainerSpec, _docker_timeout: Duration) -> Result<RunOutcome, AppError> {
            Ok(RunOutcome {
                exit_code: 0,
                output: Vec::new(),
            })
        }
    }

    async fn test_app(max_file_size_mb: u64) -> (Router, tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let store = PocStore::connect("sqlite::memory:").await.unwrap();
        let blobs = BlobStore::new(dir.path());
        let config = Config {
            host: "127.0.0.1".parse().unwrap(),
            port: 8666,
            salt: "test-salt".to_string(),
            log_dir: dir.path().to_path_buf(),
            db_path: dir.path().join("poc.db"),
            binary_dir: None,
            max_file_size_mb,
            api_key: "key".to_string(),
            api_key_name: "X-API-Key".to_string(),
            docker_timeout_secs: 30,
            cmd_timeout_secs: 10,
            enable_oss_fuzz_latest: false,
        };
        let app_config = config.clone();
        let coordinator = Arc::new(Coordinator::new(store, blobs, config, Arc::new(FakeEngine)));
        let state = AppState {
            coordinator,
            config: Arc::new(app_config.clone()),
        };
        (build_router(state), dir, app_config)
    }

    fn multipart_body(boundary: &str, metadata: &str, file_bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"metadata\"\r\n\r\n");
        body.extend_from_slice(metadata.as_bytes());
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"poc.bin\"\r\n");
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(file_bytes);
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body
    }

    fn submit_request(boundary: &str, metadata: &str, file_bytes: &[u8]) -> Request<Body> {
        Request::builder()
            .uri("/submit-vul")
            .method("POST")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(multipart_body(boundary, metadata, file_bytes)))
            .unwrap()
    }

    #[tokio::test]
    async fn file_exactly_at_the_limit_succeeds() {
        let (app, _dir, config) = test_app(1).await;
        let file_bytes = vec![b'a'; (config.max_file_size_bytes()) as usize];
        let metadata = serde_json::json!({
            "task_id": "arvo:1",
            "agent_id": "agent-a",
            "checksum": compute_checksum("arvo:1", "agent-a", &config.salt),
            "require_flag": false,
        })
        .to_string();

        let response = app
            .oneshot(submit_request("X-BOUNDARY", &metadata, &file_bytes))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn file_one_byte_over_the_limit_is_rejected() {
        let (app, _dir, config) = test_app(1).await;
        let file_bytes = vec![b'a'; (config.max_file_size_bytes() + 1) as usize];
        let metadata = serde_json::json!({
            "task_id": "arvo:1",
            "agent_id": "agent-a",
            "checksum": compute_checksum("arvo:1", "agent-a", &config.salt),
            "require_flag": false,
        })
        .to_string();

        let response = app
            .oneshot(submit_request("X-BOUNDARY", &metadata, &file_bytes))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
