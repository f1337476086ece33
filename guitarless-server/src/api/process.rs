//! Job submission endpoints
//!
//! `POST /process` (and its legacy alias `/songprocessing`) takes a JSON
//! `{"url": ...}`; `POST /upload` takes a multipart form with a `file`
//! field. Both wait until the job finishes and answer with the artifact
//! URLs, or an `{"error": ...}` body.

use axum::{
    extract::{rejection::JsonRejection, multipart::Field, DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::JobInput;
use crate::services::JobOutcome;
use crate::AppState;

/// Multipart field carrying the uploaded audio
pub const UPLOAD_FIELD: &str = "file";

/// POST /process request body
#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub url: Option<String>,
}

/// Successful job response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub isolated_mix_url: String,
    pub remainder_mix_url: String,
    pub job_name: String,
}

impl From<JobOutcome> for ProcessResponse {
    fn from(outcome: JobOutcome) -> Self {
        Self {
            isolated_mix_url: outcome.isolated_mix_url,
            remainder_mix_url: outcome.remainder_mix_url,
            job_name: outcome.job_name,
        }
    }
}

/// POST /process
pub async fn process_url(
    State(state): State<AppState>,
    payload: Result<Json<ProcessRequest>, JsonRejection>,
) -> ApiResult<Json<ProcessResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let url = request
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No URL provided".to_string()))?;

    info!(url = %url, "Processing request received");
    run_job(&state, JobInput::Url(url)).await
}

/// POST /upload
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ProcessResponse>> {
    let uploads = state.orchestrator.settings().paths.uploads.clone();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(sanitize_file_name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ApiError::BadRequest("No selected file".to_string()))?;

        let stored = uploads.join(format!("{}_{}", Uuid::new_v4().simple(), file_name));
        if let Err(err) = store_field(field, &stored).await {
            if let Err(e) = tokio::fs::remove_file(&stored).await {
                warn!(path = %stored.display(), error = %e, "Failed to remove partial upload");
            }
            return Err(err);
        }

        info!(file_name = %file_name, stored = %stored.display(), "Upload stored");
        return run_job(
            &state,
            JobInput::Upload {
                path: stored,
                file_name,
            },
        )
        .await;
    }

    Err(ApiError::BadRequest("No file part".to_string()))
}

async fn store_field(mut field: Field<'_>, path: &Path) -> ApiResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0usize;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len();
    }
    file.flush().await?;

    if written == 0 {
        return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
    }
    Ok(())
}

/// Run the job on its own task and wait for it
///
/// A client that disconnects drops this future, not the job.
async fn run_job(state: &AppState, input: JobInput) -> ApiResult<Json<ProcessResponse>> {
    let error = match state.orchestrator.submit(input).await {
        Ok(Ok(outcome)) => return Ok(Json(outcome.into())),
        Ok(Err(err)) => ApiError::from(err),
        Err(join_error) => {
            error!(error = %join_error, "Job task failed");
            ApiError::Internal(format!("Job task failed: {}", join_error))
        }
    };
    *state.last_error.write().await = Some(error.to_string());
    Err(error)
}

/// Reduce a client-supplied name to a safe single path component
///
/// Drops any directory part, replaces characters outside
/// `[A-Za-z0-9 ._-]` with `_`, and strips leading dots.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim().trim_start_matches('.').to_string()
}

/// Build job submission routes
pub fn process_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/process", post(process_url))
        .route("/songprocessing", post(process_url))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
}
