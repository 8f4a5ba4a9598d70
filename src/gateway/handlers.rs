use std::{convert::Infallible, time::Instant};

use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::Reply;

use crate::app::{AppState, GatewayError};
use crate::archive::{ingest, parse_remote_id, IngestFlow, IngestPlan};
use crate::jobs::{FlagParams, JobResult, Operation};
use crate::storage::{self, StoredEntry};

// =============================================================================
// Request/Response types
// =============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DownloadRequest {
    #[serde(default, alias = "url")]
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DatasetDownloadRequest {
    #[serde(default, alias = "url")]
    pub id: Option<String>,
    #[serde(default)]
    pub subfolder_name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SubfolderQuery {
    pub subfolder_name: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IngestResponse {
    pub status: String,
    pub message: String,
    pub files: usize,
    pub checksum: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct JobResponse {
    pub output: String,
    pub error: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub truncated: bool,
}

impl From<JobResult> for JobResponse {
    fn from(result: JobResult) -> Self {
        Self {
            output: result.stdout,
            error: result.stderr,
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            truncated: result.truncated,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PingResponse {
    pub ping: String,
    pub latency: f64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ListingResponse {
    pub entries: Vec<StoredEntry>,
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn ping(started: Instant) -> Result<impl Reply, Infallible> {
    Ok(respond(Ok(PingResponse {
        ping: "pong".into(),
        latency: started.elapsed().as_secs_f64(),
    })))
}

pub async fn download_weights(
    body: DownloadRequest,
    state: AppState,
) -> Result<impl Reply, Infallible> {
    Ok(respond(
        run_ingest(&state, IngestFlow::Weights, body.id, None).await,
    ))
}

pub async fn download_dataset(
    body: DatasetDownloadRequest,
    state: AppState,
) -> Result<impl Reply, Infallible> {
    Ok(respond(
        run_ingest(&state, IngestFlow::Dataset, body.id, body.subfolder_name).await,
    ))
}

pub async fn remove_dataset(state: AppState) -> Result<impl Reply, Infallible> {
    Ok(respond(clear_dataset(&state).await))
}

pub async fn remove_dataset_subfolder(
    query: SubfolderQuery,
    state: AppState,
) -> Result<impl Reply, Infallible> {
    Ok(respond(clear_subfolder(&state, query.subfolder_name).await))
}

pub async fn list_weights(state: AppState) -> Result<impl Reply, Infallible> {
    let weights_dir = state.settings().weights_dir.clone();
    Ok(respond(list_directory(weights_dir).await))
}

pub async fn list_dataset(state: AppState) -> Result<impl Reply, Infallible> {
    let dataset_dir = state.settings().dataset_dir.clone();
    Ok(respond(list_directory(dataset_dir).await))
}

pub async fn run_job(
    operation: Operation,
    body: serde_json::Value,
    state: AppState,
) -> Result<impl Reply, Infallible> {
    let params = match FlagParams::from_json(body) {
        Ok(params) => params,
        Err(err) => return Ok(error_response(&err)),
    };
    let result = state.dispatcher().dispatch(operation, &params).await;
    Ok(respond(Ok(JobResponse::from(result))))
}

// =============================================================================
// Helpers
// =============================================================================

async fn run_ingest(
    state: &AppState,
    flow: IngestFlow,
    remote: Option<String>,
    subfolder: Option<String>,
) -> Result<IngestResponse, GatewayError> {
    let remote_id = parse_remote_id(remote.as_deref().unwrap_or_default())?;
    let settings = state.settings();
    let root = match flow {
        IngestFlow::Weights => settings.weights_dir.clone(),
        IngestFlow::Dataset => settings.dataset_dir.clone(),
    };
    let destination = subfolder
        .map(|name| storage::subfolder_path(&root, &name))
        .transpose()?;

    let guard = state.locks().acquire(&root).await?;
    let plan = IngestPlan::new(flow, &settings, remote_id, destination);
    // The guard travels with the blocking work so a dropped request cannot
    // release the lock while the directory is still being written.
    let outcome = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        ingest(&plan, &settings.drive)
    })
    .await??;

    Ok(IngestResponse {
        status: "success".into(),
        message: format!(
            "Files extracted successfully: {} file(s) in {}",
            outcome.files,
            outcome.destination.display()
        ),
        files: outcome.files,
        checksum: outcome.checksum,
    })
}

async fn clear_dataset(state: &AppState) -> Result<StatusResponse, GatewayError> {
    let settings = state.settings();
    let guard = state.locks().acquire(&settings.dataset_dir).await?;
    let dataset_dir = settings.dataset_dir.clone();
    tokio::task::spawn_blocking(move || {
        let _guard = guard;
        storage::remove_tree(&dataset_dir)
    })
    .await??;
    tracing::info!("Removed dataset directory {}", settings.dataset_dir.display());
    Ok(StatusResponse {
        status: "success".into(),
        message: "Dataset directory removed".into(),
    })
}

async fn clear_subfolder(state: &AppState, name: String) -> Result<StatusResponse, GatewayError> {
    let settings = state.settings();
    let guard = state.locks().acquire(&settings.dataset_dir).await?;
    let dataset_dir = settings.dataset_dir.clone();
    let target = name.clone();
    tokio::task::spawn_blocking(move || {
        let _guard = guard;
        storage::remove_subfolder(&dataset_dir, &target)
    })
    .await??;
    tracing::info!("Removed dataset subfolder {name:?}");
    Ok(StatusResponse {
        status: "success".into(),
        message: format!("Subfolder {name} removed"),
    })
}

async fn list_directory(path: std::path::PathBuf) -> Result<ListingResponse, GatewayError> {
    let entries = tokio::task::spawn_blocking(move || storage::list(&path)).await??;
    Ok(ListingResponse { entries })
}

fn respond<T: Serialize>(result: Result<T, GatewayError>) -> warp::reply::Response {
    match result {
        Ok(body) => {
            warp::reply::with_status(warp::reply::json(&body), StatusCode::OK).into_response()
        }
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &GatewayError) -> warp::reply::Response {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!("Request failed: {err}");
    } else {
        tracing::debug!("Request rejected: {err}");
    }
    warp::reply::with_status(warp::reply::json(&err.body()), status).into_response()
}
