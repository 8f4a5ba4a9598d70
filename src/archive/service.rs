use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

use super::{extract, DriveFetcher, Layout};
use crate::app::{
    error::GatewayError,
    settings::{DriveSettings, GatewaySettings},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IngestFlow {
    /// Model weights: flat files, added next to whatever is already there.
    Weights,
    /// Training audio: folder structure kept, destination replaced.
    Dataset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestPlan {
    pub flow: IngestFlow,
    pub remote_id: String,
    pub staging_path: PathBuf,
    pub destination: PathBuf,
    pub suffix: String,
    pub layout: Layout,
    pub clear_before_extract: bool,
}

impl IngestPlan {
    /// `destination` overrides the flow's storage root (a dataset subfolder).
    pub fn new(
        flow: IngestFlow,
        settings: &GatewaySettings,
        remote_id: String,
        destination: Option<PathBuf>,
    ) -> Self {
        let staging_path = settings
            .staging_dir
            .join(format!("ingest-{}.archive", Uuid::new_v4()));
        match flow {
            IngestFlow::Weights => Self {
                flow,
                remote_id,
                staging_path,
                destination: destination.unwrap_or_else(|| settings.weights_dir.clone()),
                suffix: settings.weights_suffix.clone(),
                layout: Layout::Flatten,
                clear_before_extract: false,
            },
            IngestFlow::Dataset => Self {
                flow,
                remote_id,
                staging_path,
                destination: destination.unwrap_or_else(|| settings.dataset_dir.clone()),
                suffix: settings.dataset_suffix.clone(),
                layout: Layout::Preserve,
                clear_before_extract: true,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub flow: IngestFlow,
    pub destination: PathBuf,
    pub files: usize,
    pub archive_bytes: u64,
    pub checksum: String,
}

/// Downloads the plan's archive and extracts the matching entries. Blocking.
pub fn ingest(plan: &IngestPlan, drive: &DriveSettings) -> Result<IngestOutcome, GatewayError> {
    tracing::info!(
        "Ingesting drive file {} into {} ({:?})",
        plan.remote_id,
        plan.destination.display(),
        plan.flow
    );
    let fetcher = DriveFetcher::new(drive).map_err(GatewayError::download)?;
    let fetched = fetcher
        .fetch(&plan.remote_id, &plan.staging_path)
        .map_err(GatewayError::download)?;

    let extracted = extract(
        &fetched.path,
        &plan.destination,
        &plan.suffix,
        plan.layout,
        plan.clear_before_extract,
    )?;

    Ok(IngestOutcome {
        flow: plan.flow,
        destination: plan.destination.clone(),
        files: extracted.files.len(),
        archive_bytes: fetched.bytes,
        checksum: fetched.checksum,
    })
}
