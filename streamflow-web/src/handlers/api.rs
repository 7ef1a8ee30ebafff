//! JSON API handlers for transfer metadata, stats and health

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use streamflow_core::service::parse_info_hash;
use streamflow_core::transfer::FileEntry;
use streamflow_core::{TransferMetadata, TransferStats};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct MetadataQuery {
    pub magnet: Option<String>,
}

/// A file as listed to the player.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub name: String,
    pub index: usize,
    pub size: u64,
    pub path: String,
    #[serde(rename = "type")]
    pub mime_type: String,
}

impl From<&FileEntry> for FileResponse {
    fn from(file: &FileEntry) -> Self {
        Self {
            name: file.name.clone(),
            index: file.index,
            size: file.length,
            path: file.path.clone(),
            mime_type: file.mime_type.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataResponse {
    pub info_hash: String,
    pub name: String,
    pub files: Vec<FileResponse>,
    pub subtitles: Vec<FileResponse>,
}

impl From<TransferMetadata> for MetadataResponse {
    fn from(metadata: TransferMetadata) -> Self {
        Self {
            info_hash: metadata.info_hash.to_string(),
            name: metadata.name,
            files: metadata.files.iter().map(FileResponse::from).collect(),
            subtitles: metadata.subtitles.iter().map(FileResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub progress: f64,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub num_peers: u32,
    /// Seconds, `null` while stalled
    pub time_remaining: Option<u64>,
    pub downloaded: u64,
    pub length: u64,
    pub bytes_remaining: u64,
}

impl From<TransferStats> for StatsResponse {
    fn from(stats: TransferStats) -> Self {
        Self {
            progress: stats.progress,
            download_speed: stats.download_speed,
            upload_speed: stats.upload_speed,
            num_peers: stats.peer_count,
            time_remaining: stats.time_remaining,
            downloaded: stats.downloaded,
            length: stats.length,
            bytes_remaining: stats.bytes_remaining,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_transfers: usize,
}

/// Joins the swarm for a magnet link and lists its playable files.
///
/// # Errors
/// - `ApiError::MissingParameter` - No `magnet` query parameter
/// - `ApiError::Transfer` - Invalid magnet, metadata timeout or engine failure
pub async fn api_metadata(
    State(state): State<AppState>,
    Query(query): Query<MetadataQuery>,
) -> Result<Json<MetadataResponse>, ApiError> {
    let magnet = query
        .magnet
        .filter(|magnet| !magnet.trim().is_empty())
        .ok_or(ApiError::MissingParameter { name: "magnet" })?;

    let metadata = state.service.metadata(&magnet).await?;
    tracing::info!(
        "Metadata for {}: {} video and {} subtitle files",
        metadata.info_hash,
        metadata.files.len(),
        metadata.subtitles.len()
    );
    Ok(Json(metadata.into()))
}

/// Reports download progress of a transfer.
///
/// # Errors
/// - `ApiError::Transfer` - Malformed info hash or unknown transfer
pub async fn api_stats(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
) -> Result<Json<StatsResponse>, ApiError> {
    let info_hash = parse_info_hash(&info_hash)?;
    let stats = state.service.stats(&info_hash).await?;
    Ok(Json(stats.into()))
}

pub async fn api_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_transfers: state.service.registry().len().await,
    })
}
