//! Media and subtitle streaming handlers

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use streamflow_core::TransferError;
use streamflow_core::service::parse_info_hash;
use streamflow_core::streaming::{FileStream, StreamStatus};

use crate::error::ApiError;
use crate::server::AppState;

/// Streams a file of a transfer, honoring the `Range` header.
///
/// # Errors
/// - `ApiError::Transfer` - Malformed hash or index, unknown transfer or
///   file, unsatisfiable range or engine failure
pub async fn stream_file(
    State(state): State<AppState>,
    Path((info_hash, file_index)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let info_hash = parse_info_hash(&info_hash)?;
    let file_index = parse_file_index(&file_index)?;
    let range = headers
        .get(header::RANGE)
        .map(|value| {
            value.to_str().map_err(|_| TransferError::InvalidInput {
                reason: "Range header is not valid ASCII".to_string(),
            })
        })
        .transpose()?;

    let stream = state.service.stream(&info_hash, file_index, range).await?;
    Ok(file_response(stream))
}

/// Serves a subtitle file converted for browser playback.
///
/// # Errors
/// - `ApiError::Transfer` - Malformed hash or index, unknown transfer, not a
///   subtitle file or read failure
pub async fn stream_subtitle(
    State(state): State<AppState>,
    Path((info_hash, file_index)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let info_hash = parse_info_hash(&info_hash)?;
    let file_index = parse_file_index(&file_index)?;

    let subtitle = state.service.subtitle(&info_hash, file_index).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, subtitle.content_type)],
        subtitle.text,
    )
        .into_response())
}

fn parse_file_index(raw: &str) -> Result<usize, TransferError> {
    raw.parse().map_err(|_| TransferError::InvalidInput {
        reason: format!("file index {raw:?} is not a number"),
    })
}

fn file_response(stream: FileStream) -> Response {
    let status = match stream.status {
        StreamStatus::Full => StatusCode::OK,
        StreamStatus::Partial => StatusCode::PARTIAL_CONTENT,
    };
    let content_type = HeaderValue::from_str(&stream.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let content_range = stream
        .content_range()
        .and_then(|range| HeaderValue::from_str(&range).ok());

    let mut response = Body::from_stream(stream.body).into_response();
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(stream.content_length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(content_range) = content_range {
        headers.insert(header::CONTENT_RANGE, content_range);
    }
    response
}
