//! HTTP request handlers for the channel list, live TS, HLS playlist/segment,
//! and EPG endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::info;

use crate::error::RetrovueError;
use crate::state::AppState;

/// HTTP error wrapper: maps the crate's error taxonomy onto response codes
/// the way the channel-not-found/segment-not-found variants describe.
#[derive(Debug)]
pub enum HttpError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            HttpError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            HttpError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, body).into_response()
    }
}

impl From<RetrovueError> for HttpError {
    fn from(err: RetrovueError) -> Self {
        match err {
            RetrovueError::ChannelNotFound(id) => HttpError::NotFound(format!("channel not found: {id}")),
            RetrovueError::SegmentNotFound { channel_id, name } => {
                HttpError::NotFound(format!("segment not found: {channel_id}/{name}"))
            }
            other => HttpError::Internal(other.to_string()),
        }
    }
}

trait AppStateExt {
    fn get_channel_or_error(&self, channel_id: &str) -> Result<Arc<crate::state::ChannelRuntime>, HttpError>;
}

impl AppStateExt for AppState {
    fn get_channel_or_error(&self, channel_id: &str) -> Result<Arc<crate::state::ChannelRuntime>, HttpError> {
        self.get_channel(channel_id)
            .ok_or_else(|| HttpError::NotFound(format!("channel not found: {channel_id}")))
    }
}

#[derive(Debug, Serialize)]
struct ChannelSummary {
    channel_id: String,
    channel_id_int: i64,
    name: String,
}

/// `GET /channels` — liveness probe / channel directory.
pub async fn list_channels(State(state): State<Arc<AppState>>) -> Json<Vec<ChannelSummary>> {
    let summaries = state
        .list_channels()
        .into_iter()
        .map(|r| ChannelSummary {
            channel_id: r.channel_id.clone(),
            channel_id_int: r.config.channel_id_int,
            name: r.config.name.clone(),
        })
        .collect();
    Json(summaries)
}

/// `GET /channel/{id}.ts` — chunked MPEG-TS fanout. Attaches a new viewer
/// queue for the lifetime of the connection; bytes flow until the client
/// disconnects or the producer tears down.
pub async fn stream_channel_ts(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Result<Response, HttpError> {
    let runtime = state.get_channel_or_error(&channel_id)?;
    let rx = runtime.fanout.attach_viewer();
    state.metrics.record_viewer_attached();
    info!(channel_id = %channel_id, "viewer attached");

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, std::io::Error>));

    let mut headers = HeaderMap::new();
    headers.insert("Content-Type", HeaderValue::from_static("video/mp2t"));
    headers.insert(
        "Cache-Control",
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert("Content-Encoding", HeaderValue::from_static("identity"));

    Ok((headers, body).into_response())
}

/// `GET /hls/{id}/live.m3u8` — blocks up to `wait_for_playlist_timeout_secs`
/// for the first segment to finalize, then returns the current playlist.
pub async fn live_playlist(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Result<Response, HttpError> {
    let runtime = state.get_channel_or_error(&channel_id)?;
    let timeout = Duration::from_secs_f64(state.config.hls.wait_for_playlist_timeout_secs);
    let deadline = tokio::time::Instant::now() + timeout;

    while !runtime.segmenter.is_playlist_ready() {
        if tokio::time::Instant::now() >= deadline {
            return Err(HttpError::NotFound(format!(
                "no segments finalized yet for channel {channel_id}"
            )));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let playlist = runtime.segmenter.generate_playlist();

    let mut headers = HeaderMap::new();
    headers.insert(
        "Content-Type",
        HeaderValue::from_static("application/vnd.apple.mpegurl"),
    );
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));

    Ok((headers, playlist).into_response())
}

/// `GET /hls/{id}/{seg_name}` — returns the named segment's bytes, or 404
/// once it has aged out of the ring.
pub async fn get_segment(
    State(state): State<Arc<AppState>>,
    Path((channel_id, seg_name)): Path<(String, String)>,
) -> Result<Response, HttpError> {
    let runtime = state.get_channel_or_error(&channel_id)?;
    let data = runtime.segmenter.get_segment(&seg_name).ok_or_else(|| {
        HttpError::NotFound(format!("segment not found: {channel_id}/{seg_name}"))
    })?;

    let mut headers = HeaderMap::new();
    headers.insert("Content-Type", HeaderValue::from_static("video/mp2t"));
    Ok((headers, data).into_response())
}

#[derive(Debug, Deserialize)]
pub struct EpgQuery {
    date: String,
    channel: Option<String>,
}

#[derive(Debug, Serialize)]
struct EpgEntry {
    channel_id: String,
    channel_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    season: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    episode: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    slot_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct EpgResponse {
    broadcast_day: String,
    entries: Vec<EpgEntry>,
}

fn rfc3339_from_utc_ms(utc_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(utc_ms)
        .unwrap_or_default()
        .to_rfc3339()
}

/// `GET /api/epg?date=YYYY-MM-DD&channel=<id>?` — compiled program-block
/// metadata for the requested broadcast day, computed on demand without
/// mutating any channel's execution window. A channel whose compilation
/// fails yields a single entry carrying `error` instead of failing the
/// whole request.
pub async fn get_epg(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EpgQuery>,
) -> Result<Json<EpgResponse>, HttpError> {
    let day = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|e| HttpError::BadRequest(format!("invalid date: {e}")))?;

    let runtimes = match &query.channel {
        Some(id) => vec![state.get_channel_or_error(id)?],
        None => state.list_channels(),
    };

    let mut entries = Vec::new();
    for runtime in runtimes {
        match state
            .schedule
            .compute_epg(&runtime.schedule_ctx, state.resolver.as_ref(), day)
        {
            Ok(compiled) => {
                entries.extend(compiled.program_blocks.into_iter().map(|block| EpgEntry {
                    channel_id: runtime.channel_id.clone(),
                    channel_name: runtime.config.name.clone(),
                    start_time: Some(rfc3339_from_utc_ms(block.start_at_utc_ms)),
                    end_time: Some(rfc3339_from_utc_ms(block.end_at_utc_ms())),
                    title: Some(block.title),
                    season: None,
                    episode: None,
                    duration_minutes: Some(block.episode_duration_sec as f64 / 60.0),
                    slot_minutes: Some(block.slot_duration_sec as f64 / 60.0),
                    error: None,
                }));
            }
            Err(err) => entries.push(EpgEntry {
                channel_id: runtime.channel_id.clone(),
                channel_name: runtime.config.name.clone(),
                start_time: None,
                end_time: None,
                title: None,
                season: None,
                episode: None,
                duration_minutes: None,
                slot_minutes: None,
                error: Some(err.to_string()),
            }),
        }
    }

    Ok(Json(EpgResponse {
        broadcast_day: query.date,
        entries,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_from_channel_not_found_is_404() {
        let err: HttpError = RetrovueError::ChannelNotFound("retro1".into()).into();
        assert!(matches!(err, HttpError::NotFound(_)));
    }

    #[test]
    fn http_error_from_segment_not_found_is_404() {
        let err: HttpError = RetrovueError::SegmentNotFound {
            channel_id: "retro1".into(),
            name: "seg_3.ts".into(),
        }
        .into();
        assert!(matches!(err, HttpError::NotFound(_)));
    }

    #[test]
    fn epg_entry_serializes_with_channel_name_and_minutes() {
        let entry = EpgEntry {
            channel_id: "retro1".into(),
            channel_name: "Retro One".into(),
            start_time: Some(rfc3339_from_utc_ms(0)),
            end_time: Some(rfc3339_from_utc_ms(1_800_000)),
            title: Some("Cheers S06E01".into()),
            season: None,
            episode: None,
            duration_minutes: Some(22.0),
            slot_minutes: Some(30.0),
            error: None,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["channel_id"], "retro1");
        assert_eq!(value["channel_name"], "Retro One");
        assert_eq!(value["slot_minutes"], 30.0);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn epg_entry_with_error_omits_program_fields() {
        let entry = EpgEntry {
            channel_id: "retro2".into(),
            channel_name: "Retro Two".into(),
            start_time: None,
            end_time: None,
            title: None,
            season: None,
            episode: None,
            duration_minutes: None,
            slot_minutes: None,
            error: Some("AssetResolutionError: no candidates".into()),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("start_time").is_none());
        assert!(value.get("title").is_none());
        assert_eq!(value["error"], "AssetResolutionError: no candidates");
    }
}
