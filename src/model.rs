//! Core broadcast data model: assets, compiled program blocks, scheduled
//! segments, and the scheduled block that the execution window store holds.

use serde::{Deserialize, Serialize};

/// Kind of catalog asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Episode,
    Movie,
    Collection,
    Filler,
}

/// Immutable catalog metadata for a single asset, as supplied by the
/// (out-of-scope) catalog/ingest database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub asset_id: String,
    pub duration_ms: i64,
    /// Chapter marker offsets in seconds, strictly increasing, excluding zero.
    pub chapter_markers_sec: Vec<f64>,
    pub uri: String,
    pub rating: Option<String>,
    pub kind: AssetKind,
    /// Populated only for `AssetKind::Collection`.
    pub children: Vec<String>,
}

impl AssetMetadata {
    pub fn episode_duration_sec(&self) -> i64 {
        (self.duration_ms as f64 / 1000.0).ceil() as i64
    }
}

/// Compiler output: one DSL slot resolved to a concrete asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgramBlock {
    pub asset_id: String,
    /// Grid-aligned UTC start time, in milliseconds since epoch.
    pub start_at_utc_ms: i64,
    pub slot_duration_sec: i64,
    pub episode_duration_sec: i64,
    pub title: String,
    pub notes: Option<String>,
}

impl ProgramBlock {
    pub fn slot_duration_ms(&self) -> i64 {
        self.slot_duration_sec * 1000
    }

    pub fn episode_duration_ms(&self) -> i64 {
        self.episode_duration_sec * 1000
    }

    pub fn end_at_utc_ms(&self) -> i64 {
        self.start_at_utc_ms + self.slot_duration_ms()
    }
}

/// Segment type after expansion and traffic fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    Act,
    AdBreak,
    Pad,
    Filler,
}

/// A single scheduled segment within a `ScheduledBlock`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledSegment {
    pub segment_type: SegmentType,
    /// Local file path the producer should open and seek into. Empty for
    /// `ad_break` placeholders (replaced by fill before a block is stored).
    pub asset_uri: String,
    pub asset_start_offset_ms: i64,
    pub segment_duration_ms: i64,
}

impl ScheduledSegment {
    pub fn is_placeholder(&self) -> bool {
        matches!(self.segment_type, SegmentType::AdBreak)
    }
}

/// A fully compiled, fill-complete block ready to be inserted into the
/// execution window store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledBlock {
    pub block_id: String,
    pub channel_id: String,
    pub programming_day_date: String,
    pub start_utc_ms: i64,
    pub end_utc_ms: i64,
    pub segments: Vec<ScheduledSegment>,
}

impl ScheduledBlock {
    pub fn duration_ms(&self) -> i64 {
        self.end_utc_ms - self.start_utc_ms
    }

    /// True when the segment durations sum exactly to the block's span.
    pub fn segments_duration_exact(&self) -> bool {
        let total: i64 = self.segments.iter().map(|s| s.segment_duration_ms).sum();
        total == self.duration_ms()
    }

    /// Locate the segment covering `at_utc_ms`, along with its own start time
    /// and the offset into it, i.e. the producer's mid-stream join point.
    pub fn segment_at(&self, at_utc_ms: i64) -> Option<(&ScheduledSegment, i64, i64)> {
        let mut cursor = self.start_utc_ms;
        for seg in &self.segments {
            let seg_end = cursor + seg.segment_duration_ms;
            if cursor <= at_utc_ms && at_utc_ms < seg_end {
                return Some((seg, cursor, at_utc_ms - cursor));
            }
            cursor = seg_end;
        }
        None
    }
}

/// Projection of the covering block at a point in time, as consumed by the
/// producer on a mid-stream viewer/channel join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayoutPlanEntry {
    pub asset_path: String,
    pub start_pts_ms: i64,
    pub segment_type: SegmentType,
    pub start_time_utc_ms: i64,
    pub end_time_utc_ms: i64,
    pub duration_seconds: f64,
}
