//! Traffic filler: replace `ad_break` placeholders with `filler`
//! segments drawn from a single virtual looping strip, falling back to
//! `pad` when the strip is exhausted.

use serde::Deserialize;

use crate::error::Result;
use crate::model::{ScheduledSegment, SegmentType};

#[derive(Debug, Clone, Deserialize)]
pub struct FillerAsset {
    pub uri: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FillerPool {
    #[serde(default)]
    pub assets: Vec<FillerAsset>,
}

impl FillerPool {
    /// Load a pool from a YAML file of the shape `assets: [{uri, duration_ms}, ...]`.
    pub fn load_yaml_file(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

/// Position within the virtual looping filler strip. Persists across
/// breaks (and across blocks, for a whole channel) so the strip "continues
/// where the previous break left off" rather than restarting per break.
#[derive(Debug, Clone, Default)]
pub struct FillerCursor {
    pub index: usize,
    pub offset_ms: i64,
}

const PAD_URI: &str = "__pad__";

/// Replace every `ad_break` placeholder in `segments` with concrete
/// `filler`/`pad` segments summing to the placeholder's duration exactly.
pub fn fill_segments(
    segments: Vec<ScheduledSegment>,
    pool: &FillerPool,
    cursor: &mut FillerCursor,
) -> Vec<ScheduledSegment> {
    let mut out = Vec::with_capacity(segments.len());
    for seg in segments {
        if seg.segment_type != SegmentType::AdBreak {
            out.push(seg);
            continue;
        }
        out.extend(fill_one_break(seg.segment_duration_ms, pool, cursor));
    }
    out
}

fn fill_one_break(duration_ms: i64, pool: &FillerPool, cursor: &mut FillerCursor) -> Vec<ScheduledSegment> {
    let mut out = Vec::new();
    let mut remaining = duration_ms;

    if pool.assets.is_empty() {
        if remaining > 0 {
            out.push(pad_segment(remaining));
        }
        return out;
    }

    // Guard against a pool consisting entirely of zero-duration assets:
    // cap the number of wrap-arounds we attempt before falling back to pad.
    let mut spins_left = pool.assets.len() * 2 + 2;

    while remaining > 0 && spins_left > 0 {
        spins_left -= 1;
        cursor.index %= pool.assets.len();
        let asset = &pool.assets[cursor.index];
        let avail = asset.duration_ms - cursor.offset_ms;

        if avail <= 0 {
            cursor.index = (cursor.index + 1) % pool.assets.len();
            cursor.offset_ms = 0;
            continue;
        }

        let take = avail.min(remaining);
        out.push(ScheduledSegment {
            segment_type: SegmentType::Filler,
            asset_uri: asset.uri.clone(),
            asset_start_offset_ms: cursor.offset_ms,
            segment_duration_ms: take,
        });
        cursor.offset_ms += take;
        remaining -= take;

        if cursor.offset_ms >= asset.duration_ms {
            cursor.index = (cursor.index + 1) % pool.assets.len();
            cursor.offset_ms = 0;
        }
    }

    if remaining > 0 {
        out.push(pad_segment(remaining));
    }

    out
}

fn pad_segment(duration_ms: i64) -> ScheduledSegment {
    ScheduledSegment {
        segment_type: SegmentType::Pad,
        asset_uri: PAD_URI.to_string(),
        asset_start_offset_ms: 0,
        segment_duration_ms: duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad_break(ms: i64) -> ScheduledSegment {
        ScheduledSegment {
            segment_type: SegmentType::AdBreak,
            asset_uri: String::new(),
            asset_start_offset_ms: 0,
            segment_duration_ms: ms,
        }
    }

    #[test]
    fn single_break_filled_from_one_long_filler() {
        let pool = FillerPool {
            assets: vec![FillerAsset { uri: "/media/filler.mp4".into(), duration_ms: 3_600_000 }],
        };
        let mut cursor = FillerCursor::default();
        let filled = fill_segments(vec![ad_break(480_000)], &pool, &mut cursor);
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].segment_type, SegmentType::Filler);
        assert_eq!(filled[0].segment_duration_ms, 480_000);
        assert_eq!(cursor.offset_ms, 480_000);
    }

    #[test]
    fn break_spanning_filler_boundary_emits_two_segments() {
        let pool = FillerPool {
            assets: vec![
                FillerAsset { uri: "/media/a.mp4".into(), duration_ms: 300_000 },
                FillerAsset { uri: "/media/b.mp4".into(), duration_ms: 300_000 },
            ],
        };
        let mut cursor = FillerCursor { index: 0, offset_ms: 250_000 };
        let filled = fill_segments(vec![ad_break(100_000)], &pool, &mut cursor);
        assert_eq!(filled.len(), 2);
        assert_eq!(filled[0].asset_uri, "/media/a.mp4");
        assert_eq!(filled[0].segment_duration_ms, 50_000);
        assert_eq!(filled[1].asset_uri, "/media/b.mp4");
        assert_eq!(filled[1].segment_duration_ms, 50_000);
        let total: i64 = filled.iter().map(|s| s.segment_duration_ms).sum();
        assert_eq!(total, 100_000);
    }

    #[test]
    fn cursor_continues_across_calls_wrap_aware() {
        let pool = FillerPool {
            assets: vec![FillerAsset { uri: "/media/a.mp4".into(), duration_ms: 100_000 }],
        };
        let mut cursor = FillerCursor::default();
        let first = fill_segments(vec![ad_break(80_000)], &pool, &mut cursor);
        assert_eq!(first[0].asset_start_offset_ms, 0);
        // Second break starts where the first left off, then wraps.
        let second = fill_segments(vec![ad_break(40_000)], &pool, &mut cursor);
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].asset_start_offset_ms, 80_000);
        assert_eq!(second[0].segment_duration_ms, 20_000);
        assert_eq!(second[1].asset_start_offset_ms, 0);
        assert_eq!(second[1].segment_duration_ms, 20_000);
    }

    #[test]
    fn empty_pool_falls_back_to_pad() {
        let pool = FillerPool { assets: vec![] };
        let mut cursor = FillerCursor::default();
        let filled = fill_segments(vec![ad_break(50_000)], &pool, &mut cursor);
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].segment_type, SegmentType::Pad);
    }

    #[test]
    fn non_ad_break_segments_pass_through_unchanged() {
        let act = ScheduledSegment {
            segment_type: SegmentType::Act,
            asset_uri: "/media/ep.mp4".into(),
            asset_start_offset_ms: 0,
            segment_duration_ms: 1_000,
        };
        let pool = FillerPool { assets: vec![] };
        let mut cursor = FillerCursor::default();
        let filled = fill_segments(vec![act.clone()], &pool, &mut cursor);
        assert_eq!(filled, vec![act]);
    }
}
