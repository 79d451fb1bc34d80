//! Block expander: split a compiled `ProgramBlock` into chapter-aligned
//! `act` segments plus `ad_break` placeholders, sized so the expanded list
//! sums exactly to `slot_duration_ms` before traffic fill runs.

use crate::error::{RetrovueError, Result};
use crate::model::{ProgramBlock, ScheduledSegment, SegmentType};

/// Expand `block` given `chapter_markers_sec` (strictly increasing, > 0,
/// expressed in seconds from the start of the episode) and the resolved
/// asset's local path.
///
/// How much of the post-episode ad time each `ad_break` placeholder claims
/// is left open beyond "zero-width, filled in later"; this splits the
/// slot's total ad time evenly across every placeholder, the remainder
/// landing on the break after the final act, so expansion alone already
/// satisfies `sum(segments) == slot_duration_ms`.
pub fn expand_block(
    block: &ProgramBlock,
    asset_path: &str,
    chapter_markers_sec: &[f64],
) -> Result<Vec<ScheduledSegment>> {
    for pair in chapter_markers_sec.windows(2) {
        if pair[1] <= pair[0] {
            return Err(RetrovueError::Validation(
                "chapter markers must be strictly increasing".to_string(),
            ));
        }
    }
    if chapter_markers_sec.iter().any(|&c| c <= 0.0) {
        return Err(RetrovueError::Validation(
            "chapter markers must be strictly positive".to_string(),
        ));
    }

    let episode_ms = block.episode_duration_ms();
    let slot_ms = block.slot_duration_ms();
    let total_ad_ms = slot_ms - episode_ms;

    if let Some(&last) = chapter_markers_sec.last() {
        if (last * 1000.0).round() as i64 >= episode_ms {
            return Err(RetrovueError::Validation(
                "chapter markers must fall strictly before the episode end".to_string(),
            ));
        }
    }

    let mut boundaries: Vec<i64> = chapter_markers_sec.iter().map(|c| (c * 1000.0).round() as i64).collect();
    boundaries.push(episode_ms);

    let n_breaks = boundaries.len(); // one inter-act break per interior boundary, plus the trailing one
    let base = if n_breaks > 0 { total_ad_ms / n_breaks as i64 } else { 0 };
    let remainder = if n_breaks > 0 { total_ad_ms % n_breaks as i64 } else { 0 };

    let mut segments = Vec::with_capacity(boundaries.len() * 2);
    let mut cursor_ms = 0i64;
    for (i, &boundary) in boundaries.iter().enumerate() {
        segments.push(ScheduledSegment {
            segment_type: SegmentType::Act,
            asset_uri: asset_path.to_string(),
            asset_start_offset_ms: cursor_ms,
            segment_duration_ms: boundary - cursor_ms,
        });
        cursor_ms = boundary;

        let is_last = i == boundaries.len() - 1;
        let mut break_ms = base;
        if is_last {
            break_ms += remainder;
        }
        segments.push(ScheduledSegment {
            segment_type: SegmentType::AdBreak,
            asset_uri: String::new(),
            asset_start_offset_ms: 0,
            segment_duration_ms: break_ms,
        });
    }

    Ok(segments)
}
