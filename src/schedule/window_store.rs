//! Execution window store (§3 `ExecutionWindowStore`): an ordered,
//! contiguity-checked set of `ScheduledBlock`s per channel.

use parking_lot::RwLock;

use crate::model::{PlayoutPlanEntry, ScheduledBlock, SegmentType};

/// One contiguity breach detected on insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct SeamViolation {
    pub left_block_id: String,
    pub right_block_id: String,
    pub delta_ms: i64,
}

pub struct ExecutionWindowStore {
    blocks: RwLock<Vec<ScheduledBlock>>,
}

impl ExecutionWindowStore {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(Vec::new()),
        }
    }

    /// Merge `new_blocks` into the store, sorted by `start_utc_ms`.
    ///
    /// Contiguity (every block's end must equal the next block's start) is
    /// re-validated across the whole merged sequence. The first seam violation found
    /// truncates the store to the contiguous prefix up to (and including)
    /// its left side; everything from the violating block onward is
    /// dropped and reported, never inserted.
    pub fn insert_blocks(&self, new_blocks: Vec<ScheduledBlock>) -> Vec<SeamViolation> {
        let mut guard = self.blocks.write();
        guard.extend(new_blocks);
        guard.sort_by_key(|b| b.start_utc_ms);
        guard.dedup_by_key(|b| b.start_utc_ms);

        let mut violations = Vec::new();
        let mut cutoff = guard.len();
        for i in 0..guard.len().saturating_sub(1) {
            let (left, right) = (&guard[i], &guard[i + 1]);
            if left.end_utc_ms != right.start_utc_ms {
                violations.push(SeamViolation {
                    left_block_id: left.block_id.clone(),
                    right_block_id: right.block_id.clone(),
                    delta_ms: right.start_utc_ms - left.end_utc_ms,
                });
                cutoff = i + 1;
                break;
            }
        }
        guard.truncate(cutoff);
        violations
    }

    /// O(log N) lookup: the unique block covering `utc_ms`.
    pub fn get_block_at(&self, utc_ms: i64) -> Option<ScheduledBlock> {
        let guard = self.blocks.read();
        let idx = guard.partition_point(|b| b.start_utc_ms <= utc_ms);
        if idx == 0 {
            return None;
        }
        let candidate = &guard[idx - 1];
        if candidate.start_utc_ms <= utc_ms && utc_ms < candidate.end_utc_ms {
            Some(candidate.clone())
        } else {
            None
        }
    }

    pub fn window_end_ms(&self) -> Option<i64> {
        self.blocks.read().last().map(|b| b.end_utc_ms)
    }

    pub fn window_start_ms(&self) -> Option<i64> {
        self.blocks.read().first().map(|b| b.start_utc_ms)
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent snapshot: a copy, never a live reference.
    pub fn snapshot(&self) -> Vec<ScheduledBlock> {
        self.blocks.read().clone()
    }

    /// Drop blocks that ended more than `max_age_ms` before `now_utc_ms`.
    pub fn prune_older_than(&self, now_utc_ms: i64, max_age_ms: i64) -> usize {
        let mut guard = self.blocks.write();
        let before = guard.len();
        guard.retain(|b| now_utc_ms - b.end_utc_ms <= max_age_ms);
        before - guard.len()
    }

    /// Verify contiguity without mutating the store; used by the horizon
    /// manager's health report.
    pub fn check_contiguity(&self) -> Vec<SeamViolation> {
        let guard = self.blocks.read();
        let mut violations = Vec::new();
        for pair in guard.windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            if left.end_utc_ms != right.start_utc_ms {
                violations.push(SeamViolation {
                    left_block_id: left.block_id.clone(),
                    right_block_id: right.block_id.clone(),
                    delta_ms: right.start_utc_ms - left.end_utc_ms,
                });
            }
        }
        violations
    }

    /// Mid-stream join projection.
    pub fn get_playout_plan_now(&self, at_utc_ms: i64) -> Vec<PlayoutPlanEntry> {
        let block = match self.get_block_at(at_utc_ms) {
            Some(b) => b,
            None => return Vec::new(),
        };

        let mut entries = Vec::new();
        let mut cursor = block.start_utc_ms;
        for seg in &block.segments {
            let seg_start = cursor;
            let seg_end = cursor + seg.segment_duration_ms;
            cursor = seg_end;

            if seg.segment_type == SegmentType::Pad {
                continue;
            }
            if seg_end <= at_utc_ms {
                continue;
            }

            let start_pts_ms = if seg_start <= at_utc_ms && at_utc_ms < seg_end {
                seg.asset_start_offset_ms + (at_utc_ms - seg_start)
            } else {
                seg.asset_start_offset_ms
            };
            let entry_start = seg_start.max(at_utc_ms);

            entries.push(PlayoutPlanEntry {
                asset_path: seg.asset_uri.clone(),
                start_pts_ms,
                segment_type: seg.segment_type,
                start_time_utc_ms: entry_start,
                end_time_utc_ms: seg_end,
                duration_seconds: (seg_end - entry_start) as f64 / 1000.0,
            });
        }
        entries
    }
}

impl Default for ExecutionWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScheduledSegment;

    fn block(id: &str, start: i64, end: i64) -> ScheduledBlock {
        ScheduledBlock {
            block_id: id.to_string(),
            channel_id: "retro1".to_string(),
            programming_day_date: "2026-01-01".to_string(),
            start_utc_ms: start,
            end_utc_ms: end,
            segments: vec![ScheduledSegment {
                segment_type: SegmentType::Act,
                asset_uri: "/media/a.mp4".into(),
                asset_start_offset_ms: 0,
                segment_duration_ms: end - start,
            }],
        }
    }

    #[test]
    fn contiguous_blocks_insert_cleanly() {
        let store = ExecutionWindowStore::new();
        let violations = store.insert_blocks(vec![block("b1", 0, 1000), block("b2", 1000, 2000)]);
        assert!(violations.is_empty());
        assert_eq!(store.len(), 2);
        assert_eq!(store.window_end_ms(), Some(2000));
    }

    #[test]
    fn seam_gap_truncates_store_and_reports_violation() {
        let store = ExecutionWindowStore::new();
        store.insert_blocks(vec![block("a", 0, 1_800_000)]);
        let violations = store.insert_blocks(vec![block("b", 1_800_001, 3_600_001)]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].delta_ms, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.window_end_ms(), Some(1_800_000));
    }

    #[test]
    fn get_block_at_finds_covering_block() {
        let store = ExecutionWindowStore::new();
        store.insert_blocks(vec![block("a", 0, 1000), block("b", 1000, 2000)]);
        assert_eq!(store.get_block_at(500).unwrap().block_id, "a");
        assert_eq!(store.get_block_at(1500).unwrap().block_id, "b");
        assert!(store.get_block_at(2500).is_none());
    }

    #[test]
    fn playout_plan_projects_mid_segment_offset() {
        let store = ExecutionWindowStore::new();
        let segments = vec![
            ScheduledSegment {
                segment_type: SegmentType::Act,
                asset_uri: "/media/a.mp4".into(),
                asset_start_offset_ms: 0,
                segment_duration_ms: 1000,
            },
            ScheduledSegment {
                segment_type: SegmentType::Filler,
                asset_uri: "/media/f.mp4".into(),
                asset_start_offset_ms: 200,
                segment_duration_ms: 1000,
            },
        ];
        store.insert_blocks(vec![ScheduledBlock {
            block_id: "b1".into(),
            channel_id: "retro1".into(),
            programming_day_date: "2026-01-01".into(),
            start_utc_ms: 0,
            end_utc_ms: 2000,
            segments,
        }]);

        let plan = store.get_playout_plan_now(1_300);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].asset_path, "/media/f.mp4");
        assert_eq!(plan[0].start_pts_ms, 200 + 300);
    }

    #[test]
    fn prune_removes_old_blocks() {
        let store = ExecutionWindowStore::new();
        store.insert_blocks(vec![block("a", 0, 1000)]);
        let removed = store.prune_older_than(100_000_000, 1_000);
        assert_eq!(removed, 1);
        assert!(store.is_empty());
    }
}
