//! As-run log and planned-vs-actual reconciliation.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{RetrovueError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    Aired,
    Truncated,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsRunRecord {
    pub channel_id: String,
    pub utc_ms: i64,
    pub kind: String,
    pub segment_index: Option<i64>,
    pub frames: Option<u64>,
    pub swap_tick: Option<u64>,
    pub fence_tick: Option<u64>,
    pub frames_emitted: Option<u64>,
    pub frame_budget_remaining: Option<u64>,
    pub reason: Option<String>,
    pub terminal_status: Option<TerminalStatus>,
    pub runtime_recovery: Option<bool>,
    pub notes: Option<String>,
}

/// Append-only, single-writer-per-channel as-run log.
pub struct AsRunLog {
    records: Mutex<Vec<AsRunRecord>>,
}

impl AsRunLog {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn record_seg_start(&self, channel_id: &str, utc_ms: i64, segment_index: i64) {
        self.records.lock().push(AsRunRecord {
            channel_id: channel_id.to_string(),
            utc_ms,
            kind: "SEG_START".to_string(),
            segment_index: Some(segment_index),
            frames: None,
            swap_tick: None,
            fence_tick: None,
            frames_emitted: None,
            frame_budget_remaining: None,
            reason: None,
            terminal_status: None,
            runtime_recovery: None,
            notes: None,
        });
    }

    /// Emit a terminal row for `segment_index`. Requires a preceding
    /// `SEG_START` with no terminal row yet, and `frames > 0` for `Aired`.
    pub fn record_terminal(
        &self,
        channel_id: &str,
        utc_ms: i64,
        segment_index: i64,
        status: TerminalStatus,
        frames: u64,
        runtime_recovery: bool,
    ) -> Result<()> {
        if status == TerminalStatus::Aired && frames == 0 {
            return Err(RetrovueError::Validation(
                "AIRED terminal row requires frames > 0".to_string(),
            ));
        }

        let mut records = self.records.lock();
        let has_open_start = records
            .iter()
            .rev()
            .find(|r| r.channel_id == channel_id && r.segment_index == Some(segment_index))
            .map(|r| r.kind == "SEG_START")
            .unwrap_or(false);
        if !has_open_start {
            return Err(RetrovueError::Validation(format!(
                "terminal row for segment {segment_index} has no open SEG_START"
            )));
        }

        records.push(AsRunRecord {
            channel_id: channel_id.to_string(),
            utc_ms,
            kind: status_label(status).to_string(),
            segment_index: Some(segment_index),
            frames: Some(frames),
            swap_tick: None,
            fence_tick: None,
            frames_emitted: None,
            frame_budget_remaining: None,
            reason: None,
            terminal_status: Some(status),
            runtime_recovery: Some(runtime_recovery),
            notes: None,
        });
        Ok(())
    }

    /// Emit a `FENCE` row. `swap_tick`/`fence_tick` must both be present or
    /// both be absent; `frame_budget_remaining` is always required and must
    /// be zero.
    pub fn record_fence(
        &self,
        channel_id: &str,
        utc_ms: i64,
        swap_tick: Option<u64>,
        fence_tick: Option<u64>,
        frames_emitted: u64,
        frame_budget_remaining: u64,
        reason: &str,
    ) -> Result<()> {
        if swap_tick.is_some() != fence_tick.is_some() {
            return Err(RetrovueError::Validation(
                "swap_tick and fence_tick must both be present or both be absent".to_string(),
            ));
        }
        if let (Some(swap), Some(fence)) = (swap_tick, fence_tick) {
            if swap != fence {
                return Err(RetrovueError::Validation(format!(
                    "swap_tick ({swap}) must equal fence_tick ({fence})"
                )));
            }
            if swap == 0 {
                return Err(RetrovueError::Validation(
                    "swap_tick/fence_tick must be > 0 when present".to_string(),
                ));
            }
        }
        if frame_budget_remaining != 0 {
            return Err(RetrovueError::Validation(
                "frame_budget_remaining must be 0 on a FENCE row".to_string(),
            ));
        }

        self.records.lock().push(AsRunRecord {
            channel_id: channel_id.to_string(),
            utc_ms,
            kind: "FENCE".to_string(),
            segment_index: None,
            frames: None,
            swap_tick,
            fence_tick,
            frames_emitted: Some(frames_emitted),
            frame_budget_remaining: Some(frame_budget_remaining),
            reason: Some(reason.to_string()),
            terminal_status: None,
            runtime_recovery: None,
            notes: None,
        });
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<AsRunRecord> {
        self.records.lock().clone()
    }

    /// Render every record for `channel_id`, in insertion order, as
    /// append-only text-log rows (see `render_text_row`).
    pub fn render_text_log(&self, channel_id: &str, tz: chrono_tz::Tz, programming_day_start_hour: u32) -> String {
        self.records
            .lock()
            .iter()
            .filter(|r| r.channel_id == channel_id)
            .map(|r| render_text_row(r, tz, programming_day_start_hour))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for AsRunLog {
    fn default() -> Self {
        Self::new()
    }
}

fn status_label(status: TerminalStatus) -> &'static str {
    match status {
        TerminalStatus::Aired => "AIRED",
        TerminalStatus::Truncated => "TRUNCATED",
        TerminalStatus::Skipped => "SKIPPED",
    }
}

// --- Text log rendering -----------------------------------------------------

/// Render one record as the whitespace-delimited text-log row `ACTUAL DUR
/// STATUS TYPE EVENT_ID NOTES`. `scheduled_*` fields never appear here —
/// those belong to the planned transmission log, not the as-run log.
pub fn render_text_row(record: &AsRunRecord, tz: chrono_tz::Tz, programming_day_start_hour: u32) -> String {
    let actual = format_channel_local_clock(record.utc_ms, tz, programming_day_start_hour);

    let (dur, status, row_type, event_id, notes) = match record.kind.as_str() {
        "SEG_START" => {
            let event_id = opt_to_field(record.segment_index);
            let notes = record
                .segment_index
                .map(|i| format!("segment_index={i}"))
                .unwrap_or_default();
            ("-".to_string(), "-".to_string(), "SEGMENT".to_string(), event_id, notes)
        }
        "FENCE" => {
            let dur = opt_to_field(record.frames_emitted);
            let event_id = opt_to_field(record.fence_tick);
            let mut notes = format!("reason={}", record.reason.as_deref().unwrap_or("-"));
            if let Some(remaining) = record.frame_budget_remaining {
                notes.push_str(&format!(" frame_budget_remaining={remaining}"));
            }
            (dur, "-".to_string(), "FENCE".to_string(), event_id, notes)
        }
        _ => {
            // Terminal row: `kind` already holds AIRED/TRUNCATED/SKIPPED.
            let dur = opt_to_field(record.frames);
            let event_id = opt_to_field(record.segment_index);
            let mut notes = record
                .segment_index
                .map(|i| format!("segment_index={i}"))
                .unwrap_or_default();
            if record.runtime_recovery == Some(true) {
                notes.push_str(" runtime_recovery=true");
            }
            (dur, record.kind.clone(), "SEGMENT".to_string(), event_id, notes)
        }
    };

    let notes = if notes.is_empty() { "-".to_string() } else { notes };
    format!("{actual} {dur} {status} {row_type} {event_id} {notes}")
}

fn opt_to_field<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Channel-local clock time elapsed since the broadcast day's local start
/// (`programming_day_start_hour`), formatted `HH:MM:SS`. `HH` is not
/// wrapped at 24 — an event past broadcast-day rollover reads e.g.
/// `24:30:00` rather than wrapping back to `00:30:00`.
fn format_channel_local_clock(utc_ms: i64, tz: chrono_tz::Tz, programming_day_start_hour: u32) -> String {
    use chrono::{Datelike, TimeZone, Timelike};

    let local = match tz.timestamp_millis_opt(utc_ms) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => tz.timestamp_millis_opt(0).unwrap(),
    };

    let mut broadcast_date = local.date_naive();
    if local.time().hour() < programming_day_start_hour {
        broadcast_date = broadcast_date.pred_opt().unwrap_or(broadcast_date);
    }

    let day_start_local = tz
        .with_ymd_and_hms(
            broadcast_date.year(),
            broadcast_date.month(),
            broadcast_date.day(),
            programming_day_start_hour,
            0,
            0,
        )
        .single()
        .unwrap_or(local);

    let elapsed_sec = (local.timestamp_millis() - day_start_local.timestamp_millis()).max(0) / 1000;
    let hh = elapsed_sec / 3600;
    let mm = (elapsed_sec % 3600) / 60;
    let ss = elapsed_sec % 60;
    format!("{hh:02}:{mm:02}:{ss:02}")
}

// --- Reconciliation -------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PlannedBlockEntry {
    pub block_id: String,
    pub start_utc_ms: i64,
    pub end_utc_ms: i64,
}

/// One block as it actually aired, derived from the as-run log.
#[derive(Debug, Clone)]
pub struct AiredBlock {
    /// Empty when this is an unplanned segment with no corresponding block.
    pub block_id: String,
    pub start_utc_ms: i64,
    pub end_utc_ms: i64,
    pub segment_indices: Vec<i64>,
    pub runtime_recovery: bool,
    pub runway_degradation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationClass {
    Match,
    MissingBlock,
    ExtraBlock,
    BlockTimeMismatch,
    SegmentSequenceMismatch,
    PhantomSegment,
    RuntimeRecovery,
    RunwayDegradation,
}

#[derive(Debug, Clone)]
pub struct ReconciliationReport {
    pub classifications: Vec<ReconciliationClass>,
    pub success: bool,
}

const BLOCKING_CLASSES: [ReconciliationClass; 5] = [
    ReconciliationClass::MissingBlock,
    ReconciliationClass::ExtraBlock,
    ReconciliationClass::BlockTimeMismatch,
    ReconciliationClass::SegmentSequenceMismatch,
    ReconciliationClass::PhantomSegment,
];

pub fn reconcile(planned: &[PlannedBlockEntry], actual: &[AiredBlock]) -> ReconciliationReport {
    let mut classifications = Vec::new();
    let mut seen_block_ids: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();

    for aired in actual {
        if aired.block_id.is_empty() {
            if aired.runtime_recovery {
                classifications.push(ReconciliationClass::RuntimeRecovery);
                if aired.runway_degradation {
                    classifications.push(ReconciliationClass::RunwayDegradation);
                }
            } else {
                classifications.push(ReconciliationClass::PhantomSegment);
            }
            continue;
        }

        let occurrence = *seen_block_ids.get(aired.block_id.as_str()).unwrap_or(&0);
        seen_block_ids.insert(aired.block_id.as_str(), occurrence + 1);

        let Some(plan) = planned.iter().find(|p| p.block_id == aired.block_id) else {
            classifications.push(ReconciliationClass::ExtraBlock);
            continue;
        };
        if occurrence > 0 {
            classifications.push(ReconciliationClass::ExtraBlock);
            continue;
        }

        if plan.start_utc_ms != aired.start_utc_ms || plan.end_utc_ms != aired.end_utc_ms {
            classifications.push(ReconciliationClass::BlockTimeMismatch);
        }

        let sequential = aired
            .segment_indices
            .iter()
            .enumerate()
            .all(|(i, &idx)| idx == i as i64);
        if !sequential {
            classifications.push(ReconciliationClass::SegmentSequenceMismatch);
        }

        if aired.runtime_recovery {
            classifications.push(ReconciliationClass::RuntimeRecovery);
            if aired.runway_degradation {
                classifications.push(ReconciliationClass::RunwayDegradation);
            }
        }

        let times_match = plan.start_utc_ms == aired.start_utc_ms && plan.end_utc_ms == aired.end_utc_ms;
        if times_match && sequential && !aired.runtime_recovery {
            classifications.push(ReconciliationClass::Match);
        }
    }

    for plan in planned {
        if !actual.iter().any(|a| a.block_id == plan.block_id) {
            classifications.push(ReconciliationClass::MissingBlock);
        }
    }

    let success = !classifications.iter().any(|c| BLOCKING_CLASSES.contains(c));
    ReconciliationReport { classifications, success }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seg_start_then_aired_terminal_succeeds() {
        let log = AsRunLog::new();
        log.record_seg_start("retro1", 0, 0);
        log.record_terminal("retro1", 1000, 0, TerminalStatus::Aired, 48, false).unwrap();
        assert_eq!(log.snapshot().len(), 2);
    }

    #[test]
    fn aired_with_zero_frames_is_rejected() {
        let log = AsRunLog::new();
        log.record_seg_start("retro1", 0, 0);
        let err = log.record_terminal("retro1", 1000, 0, TerminalStatus::Aired, 0, false).unwrap_err();
        assert!(matches!(err, RetrovueError::Validation(_)));
    }

    #[test]
    fn terminal_without_seg_start_is_rejected() {
        let log = AsRunLog::new();
        assert!(log.record_terminal("retro1", 1000, 0, TerminalStatus::Aired, 10, false).is_err());
    }

    #[test]
    fn fence_requires_matching_tick_presence() {
        let log = AsRunLog::new();
        assert!(log.record_fence("retro1", 0, Some(1), None, 0, 0, "boundary").is_err());
        assert!(log.record_fence("retro1", 0, Some(1), Some(1), 0, 0, "boundary").is_ok());
        assert!(log.record_fence("retro1", 0, None, None, 0, 0, "noop").is_ok());
    }

    #[test]
    fn fence_requires_zero_frame_budget_remaining() {
        let log = AsRunLog::new();
        assert!(log.record_fence("retro1", 0, Some(1), Some(1), 0, 5, "boundary").is_err());
    }

    #[test]
    fn fence_rejects_zero_tick() {
        let log = AsRunLog::new();
        let err = log.record_fence("retro1", 0, Some(0), Some(0), 0, 0, "boundary").unwrap_err();
        assert!(matches!(err, RetrovueError::Validation(_)));
    }

    #[test]
    fn fence_rejects_mismatched_nonzero_ticks() {
        let log = AsRunLog::new();
        let err = log.record_fence("retro1", 0, Some(1), Some(2), 0, 0, "boundary").unwrap_err();
        assert!(matches!(err, RetrovueError::Validation(_)));
    }

    #[test]
    fn text_row_seg_start_has_dash_fields_and_segment_index_note() {
        let record = AsRunRecord {
            channel_id: "retro1".into(),
            utc_ms: 0,
            kind: "SEG_START".into(),
            segment_index: Some(3),
            frames: None,
            swap_tick: None,
            fence_tick: None,
            frames_emitted: None,
            frame_budget_remaining: None,
            reason: None,
            terminal_status: None,
            runtime_recovery: None,
            notes: None,
        };
        let row = render_text_row(&record, chrono_tz::UTC, 6);
        let fields: Vec<&str> = row.split(' ').collect();
        assert_eq!(fields[1], "-"); // DUR
        assert_eq!(fields[2], "-"); // STATUS
        assert_eq!(fields[3], "SEGMENT");
        assert_eq!(fields[4], "3"); // EVENT_ID
        assert!(row.contains("segment_index=3"));
    }

    #[test]
    fn text_row_terminal_includes_runtime_recovery_note() {
        let record = AsRunRecord {
            channel_id: "retro1".into(),
            utc_ms: 0,
            kind: "TRUNCATED".into(),
            segment_index: Some(5),
            frames: Some(12),
            swap_tick: None,
            fence_tick: None,
            frames_emitted: None,
            frame_budget_remaining: None,
            reason: None,
            terminal_status: Some(TerminalStatus::Truncated),
            runtime_recovery: Some(true),
            notes: None,
        };
        let row = render_text_row(&record, chrono_tz::UTC, 6);
        let fields: Vec<&str> = row.split(' ').collect();
        assert_eq!(fields[1], "12");
        assert_eq!(fields[2], "TRUNCATED");
        assert_eq!(fields[3], "SEGMENT");
        assert_eq!(fields[4], "5");
        assert!(row.contains("segment_index=5"));
        assert!(row.contains("runtime_recovery=true"));
    }

    #[test]
    fn text_row_fence_carries_tick_and_reason() {
        let record = AsRunRecord {
            channel_id: "retro1".into(),
            utc_ms: 0,
            kind: "FENCE".into(),
            segment_index: None,
            frames: None,
            swap_tick: Some(7),
            fence_tick: Some(7),
            frames_emitted: Some(120),
            frame_budget_remaining: Some(0),
            reason: Some("boundary_swap".into()),
            terminal_status: None,
            runtime_recovery: None,
            notes: None,
        };
        let row = render_text_row(&record, chrono_tz::UTC, 6);
        let fields: Vec<&str> = row.split(' ').collect();
        assert_eq!(fields[1], "120");
        assert_eq!(fields[2], "-");
        assert_eq!(fields[3], "FENCE");
        assert_eq!(fields[4], "7");
        assert!(row.contains("reason=boundary_swap"));
        assert!(row.contains("frame_budget_remaining=0"));
    }

    #[test]
    fn channel_local_clock_exceeds_24h_after_rollover() {
        // Broadcast day starts 06:00 UTC on 2026-01-01. 24h30m later is
        // still "today" on the broadcast clock, not 00:30:00 tomorrow.
        use chrono::TimeZone;
        let day_start_ms = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 6, 0, 0).unwrap().timestamp_millis();
        let past_rollover_ms = day_start_ms + (24 * 3600 + 30 * 60) * 1000;
        let actual = format_channel_local_clock(past_rollover_ms, chrono_tz::UTC, 6);
        assert_eq!(actual, "24:30:00");
    }

    #[test]
    fn render_text_log_filters_by_channel_and_preserves_order() {
        let log = AsRunLog::new();
        log.record_seg_start("retro1", 0, 0);
        log.record_seg_start("retro2", 0, 0);
        log.record_terminal("retro1", 1000, 0, TerminalStatus::Aired, 24, false).unwrap();
        let rendered = log.render_text_log("retro1", chrono_tz::UTC, 6);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("SEGMENT"));
        assert!(lines[1].contains("AIRED"));
    }

    #[test]
    fn reconcile_reports_missing_and_match() {
        let planned = vec![
            PlannedBlockEntry { block_id: "b1".into(), start_utc_ms: 0, end_utc_ms: 1000 },
            PlannedBlockEntry { block_id: "b2".into(), start_utc_ms: 1000, end_utc_ms: 2000 },
        ];
        let actual = vec![AiredBlock {
            block_id: "b1".into(),
            start_utc_ms: 0,
            end_utc_ms: 1000,
            segment_indices: vec![0, 1],
            runtime_recovery: false,
            runway_degradation: false,
        }];
        let report = reconcile(&planned, &actual);
        assert!(report.classifications.contains(&ReconciliationClass::Match));
        assert!(report.classifications.contains(&ReconciliationClass::MissingBlock));
        assert!(!report.success);
    }

    #[test]
    fn reconcile_runtime_recovery_alone_is_still_success() {
        let planned = vec![PlannedBlockEntry { block_id: "b1".into(), start_utc_ms: 0, end_utc_ms: 1000 }];
        let actual = vec![AiredBlock {
            block_id: "b1".into(),
            start_utc_ms: 0,
            end_utc_ms: 1000,
            segment_indices: vec![0],
            runtime_recovery: true,
            runway_degradation: false,
        }];
        let report = reconcile(&planned, &actual);
        assert!(report.classifications.contains(&ReconciliationClass::RuntimeRecovery));
        assert!(report.success);
    }
}
