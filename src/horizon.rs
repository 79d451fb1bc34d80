//! Horizon manager: coordinates the rolling schedule horizon across
//! every channel, enforcing minimum EPG/execution depth and reporting
//! coverage health. Runs as a single process-wide tick loop.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::asset::AssetResolver;
use crate::schedule::{ChannelScheduleContext, ScheduleService};
use crate::time::SharedClock;

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionAttempt {
    pub channel_id: String,
    pub broadcast_day: String,
    pub success: bool,
    pub error_code: Option<String>,
    pub attempt_number: u64,
}

/// Per-channel health snapshot published after each tick.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ChannelHealthReport {
    pub channel_id: String,
    pub coverage_compliant: bool,
    pub seam_violations: usize,
    pub proactive_extension_triggered: bool,
    pub extension_attempt_count: u64,
    pub extension_success_count: u64,
    pub remaining_ms: i64,
    pub last_attempt: Option<ExtensionAttempt>,
}

struct ChannelHorizonState {
    ctx: ChannelScheduleContext,
    attempt_count: u64,
    success_count: u64,
}

pub struct HorizonManager {
    clock: SharedClock,
    schedule: Arc<ScheduleService>,
    resolver: Arc<dyn AssetResolver>,
    channels: parking_lot::Mutex<Vec<ChannelHorizonState>>,
    proactive_extend_threshold_ms: i64,
    min_execution_hours: i64,
}

impl HorizonManager {
    pub fn new(
        clock: SharedClock,
        schedule: Arc<ScheduleService>,
        resolver: Arc<dyn AssetResolver>,
        proactive_extend_threshold_ms: i64,
        min_execution_hours: i64,
    ) -> Self {
        Self {
            clock,
            schedule,
            resolver,
            channels: parking_lot::Mutex::new(Vec::new()),
            proactive_extend_threshold_ms,
            min_execution_hours,
        }
    }

    pub fn register_channel(&self, ctx: ChannelScheduleContext) {
        self.channels.lock().push(ChannelHorizonState {
            ctx,
            attempt_count: 0,
            success_count: 0,
        });
    }

    /// One tick of the horizon loop: for each registered channel, extend
    /// the horizon if it is running low, then publish a health report.
    pub fn evaluate_once(&self) -> Vec<ChannelHealthReport> {
        let now = self.clock.now_utc_ms();
        let mut reports = Vec::new();
        let mut channels = self.channels.lock();

        for state in channels.iter_mut() {
            let channel_id = state.ctx.channel_id.clone();
            let window_end = self.schedule.window_end_ms(&channel_id).unwrap_or(now);
            let remaining_ms = window_end - now;

            let mut proactive_extension_triggered = false;
            let mut last_attempt = None;

            if remaining_ms <= self.proactive_extend_threshold_ms {
                if self.schedule.try_begin_extension(&channel_id) {
                    proactive_extension_triggered = true;
                    state.attempt_count += 1;
                    let attempt_number = state.attempt_count;

                    let next_day = chrono::DateTime::from_timestamp_millis(window_end)
                        .map(|dt| dt.date_naive() + chrono::Duration::days(1))
                        .unwrap_or_else(|| chrono::DateTime::from_timestamp_millis(now).unwrap().date_naive());
                    let broadcast_day = next_day.format("%Y-%m-%d").to_string();

                    last_attempt = Some(match self.schedule.compile_and_insert_day(&state.ctx, self.resolver.as_ref(), next_day) {
                        Ok(violations) => {
                            state.success_count += 1;
                            if !violations.is_empty() {
                                warn!(
                                    channel = %channel_id,
                                    violations = violations.len(),
                                    "horizon extension introduced seam violations; offending tail was not inserted"
                                );
                            }
                            info!(channel = %channel_id, attempt_number, "horizon extended by one day");
                            ExtensionAttempt {
                                channel_id: channel_id.clone(),
                                broadcast_day,
                                success: true,
                                error_code: None,
                                attempt_number,
                            }
                        }
                        Err(err) => {
                            error!(channel = %channel_id, %err, attempt_number, "horizon extension pipeline failed, store left unchanged");
                            ExtensionAttempt {
                                channel_id: channel_id.clone(),
                                broadcast_day,
                                success: false,
                                error_code: Some(err.code().to_string()),
                                attempt_number,
                            }
                        }
                    });
                    self.schedule.end_extension(&channel_id);
                } else {
                    // Single-flight: an extension is already in progress for
                    // this channel. Re-evaluation this tick is a no-op.
                }
            }

            let seam_violations = self.schedule.check_contiguity(&channel_id);
            let min_execution_ms = self.min_execution_hours * 3_600_000;
            let coverage_compliant = remaining_ms >= min_execution_ms && seam_violations.is_empty();

            reports.push(ChannelHealthReport {
                channel_id,
                last_attempt,
                coverage_compliant,
                seam_violations: seam_violations.len(),
                proactive_extension_triggered,
                extension_attempt_count: state.attempt_count,
                extension_success_count: state.success_count,
                remaining_ms,
            });
        }

        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::InMemoryAssetResolver;
    use crate::fill::FillerPool;
    use crate::model::{AssetKind, AssetMetadata};
    use crate::time::ControllableMasterClock;
    use chrono::TimeZone;

    fn resolver_with_episode() -> Arc<dyn AssetResolver> {
        let r = InMemoryAssetResolver::new();
        r.insert(AssetMetadata {
            asset_id: "cheers_s06e01".into(),
            duration_ms: 30 * 60_000,
            chapter_markers_sec: vec![],
            uri: "/media/cheers_s06e01.mp4".into(),
            rating: None,
            kind: AssetKind::Episode,
            children: vec![],
        });
        Arc::new(r)
    }

    fn ctx() -> ChannelScheduleContext {
        ChannelScheduleContext {
            channel_id: "retro1".into(),
            dsl_text: r#"
channel: retro1
broadcast_day: "2026-01-01"
timezone: "America/New_York"
schedule:
  monday:
    - start: "00:00"
      slot_minutes: 30
      content: cheers_s06e01
  tuesday:
    - start: "00:00"
      slot_minutes: 30
      content: cheers_s06e01
"#
            .to_string(),
            grid_minutes: 30,
            filler_pool: FillerPool { assets: vec![] },
            counter_epoch_date: "2026-01-01".to_string(),
        }
    }

    #[test]
    fn evaluate_once_extends_a_low_channel_and_reports_health() {
        let schedule = Arc::new(ScheduleService::new());
        let resolver = resolver_with_episode();

        let day = chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(); // Monday
        schedule.compile_and_insert_day(&ctx(), resolver.as_ref(), day).unwrap();

        let window_end = schedule.window_end_ms("retro1").unwrap();
        let clock = Arc::new(ControllableMasterClock::new(window_end - 1_000));

        let manager = HorizonManager::new(
            clock.clone() as SharedClock,
            schedule.clone(),
            resolver,
            3 * 3_600_000,
            6,
        );
        manager.register_channel(ctx());

        let reports = manager.evaluate_once();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].proactive_extension_triggered);
        assert_eq!(reports[0].extension_success_count, 1);
    }

    #[test]
    fn evaluate_once_is_a_noop_when_window_is_deep() {
        let schedule = Arc::new(ScheduleService::new());
        let resolver = resolver_with_episode();
        let day = chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        schedule.compile_and_insert_day(&ctx(), resolver.as_ref(), day).unwrap();

        let day_start_utc_ms = chrono_tz::America::New_York
            .with_ymd_and_hms(2026, 1, 5, 0, 0, 0)
            .unwrap()
            .timestamp_millis();
        // Well before the block even starts, so remaining_ms is far above
        // the proactive-extend threshold.
        let clock = Arc::new(ControllableMasterClock::new(day_start_utc_ms - 4 * 3_600_000));

        let manager = HorizonManager::new(clock.clone() as SharedClock, schedule, resolver, 3 * 3_600_000, 6);
        manager.register_channel(ctx());

        let reports = manager.evaluate_once();
        assert!(!reports[0].proactive_extension_triggered);
    }
}
