//! Channel manager: the boundary/switch state machine that keeps one
//! channel's producer output live across block boundaries, content
//! deficits, and startup convergence.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::asrun::{AsRunLog, TerminalStatus};
use crate::config::ChannelManagerConfig;
use crate::error::Result;
use crate::model::PlayoutPlanEntry;
use crate::producer::Producer;
use crate::schedule::ScheduleService;
use crate::time::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryState {
    Planned,
    PrefeedIssued,
    SwitchIssued,
    Live,
    FailedTerminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Idle,
    Armed,
    Committed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRunState {
    Starting,
    Running,
    Failed,
}

struct ManagerState {
    boundary_state: BoundaryState,
    switch_state: SwitchState,
    converged: bool,
    convergence_deadline_utc_ms: i64,
    /// Wall-clock end of the segment currently playing; the next boundary.
    segment_end_time_utc_ms: i64,
    pending_fatal: bool,
    run_state: ChannelRunState,
    deficit_active: bool,
    swap_tick_counter: u64,
    /// The segment currently open in the as-run log (`SEG_START` emitted,
    /// terminal row not yet written).
    current_segment: Option<OpenSegment>,
}

/// A segment that has a `SEG_START` row in the as-run log but no terminal
/// row yet, tracked so the next tick knows when and how to close it.
struct OpenSegment {
    block_id: String,
    segment_index: i64,
    start_utc_ms: i64,
}

/// Result of locating the segment covering a given instant.
struct LocatedSegment {
    block_id: String,
    segment_index: i64,
    start_utc_ms: i64,
}

/// Approximate frame count for an elapsed span, used only for as-run
/// `frames` fields. The real count comes from the producer, which is out
/// of scope here; this stands in using the one rate the fake producer and
/// schedule tests assume.
const ASSUMED_FRAME_RATE_HZ: f64 = 30.0;

fn frames_for_elapsed_ms(elapsed_ms: i64) -> u64 {
    ((elapsed_ms.max(0) as f64 / 1000.0) * ASSUMED_FRAME_RATE_HZ).round() as u64
}

/// Owns one channel's state machine and its one producer. `tick()` is the
/// only place that mutates the state machine; everything else only reads.
pub struct ChannelManager<P: Producer> {
    pub channel_id: String,
    clock: SharedClock,
    producer: P,
    schedule: Arc<ScheduleService>,
    config: ChannelManagerConfig,
    asrun: Arc<AsRunLog>,
    state: Mutex<ManagerState>,
}

impl<P: Producer> ChannelManager<P> {
    pub fn new(
        channel_id: impl Into<String>,
        clock: SharedClock,
        producer: P,
        schedule: Arc<ScheduleService>,
        config: ChannelManagerConfig,
        asrun: Arc<AsRunLog>,
    ) -> Self {
        let channel_id = channel_id.into();
        let now = clock.now_utc_ms();
        let segment_end_time_utc_ms = schedule
            .get_block_at(&channel_id, now)
            .map(|b| b.end_utc_ms)
            .unwrap_or(now);
        let convergence_window_ms = config.max_startup_convergence_window_secs * 1000;

        Self {
            channel_id,
            clock,
            producer,
            schedule,
            config,
            asrun,
            state: Mutex::new(ManagerState {
                boundary_state: BoundaryState::Planned,
                switch_state: SwitchState::Idle,
                converged: false,
                convergence_deadline_utc_ms: now + convergence_window_ms,
                segment_end_time_utc_ms,
                pending_fatal: false,
                run_state: ChannelRunState::Starting,
                deficit_active: false,
                swap_tick_counter: 0,
                current_segment: None,
            }),
        }
    }

    /// Session creation is ungated: viewers may join regardless of
    /// convergence or boundary state, and simply get the covering block's
    /// current segment.
    pub fn current_playout_plan(&self) -> Vec<PlayoutPlanEntry> {
        let now = self.clock.now_utc_ms();
        self.schedule.get_playout_plan_now(&self.channel_id, now)
    }

    pub fn is_failed(&self) -> bool {
        self.state.lock().run_state == ChannelRunState::Failed
    }

    pub fn converged(&self) -> bool {
        self.state.lock().converged
    }

    /// One tick of the dispatcher loop. Must be called at a fixed cadence
    /// of at least `config.tick_hz` from a single thread per channel.
    pub fn tick(&self) -> Result<()> {
        let now = self.clock.now_utc_ms();
        let mut state = self.state.lock();

        if state.pending_fatal {
            if state.run_state != ChannelRunState::Failed {
                self.producer.stop();
                state.run_state = ChannelRunState::Failed;
                state.boundary_state = BoundaryState::FailedTerminal;
                error!(channel = %self.channel_id, "channel entered terminal failure");
            }
            return Ok(());
        }

        if !state.converged && now > state.convergence_deadline_utc_ms {
            state.pending_fatal = true;
            error!(channel = %self.channel_id, "startup convergence deadline expired before first successful boundary swap");
            return Ok(());
        }

        self.evaluate_segment(&mut state, now)?;
        self.evaluate_boundary(&mut state, now)?;
        let dt_ms = (1000.0 / self.config.tick_hz).round() as i64;
        drop(state);
        self.producer.on_paced_tick(now, dt_ms);
        Ok(())
    }

    fn evaluate_boundary(&self, state: &mut ManagerState, now: i64) -> Result<()> {
        let lead_ms = state.segment_end_time_utc_ms - now;
        let min_prefeed_ms = self.config.min_prefeed_lead_time_secs * 1000;
        let prefeed_window_ms = self.config.prefeed_lead_time_secs * 1000;

        match state.boundary_state {
            BoundaryState::Planned => {
                if lead_ms > prefeed_window_ms {
                    return Ok(());
                }
                if lead_ms < min_prefeed_ms {
                    if state.converged {
                        state.pending_fatal = true;
                        error!(channel = %self.channel_id, lead_ms, min_prefeed_ms, "infeasible boundary after convergence is fatal");
                    } else {
                        warn!(channel = %self.channel_id, lead_ms, min_prefeed_ms, "boundary skipped during startup convergence");
                        self.advance_to_next_block(state);
                    }
                    return Ok(());
                }
                match self.next_block_asset_path(state.segment_end_time_utc_ms) {
                    Some(path) => {
                        self.producer.load_preview(&path, 0, 0, 24000, 1001)?;
                        state.boundary_state = BoundaryState::PrefeedIssued;
                    }
                    None => {
                        if !state.deficit_active {
                            state.deficit_active = true;
                            warn!(channel = %self.channel_id, "content deficit: no compiled block past current boundary");
                        }
                    }
                }
            }
            BoundaryState::PrefeedIssued => {
                if lead_ms > self.config.switch_lead_time_ms {
                    return Ok(());
                }
                match self.producer.switch_to_live(state.segment_end_time_utc_ms) {
                    Ok(result) => {
                        state.switch_state = SwitchState::Armed;
                        state.boundary_state = BoundaryState::SwitchIssued;
                        state.swap_tick_counter = result.swap_tick;
                    }
                    Err(err) => {
                        if state.converged {
                            state.pending_fatal = true;
                            error!(channel = %self.channel_id, %err, "switch_to_live failed after convergence");
                        } else {
                            warn!(channel = %self.channel_id, %err, "switch_to_live failed during startup, skipping boundary");
                            self.advance_to_next_block(state);
                        }
                    }
                }
            }
            BoundaryState::SwitchIssued => {
                let swap_tick = state.swap_tick_counter;
                state.switch_state = SwitchState::Committed;
                state.boundary_state = BoundaryState::Live;
                self.asrun
                    .record_fence(&self.channel_id, now, Some(swap_tick), Some(swap_tick), 0, 0, "boundary_swap")?;

                if !state.converged {
                    state.converged = true;
                    state.run_state = ChannelRunState::Running;
                    info!(channel = %self.channel_id, "startup convergence achieved");
                }
                if state.deficit_active {
                    state.deficit_active = false;
                    info!(channel = %self.channel_id, "content deficit cleared at boundary swap");
                }
                self.advance_to_next_block(state);
            }
            BoundaryState::Live | BoundaryState::FailedTerminal => {}
        }
        Ok(())
    }

    /// Emit `SEG_START`/terminal rows as playback moves from one segment to
    /// the next. Runs ahead of `evaluate_boundary` so a segment that closes
    /// because the horizon has no further content is recorded before the
    /// boundary machinery reacts to the same gap.
    fn evaluate_segment(&self, state: &mut ManagerState, now: i64) -> Result<()> {
        let located = self.locate_segment(now);
        match (state.current_segment.take(), located) {
            (None, Some(seg)) => {
                self.asrun.record_seg_start(&self.channel_id, seg.start_utc_ms, seg.segment_index);
                state.current_segment = Some(OpenSegment {
                    block_id: seg.block_id,
                    segment_index: seg.segment_index,
                    start_utc_ms: seg.start_utc_ms,
                });
            }
            (Some(open), Some(seg)) => {
                if open.block_id == seg.block_id && open.segment_index == seg.segment_index {
                    state.current_segment = Some(open);
                } else {
                    let elapsed_ms = seg.start_utc_ms - open.start_utc_ms;
                    self.asrun.record_terminal(
                        &self.channel_id,
                        seg.start_utc_ms,
                        open.segment_index,
                        TerminalStatus::Aired,
                        frames_for_elapsed_ms(elapsed_ms),
                        false,
                    )?;
                    self.asrun.record_seg_start(&self.channel_id, seg.start_utc_ms, seg.segment_index);
                    state.current_segment = Some(OpenSegment {
                        block_id: seg.block_id,
                        segment_index: seg.segment_index,
                        start_utc_ms: seg.start_utc_ms,
                    });
                }
            }
            (Some(open), None) => {
                // Horizon has no block covering `now`: the open segment ran
                // out early. This is the content-deficit path; pad emission
                // keeps TS bytes flowing but the as-run row must say so.
                let elapsed_ms = now - open.start_utc_ms;
                self.asrun.record_terminal(
                    &self.channel_id,
                    now,
                    open.segment_index,
                    TerminalStatus::Truncated,
                    frames_for_elapsed_ms(elapsed_ms),
                    true,
                )?;
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Find the segment covering `at_utc_ms` within the block the schedule
    /// service reports for that instant, along with its block-local index.
    fn locate_segment(&self, at_utc_ms: i64) -> Option<LocatedSegment> {
        let block = self.schedule.get_block_at(&self.channel_id, at_utc_ms)?;
        let mut cursor = block.start_utc_ms;
        for (idx, seg) in block.segments.iter().enumerate() {
            let seg_end = cursor + seg.segment_duration_ms;
            if cursor <= at_utc_ms && at_utc_ms < seg_end {
                return Some(LocatedSegment {
                    block_id: block.block_id.clone(),
                    segment_index: idx as i64,
                    start_utc_ms: cursor,
                });
            }
            cursor = seg_end;
        }
        None
    }

    fn next_block_asset_path(&self, boundary_utc_ms: i64) -> Option<String> {
        let next = self.schedule.get_block_at(&self.channel_id, boundary_utc_ms)?;
        next.segments.first().map(|s| s.asset_uri.clone())
    }

    fn advance_to_next_block(&self, state: &mut ManagerState) {
        match self.schedule.get_block_at(&self.channel_id, state.segment_end_time_utc_ms) {
            Some(next) => {
                state.segment_end_time_utc_ms = next.end_utc_ms;
                state.boundary_state = BoundaryState::Planned;
                state.switch_state = SwitchState::Idle;
            }
            None => {
                if !state.deficit_active {
                    state.deficit_active = true;
                    warn!(channel = %self.channel_id, "content deficit: horizon has not yet covered the next boundary");
                }
            }
        }
    }
}
