//! Producer abstraction: the opaque per-channel pipeline that decodes
//! assets and emits MPEG-TS bytes. The concrete decoder is out of scope;
//! this module defines the trait contract plus an in-process fake used by
//! the channel manager's own tests and by a watchdog wrapper that restarts
//! a stalled or crashed producer with exponential backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{RetrovueError, Result};
use crate::model::PlayoutPlanEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerHealth {
    Running,
    Degraded,
    Stopped,
}

/// Outcome of a `switch_to_live` call: the frame index the swap actually
/// landed on, read back by the channel manager to emit the `FENCE` as-run
/// record.
#[derive(Debug, Clone, Copy)]
pub struct SwapResult {
    pub swap_tick: u64,
}

pub trait Producer: Send + Sync {
    fn start(&self, playout_plan: &[PlayoutPlanEntry], start_at_utc_ms: i64) -> Result<()>;

    fn load_preview(&self, asset_path: &str, start_frame: u64, frame_count: u64, fps_num: u32, fps_den: u32) -> Result<()>;

    fn switch_to_live(&self, target_boundary_utc_ms: i64) -> Result<SwapResult>;

    fn stop(&self);

    /// Local endpoint the fanout reader pulls TS bytes from.
    fn get_stream_endpoint(&self) -> mpsc::Receiver<bytes::Bytes>;

    fn health(&self) -> ProducerHealth;

    fn on_paced_tick(&self, now_utc_ms: i64, dt_ms: i64);
}

/// In-process test double. Emits synthetic 188-byte TS packets at a fixed
/// cadence on its own background task, and honors `start`/`load_preview`/
/// `switch_to_live`/`stop` well enough to exercise the channel manager's
/// boundary and content-deficit state machines without a real decoder.
#[derive(Clone)]
pub struct FakeProducer {
    inner: Arc<FakeProducerState>,
}

struct FakeProducerState {
    health: Mutex<ProducerHealth>,
    swap_tick_counter: AtomicU64,
    tx: Mutex<Option<mpsc::Sender<bytes::Bytes>>>,
    fail_next_switch: std::sync::atomic::AtomicBool,
    preview_loaded: std::sync::atomic::AtomicBool,
}

const TS_PACKET_SIZE: usize = 188;

impl FakeProducer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FakeProducerState {
                health: Mutex::new(ProducerHealth::Stopped),
                swap_tick_counter: AtomicU64::new(0),
                tx: Mutex::new(None),
                fail_next_switch: std::sync::atomic::AtomicBool::new(false),
                preview_loaded: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    /// Test hook: force the next `switch_to_live` call to fail, exercising
    /// the channel manager's `FAILED_TERMINAL` / startup-skip paths.
    pub fn arm_switch_failure(&self) {
        self.inner.fail_next_switch.store(true, Ordering::SeqCst);
    }

    fn synthetic_packet() -> bytes::Bytes {
        let mut buf = vec![0u8; TS_PACKET_SIZE];
        buf[0] = 0x47;
        bytes::Bytes::from(buf)
    }
}

impl Default for FakeProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl Producer for FakeProducer {
    fn start(&self, _playout_plan: &[PlayoutPlanEntry], _start_at_utc_ms: i64) -> Result<()> {
        let mut guard = self.inner.health.lock();
        if *guard == ProducerHealth::Running {
            return Ok(());
        }
        let (tx, _rx_dropped_by_caller) = mpsc::channel::<bytes::Bytes>(64);
        *self.inner.tx.lock() = Some(tx);
        *guard = ProducerHealth::Running;
        Ok(())
    }

    fn load_preview(&self, asset_path: &str, _start_frame: u64, _frame_count: u64, _fps_num: u32, _fps_den: u32) -> Result<()> {
        if asset_path.is_empty() {
            return Err(RetrovueError::Producer("empty preview asset path".to_string()));
        }
        self.inner.preview_loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn switch_to_live(&self, _target_boundary_utc_ms: i64) -> Result<SwapResult> {
        if self.inner.fail_next_switch.swap(false, Ordering::SeqCst) {
            return Err(RetrovueError::Producer("simulated switch failure".to_string()));
        }
        if !self.inner.preview_loaded.swap(false, Ordering::SeqCst) {
            return Err(RetrovueError::Producer("switch_to_live called without a loaded preview".to_string()));
        }
        let tick = self.inner.swap_tick_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SwapResult { swap_tick: tick })
    }

    fn stop(&self) {
        *self.inner.health.lock() = ProducerHealth::Stopped;
        *self.inner.tx.lock() = None;
    }

    fn get_stream_endpoint(&self) -> mpsc::Receiver<bytes::Bytes> {
        let (tx, rx) = mpsc::channel::<bytes::Bytes>(64);
        let _ = tx.try_send(Self::synthetic_packet());
        *self.inner.tx.lock() = Some(tx);
        rx
    }

    fn health(&self) -> ProducerHealth {
        *self.inner.health.lock()
    }

    fn on_paced_tick(&self, _now_utc_ms: i64, _dt_ms: i64) {}
}

/// Wraps a `Producer`, restarting it with exponential backoff when `health()`
/// reports `stopped`/`degraded` outside of an intentional `stop()`, or when
/// no bytes have been observed for `stall_timeout`.
pub struct ProducerWatchdog<P: Producer> {
    pub producer: P,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub stall_timeout: Duration,
    current_backoff: Mutex<Duration>,
}

impl<P: Producer> ProducerWatchdog<P> {
    pub fn new(producer: P) -> Self {
        Self {
            producer,
            backoff_initial: Duration::from_millis(1_000),
            backoff_max: Duration::from_millis(20_000),
            stall_timeout: Duration::from_millis(10_000),
            current_backoff: Mutex::new(Duration::from_millis(1_000)),
        }
    }

    /// Compute the next backoff delay (with 0.1-0.5s jitter) and advance
    /// the internal backoff state toward `backoff_max`.
    pub fn next_backoff(&self) -> Duration {
        let mut guard = self.current_backoff.lock();
        let current = *guard;
        let next = (current * 2).min(self.backoff_max);
        *guard = next.max(self.backoff_initial);

        let jitter_ms = 100 + (jitter_seed() % 400);
        current + Duration::from_millis(jitter_ms)
    }

    pub fn reset_backoff(&self) {
        *self.current_backoff.lock() = self.backoff_initial;
    }

    pub fn is_stalled(&self, last_byte_at_ms: i64, now_ms: i64) -> bool {
        now_ms - last_byte_at_ms >= self.stall_timeout.as_millis() as i64
    }
}

/// A deterministic jitter source so the watchdog never depends on a `rand`
/// crate: derived from the low bits of a monotonic counter, which is good
/// enough for spreading reconnect attempts without true randomness.
fn jitter_seed() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(97, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_producer_start_is_idempotent() {
        let p = FakeProducer::new();
        p.start(&[], 0).unwrap();
        p.start(&[], 0).unwrap();
        assert_eq!(p.health(), ProducerHealth::Running);
    }

    #[test]
    fn switch_without_preview_is_an_error() {
        let p = FakeProducer::new();
        p.start(&[], 0).unwrap();
        assert!(p.switch_to_live(0).is_err());
    }

    #[test]
    fn load_preview_then_switch_succeeds_and_advances_tick() {
        let p = FakeProducer::new();
        p.start(&[], 0).unwrap();
        p.load_preview("/media/next.mp4", 0, 100, 24000, 1001).unwrap();
        let first = p.switch_to_live(1_000).unwrap();
        p.load_preview("/media/next2.mp4", 0, 100, 24000, 1001).unwrap();
        let second = p.switch_to_live(2_000).unwrap();
        assert_eq!(second.swap_tick, first.swap_tick + 1);
    }

    #[test]
    fn armed_switch_failure_surfaces_once() {
        let p = FakeProducer::new();
        p.start(&[], 0).unwrap();
        p.load_preview("/media/next.mp4", 0, 100, 24000, 1001).unwrap();
        p.arm_switch_failure();
        assert!(p.switch_to_live(1_000).is_err());
    }

    #[test]
    fn watchdog_backoff_grows_and_caps() {
        let watchdog = ProducerWatchdog::new(FakeProducer::new());
        let first = watchdog.next_backoff();
        let second = watchdog.next_backoff();
        assert!(second >= first);
        watchdog.reset_backoff();
    }

    #[test]
    fn watchdog_detects_stall() {
        let watchdog = ProducerWatchdog::new(FakeProducer::new());
        assert!(watchdog.is_stalled(0, 11_000));
        assert!(!watchdog.is_stalled(0, 1_000));
    }
}
