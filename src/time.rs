//! Master clock abstraction.
//!
//! The channel manager and horizon manager never call `SystemTime::now()`
//! directly — they read `now_utc_ms()` from an injected `MasterClock` so
//! tests can drive wall-clock-sensitive state machines deterministically.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait MasterClock: Send + Sync {
    fn now_utc_ms(&self) -> i64;

    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_utc_ms()).unwrap_or_else(Utc::now)
    }
}

/// Real wall-clock time source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl MasterClock for SystemClock {
    fn now_utc_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Test double: a clock whose value only changes when told to.
#[derive(Debug, Clone)]
pub struct ControllableMasterClock {
    now_ms: Arc<Mutex<i64>>,
}

impl ControllableMasterClock {
    pub fn new(start_utc_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(Mutex::new(start_utc_ms)),
        }
    }

    pub fn set(&self, utc_ms: i64) {
        *self.now_ms.lock() = utc_ms;
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        *self.now_ms.lock() += delta_ms;
    }
}

impl MasterClock for ControllableMasterClock {
    fn now_utc_ms(&self) -> i64 {
        *self.now_ms.lock()
    }
}

pub type SharedClock = Arc<dyn MasterClock>;
