//! Rolling per-channel execution window.

pub mod service;
pub mod window_store;

pub use service::{ChannelScheduleContext, ScheduleService};
pub use window_store::{ExecutionWindowStore, SeamViolation};
