//! Application state: the process-wide schedule/horizon services plus one
//! runtime handle per registered channel (manager, producer, fanout,
//! segmenter).

use std::sync::Arc;

use dashmap::DashMap;

use crate::asrun::AsRunLog;
use crate::asset::AssetResolver;
use crate::channel::{ChannelConfig, ChannelManager};
use crate::config::ServerConfig;
use crate::fill::FillerPool;
use crate::horizon::HorizonManager;
use crate::metrics::Metrics;
use crate::producer::FakeProducer;
use crate::schedule::{ChannelScheduleContext, ScheduleService};
use crate::stream::{Fanout, HlsSegmenter};
use crate::time::SharedClock;

/// Everything needed to serve and drive one channel at runtime.
pub struct ChannelRuntime {
    pub channel_id: String,
    pub config: ChannelConfig,
    pub schedule_ctx: ChannelScheduleContext,
    pub manager: Arc<ChannelManager<FakeProducer>>,
    pub producer: FakeProducer,
    pub fanout: Arc<Fanout>,
    pub segmenter: Arc<HlsSegmenter>,
}

/// Application state shared across all HTTP handlers and background tasks.
pub struct AppState {
    pub config: ServerConfig,
    pub clock: SharedClock,
    pub schedule: Arc<ScheduleService>,
    pub horizon: Arc<HorizonManager>,
    pub resolver: Arc<dyn AssetResolver>,
    pub asrun: Arc<AsRunLog>,
    pub metrics: Arc<Metrics>,
    channels: DashMap<String, Arc<ChannelRuntime>>,
}

impl AppState {
    pub fn new(config: ServerConfig, clock: SharedClock, resolver: Arc<dyn AssetResolver>) -> Self {
        let schedule = Arc::new(ScheduleService::new());
        let horizon = Arc::new(HorizonManager::new(
            clock.clone(),
            schedule.clone(),
            resolver.clone(),
            config.schedule.proactive_extend_threshold_ms,
            config.schedule.min_epg_days * 24,
        ));

        Self {
            config,
            clock,
            schedule,
            horizon,
            resolver,
            asrun: Arc::new(AsRunLog::new()),
            metrics: Arc::new(Metrics::new()),
            channels: DashMap::new(),
        }
    }

    /// Register a channel: wires its schedule context into the horizon
    /// manager and spins up a fresh producer/fanout/segmenter/manager set,
    /// storing the runtime handle for HTTP and dispatcher access.
    pub fn register_channel(
        &self,
        channel_config: ChannelConfig,
        dsl_text: String,
        filler_pool: FillerPool,
    ) -> Arc<ChannelRuntime> {
        let channel_id = channel_config.channel_id.clone();

        let schedule_ctx = ChannelScheduleContext {
            channel_id: channel_id.clone(),
            dsl_text,
            grid_minutes: self.config.schedule.grid_minutes,
            filler_pool,
            counter_epoch_date: self.config.schedule.fixed_epoch_date.clone(),
        };
        self.horizon.register_channel(schedule_ctx.clone());

        let producer = FakeProducer::new();
        let _ = producer.start(&[], self.clock.now_utc_ms());

        let manager = Arc::new(ChannelManager::new(
            channel_id.clone(),
            self.clock.clone(),
            producer.clone(),
            self.schedule.clone(),
            self.config.channel_manager.clone(),
            self.asrun.clone(),
        ));

        let segmenter = Arc::new(HlsSegmenter::new(
            self.config.hls.target_duration_secs,
            self.config.hls.max_segments,
            self.clock.now_utc_ms(),
        ));
        let fanout = Arc::new(Fanout::new(channel_id.clone(), self.clock.clone(), segmenter.clone()));

        let runtime = Arc::new(ChannelRuntime {
            channel_id: channel_id.clone(),
            config: channel_config,
            schedule_ctx,
            manager,
            producer,
            fanout,
            segmenter,
        });
        self.channels.insert(channel_id, runtime.clone());
        runtime
    }

    pub fn get_channel(&self, channel_id: &str) -> Option<Arc<ChannelRuntime>> {
        self.channels.get(channel_id).map(|r| r.clone())
    }

    pub fn list_channels(&self) -> Vec<Arc<ChannelRuntime>> {
        self.channels.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::InMemoryAssetResolver;
    use crate::time::ControllableMasterClock;

    fn state() -> AppState {
        AppState::new(
            ServerConfig::default(),
            Arc::new(ControllableMasterClock::new(0)),
            Arc::new(InMemoryAssetResolver::new()),
        )
    }

    #[test]
    fn registering_a_channel_makes_it_listable() {
        let state = state();
        let cfg = ChannelConfig {
            channel_id: "retro1".into(),
            channel_id_int: 1,
            name: "Retro 1".into(),
            program_format: Default::default(),
            dsl_path: "retro1.yaml".into(),
            filler_pool_path: None,
        };
        state.register_channel(
            cfg,
            "channel: retro1\ntimezone: UTC\nschedule: {}\n".into(),
            FillerPool { assets: vec![] },
        );

        assert!(state.get_channel("retro1").is_some());
        assert_eq!(state.list_channels().len(), 1);
        assert!(state.get_channel("missing").is_none());
    }
}
