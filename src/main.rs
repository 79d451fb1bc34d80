//! Retrovue runtime
//!
//! A retro-style IPTV playout engine: compiles a per-channel programming DSL
//! into a rolling execution window, drives a clock-paced channel manager
//! across block boundaries, and serves the resulting MPEG-TS/HLS streams
//! plus EPG metadata over HTTP.

mod asrun;
mod asset;
mod channel;
mod config;
mod config_file;
mod dsl;
mod error;
mod expand;
mod fill;
mod horizon;
mod http;
mod metrics;
mod model;
mod producer;
mod schedule;
mod state;
mod stream;
mod time;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::asset::InMemoryAssetResolver;
use crate::channel::{ChannelConfigProvider, YamlChannelConfigProvider};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::fill::FillerPool;
use crate::http::create_router;
use crate::state::AppState;
use crate::time::SystemClock;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_NAME: &str = "retrovue-runtime";

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        match crate::config_file::ConfigFile::from_file(&config_path) {
            Ok(cf) => cf.into_server_config(),
            Err(e) => {
                tracing::warn!("failed to load config file {}: {}. using defaults.", config_path, e);
                ServerConfig::default()
            }
        }
    } else {
        ServerConfig::default()
    };
    tracing::info!(?config, "configuration loaded");

    let clock = Arc::new(SystemClock);
    let resolver = Arc::new(InMemoryAssetResolver::new());
    let state = Arc::new(AppState::new(config.clone(), clock, resolver));

    bootstrap_channels(&state)?;

    spawn_channel_tasks(&state);
    spawn_horizon_task(&state);

    let app = create_router(state.clone());
    let addr: SocketAddr = config.socket_addr().parse().expect("invalid host/port in configuration");
    tracing::info!(%addr, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Load every channel config under `config.channel_config_dir`, read its
/// referenced DSL template and (optional) filler pool from disk, and
/// register each with `state`. A directory that doesn't exist yet just
/// yields zero channels rather than failing startup.
fn bootstrap_channels(state: &AppState) -> Result<()> {
    let dir = &state.config.channel_config_dir;
    if !std::path::Path::new(dir).exists() {
        tracing::warn!(dir, "channel config directory does not exist; starting with no channels");
        return Ok(());
    }

    let provider = YamlChannelConfigProvider::load_dir(dir)?;
    for channel_id in provider.list_channel_ids() {
        let Some(channel_config) = provider.get_channel_config(&channel_id) else {
            continue;
        };

        let dsl_path = std::path::Path::new(dir).join(&channel_config.dsl_path);
        let dsl_text = std::fs::read_to_string(&dsl_path)?;

        let filler_pool = match &channel_config.filler_pool_path {
            Some(path) => FillerPool::load_yaml_file(std::path::Path::new(dir).join(path).to_str().unwrap())?,
            None => FillerPool::default(),
        };

        tracing::info!(channel_id = %channel_id, "registering channel");
        state.register_channel(channel_config, dsl_text, filler_pool);
    }
    Ok(())
}

/// One tick-dispatcher task and one fanout-reader task per registered
/// channel, each looping for the lifetime of the process.
fn spawn_channel_tasks(state: &Arc<AppState>) {
    let tick_period = Duration::from_secs_f64(1.0 / state.config.channel_manager.tick_hz);

    for runtime in state.list_channels() {
        let manager = runtime.manager.clone();
        let channel_id = runtime.channel_id.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_period);
            loop {
                interval.tick().await;
                if let Err(e) = manager.tick() {
                    tracing::error!(channel_id = %channel_id, error = %e, "channel tick failed");
                }
            }
        });

        let producer = runtime.producer.clone();
        let fanout = runtime.fanout.clone();
        tokio::spawn(async move {
            use crate::producer::Producer;
            let rx = producer.get_stream_endpoint();
            fanout.run(rx).await;
        });
    }
}

fn spawn_horizon_task(state: &Arc<AppState>) {
    let horizon = state.horizon.clone();
    let period = Duration::from_secs_f64(1.0 / state.config.horizon_tick_hz.max(0.01));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            for report in horizon.evaluate_once() {
                if !report.coverage_compliant {
                    tracing::warn!(channel_id = %report.channel_id, remaining_ms = report.remaining_ms, "channel horizon below minimum depth");
                }
            }
        }
    });
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retrovue_runtime=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
