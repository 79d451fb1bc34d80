//! Configuration file support — loads server configuration from TOML,
//! mirroring the runtime `ServerConfig` but with every field optional so a
//! partial file still produces a complete, defaulted configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{ChannelManagerConfig, HlsConfig, ScheduleConfig, ServerConfig};
use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub server: Option<ServerSettings>,
    pub schedule: Option<ScheduleConfig>,
    pub channel_manager: Option<ChannelManagerConfig>,
    pub hls: Option<HlsConfig>,
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_enabled: Option<bool>,
    pub channel_config_dir: Option<String>,
    pub horizon_tick_hz: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub format: Option<String>,
}

impl ConfigFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&content)?)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn default_config() -> Self {
        Self {
            server: Some(ServerSettings {
                host: Some("0.0.0.0".to_string()),
                port: Some(3000),
                cors_enabled: Some(true),
                channel_config_dir: Some("./channels".to_string()),
                horizon_tick_hz: Some(1.0),
            }),
            schedule: Some(ScheduleConfig::default()),
            channel_manager: Some(ChannelManagerConfig::default()),
            hls: Some(HlsConfig::default()),
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                format: Some("pretty".to_string()),
            }),
        }
    }

    /// Layer this file's settings over `ServerConfig::default()`.
    pub fn into_server_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        let server = self.server.unwrap_or(ServerSettings {
            host: None,
            port: None,
            cors_enabled: None,
            channel_config_dir: None,
            horizon_tick_hz: None,
        });

        ServerConfig {
            host: server.host.unwrap_or(defaults.host),
            port: server.port.unwrap_or(defaults.port),
            cors_enabled: server.cors_enabled.unwrap_or(defaults.cors_enabled),
            log_level: self
                .logging
                .map(|l| l.level)
                .unwrap_or(defaults.log_level),
            channel_config_dir: server
                .channel_config_dir
                .unwrap_or(defaults.channel_config_dir),
            schedule: self.schedule.unwrap_or(defaults.schedule),
            channel_manager: self.channel_manager.unwrap_or(defaults.channel_manager),
            hls: self.hls.unwrap_or(defaults.hls),
            horizon_tick_hz: server.horizon_tick_hz.unwrap_or(defaults.horizon_tick_hz),
        }
    }
}

pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    ConfigFile::default_config().to_file(path)
}
