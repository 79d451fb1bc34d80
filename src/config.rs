//! Server configuration: the tunables table from the external-interfaces
//! section, given defaults and a TOML-backed `ServerConfig` in the same
//! shape the rest of the ambient stack uses.

use serde::{Deserialize, Serialize};

/// Scheduling/horizon tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub grid_minutes: i64,
    pub programming_day_start_hour: u32,
    pub horizon_days: i64,
    pub recompile_threshold_hours: i64,
    pub proactive_extend_threshold_ms: i64,
    pub min_epg_days: i64,
    pub fixed_epoch_date: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            grid_minutes: 30,
            programming_day_start_hour: 6,
            horizon_days: 3,
            recompile_threshold_hours: 6,
            proactive_extend_threshold_ms: 3 * 3_600_000,
            min_epg_days: 3,
            fixed_epoch_date: "2026-01-01".to_string(),
        }
    }
}

/// Channel-manager startup/boundary tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelManagerConfig {
    pub max_startup_convergence_window_secs: i64,
    pub min_prefeed_lead_time_secs: i64,
    pub prefeed_lead_time_secs: i64,
    pub switch_lead_time_ms: i64,
    pub tick_hz: f64,
}

impl Default for ChannelManagerConfig {
    fn default() -> Self {
        Self {
            max_startup_convergence_window_secs: 120,
            min_prefeed_lead_time_secs: 5,
            prefeed_lead_time_secs: 5,
            switch_lead_time_ms: 200,
            tick_hz: 10.0,
        }
    }
}

/// HLS segmenter tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HlsConfig {
    pub target_duration_secs: f64,
    pub max_segments: usize,
    pub wait_for_playlist_timeout_secs: f64,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            target_duration_secs: 2.0,
            max_segments: 10,
            wait_for_playlist_timeout_secs: 5.0,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
    pub log_level: String,
    pub channel_config_dir: String,
    pub schedule: ScheduleConfig,
    pub channel_manager: ChannelManagerConfig,
    pub hls: HlsConfig,
    pub horizon_tick_hz: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_enabled: true,
            log_level: "info".to_string(),
            channel_config_dir: "./channels".to_string(),
            schedule: ScheduleConfig::default(),
            channel_manager: ChannelManagerConfig::default(),
            hls: HlsConfig::default(),
            horizon_tick_hz: 1.0,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file(&self, path: &str) -> crate::error::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.schedule.grid_minutes, 30);
        assert_eq!(config.channel_manager.max_startup_convergence_window_secs, 120);
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.socket_addr(), "127.0.0.1:8080");
    }
}
