//! Server configuration, loaded from YAML.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sagebrush_protocol::{GridBounds, GridPos};
use serde::{Deserialize, Serialize};

use crate::session::SessionSettings;

/// Server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the UDP transport
    pub bind_address: SocketAddr,
    /// Maximum simultaneous connections
    pub max_clients: usize,
    /// Playable grid
    pub grid: GridBounds,
    /// First cell of the spawn row for maps without a spawn table
    pub default_spawn: GridPos,
    /// Largest roster a session may be created with
    pub max_players_limit: u32,
    /// Sessions with no subscribers are evicted after this long without activity
    pub idle_timeout_secs: u64,
    /// Ended sessions are kept this long so late clients can still sync
    pub ended_retention_secs: u64,
    /// How often the idle sweep runs
    pub sweep_interval_secs: u64,
    /// Messages allowed per connection per rate window
    pub rate_limit_messages: u32,
    pub rate_limit_window_secs: u64,
    /// Where session records are kept; `None` disables persistence
    pub persistence_dir: Option<PathBuf>,
    /// Transport ticks per second
    pub tick_rate_hz: u32,
    /// YAML file with principals, characters and maps for the built-in collaborators
    pub fixtures: Option<PathBuf>,
    /// Seed for reproducible dice; random when absent
    pub dice_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 7878)),
            max_clients: 64,
            grid: GridBounds::default(),
            default_spawn: GridPos::new(0, 0),
            max_players_limit: 8,
            idle_timeout_secs: 30 * 60,
            ended_retention_secs: 5 * 60,
            sweep_interval_secs: 30,
            rate_limit_messages: 100,
            rate_limit_window_secs: 60,
            persistence_dir: None,
            tick_rate_hz: 60,
            fixtures: None,
            dice_seed: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            bounds: self.grid,
            default_spawn: self.default_spawn,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn ended_retention(&self) -> Duration {
        Duration::from_secs(self.ended_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_tabletop_expectations() {
        let config = ServerConfig::default();
        assert_eq!(config.grid, GridBounds::new(200, 200));
        assert_eq!(config.idle_timeout(), Duration::from_secs(1800));
        assert_eq!(config.ended_retention(), Duration::from_secs(300));
        assert_eq!(config.rate_limit_messages, 100);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bind_address: 127.0.0.1:9000\nidle_timeout_secs: 60\ngrid:\n  width: 50\n  height: 40"
        )
        .unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.bind_address.port(), 9000);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.grid, GridBounds::new(50, 40));
        assert_eq!(config.max_clients, 64);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ServerConfig::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }
}
