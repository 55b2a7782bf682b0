//! Configuration schema definitions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub timers: TimersConfig,

    #[serde(default)]
    pub paths: PathsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name shown to players and in the farewell broadcast.
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// World loaded (or generated) first at startup.
    #[serde(default = "default_main_world")]
    pub main_world: String,

    /// Broadcast "<name> shutting down!" before disconnecting players.
    #[serde(default = "default_true")]
    pub say_bye: bool,

    /// Never rewrite the autoload list on shutdown.
    #[serde(default)]
    pub autoload_locked: bool,

    #[serde(default = "default_true")]
    pub check_for_updates: bool,

    /// URL returning the latest released version as plain text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            listen_ip: default_listen_ip(),
            port: default_port(),
            main_world: default_main_world(),
            say_bye: true,
            autoload_locked: false,
            check_for_updates: true,
            update_url: None,
        }
    }
}

impl ServerConfig {
    /// `listen_ip:port`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_ip, self.port)
    }
}

fn default_name() -> String {
    "Ember".to_string()
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    25565
}

fn default_main_world() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

/// Intervals of the periodic server jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimersConfig {
    #[serde(default = "default_announcement_interval")]
    pub announcement_interval_secs: u64,

    #[serde(default = "default_position_update_interval")]
    pub position_update_interval_ms: u64,

    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_cache_cleanup_interval")]
    pub cache_cleanup_interval_secs: u64,

    #[serde(default = "default_update_check_interval")]
    pub update_check_interval_secs: u64,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            announcement_interval_secs: default_announcement_interval(),
            position_update_interval_ms: default_position_update_interval(),
            tick_interval_ms: default_tick_interval(),
            cache_cleanup_interval_secs: default_cache_cleanup_interval(),
            update_check_interval_secs: default_update_check_interval(),
        }
    }
}

impl TimersConfig {
    pub fn announcement_interval(&self) -> Duration {
        Duration::from_secs(self.announcement_interval_secs)
    }

    pub fn position_update_interval(&self) -> Duration {
        Duration::from_millis(self.position_update_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_interval_secs)
    }
}

fn default_announcement_interval() -> u64 {
    300
}

fn default_position_update_interval() -> u64 {
    100
}

fn default_tick_interval() -> u64 {
    20
}

fn default_cache_cleanup_interval() -> u64 {
    300
}

fn default_update_check_interval() -> u64 {
    7200
}

/// File locations. Relative paths resolve against `data_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_worlds_dir")]
    pub worlds_dir: PathBuf,

    #[serde(default = "default_autoload_file")]
    pub autoload_file: PathBuf,

    #[serde(default = "default_temp_ranks_file")]
    pub temp_ranks_file: PathBuf,

    #[serde(default = "default_muted_file")]
    pub muted_file: PathBuf,

    #[serde(default = "default_frozen_file")]
    pub frozen_file: PathBuf,

    #[serde(default = "default_announcements_file")]
    pub announcements_file: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            worlds_dir: default_worlds_dir(),
            autoload_file: default_autoload_file(),
            temp_ranks_file: default_temp_ranks_file(),
            muted_file: default_muted_file(),
            frozen_file: default_frozen_file(),
            announcements_file: default_announcements_file(),
            log_dir: default_log_dir(),
        }
    }
}

impl PathsConfig {
    /// `data_dir` with a leading `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.data_dir)
    }

    /// Resolve `path` against `data_dir`, expanding a leading `~`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let path = expand_tilde(path);
        if path.is_absolute() {
            path
        } else {
            self.data_dir().join(path)
        }
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_worlds_dir() -> PathBuf {
    PathBuf::from("levels")
}

fn default_autoload_file() -> PathBuf {
    PathBuf::from("text/autoload.txt")
}

fn default_temp_ranks_file() -> PathBuf {
    PathBuf::from("text/tempranks.txt")
}

fn default_muted_file() -> PathBuf {
    PathBuf::from("ranks/muted.txt")
}

fn default_frozen_file() -> PathBuf {
    PathBuf::from("ranks/frozen.txt")
}

fn default_announcements_file() -> PathBuf {
    PathBuf::from("text/messages.txt")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.name, "Ember");
        assert_eq!(config.server.listen_addr(), "0.0.0.0:25565");
        assert!(config.server.say_bye);
        assert!(!config.server.autoload_locked);
        assert_eq!(config.timers.tick_interval(), Duration::from_millis(20));
        assert_eq!(config.timers.cache_cleanup_interval(), Duration::from_secs(300));
        assert_eq!(config.paths.autoload_file, PathBuf::from("text/autoload.txt"));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [timers]
            tick_interval_ms = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.timers.tick_interval_ms, 50);
        assert_eq!(config.timers.position_update_interval_ms, 100);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let paths = PathsConfig {
            data_dir: PathBuf::from("/srv/ember"),
            ..Default::default()
        };
        assert_eq!(
            paths.resolve(&paths.autoload_file),
            PathBuf::from("/srv/ember/text/autoload.txt")
        );
        assert_eq!(
            paths.resolve(Path::new("/var/log/ember")),
            PathBuf::from("/var/log/ember")
        );
    }

    #[test]
    fn test_resolve_expands_tilde() {
        let paths = PathsConfig {
            data_dir: PathBuf::from("~/ember"),
            ..Default::default()
        };
        let resolved = paths.resolve(Path::new("logs"));
        assert!(!resolved.to_string_lossy().starts_with('~'));
        assert!(resolved.ends_with("ember/logs"));
    }

    #[test]
    fn test_serialize_skips_missing_update_url() {
        let text = toml::to_string(&Config::default()).unwrap();
        assert!(!text.contains("update_url"));
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, Config::default());
    }
}
