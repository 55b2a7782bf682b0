//! Lifecycle configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings the startup pipeline and shutdown sequence read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Name used in the farewell broadcast.
    #[serde(default = "default_software_name")]
    pub software_name: String,

    /// Broadcast a farewell to sessions before shutting down.
    #[serde(default = "default_say_bye")]
    pub say_bye: bool,

    /// Reason used when sessions are disconnected by a plain stop.
    #[serde(default = "default_stop_reason")]
    pub stop_reason: String,

    /// Path of the autoload list written on shutdown.
    #[serde(default = "default_autoload_file")]
    pub autoload_file: PathBuf,

    /// When set, the autoload list is maintained by the operator and never
    /// overwritten on shutdown.
    #[serde(default)]
    pub autoload_locked: bool,

    /// Executable to start on restart. Defaults to the current executable.
    #[serde(default)]
    pub restart_executable: Option<PathBuf>,

    /// Arguments for the restarted process. Defaults to the current arguments.
    #[serde(default)]
    pub restart_args: Option<Vec<String>>,

    /// Whether the update checker may trigger an update restart.
    #[serde(default = "default_check_for_updates")]
    pub check_for_updates: bool,

    /// Interval between update checks (in seconds).
    #[serde(default = "default_update_check_interval")]
    pub update_check_interval_secs: u64,
}

fn default_software_name() -> String {
    "Ember".to_string()
}

fn default_say_bye() -> bool {
    true
}

fn default_stop_reason() -> String {
    "Server shutdown. Rejoin in 10 seconds.".to_string()
}

fn default_autoload_file() -> PathBuf {
    PathBuf::from("text").join("autoload.txt")
}

fn default_check_for_updates() -> bool {
    true
}

fn default_update_check_interval() -> u64 {
    2 * 60 * 60
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            software_name: default_software_name(),
            say_bye: default_say_bye(),
            stop_reason: default_stop_reason(),
            autoload_file: default_autoload_file(),
            autoload_locked: false,
            restart_executable: None,
            restart_args: None,
            check_for_updates: default_check_for_updates(),
            update_check_interval_secs: default_update_check_interval(),
        }
    }
}

impl LifecycleConfig {
    /// Get the update check interval as a Duration.
    pub fn update_check_interval(&self) -> Duration {
        Duration::from_secs(self.update_check_interval_secs)
    }

    /// Executable and arguments used to restart the server.
    pub fn restart_command(&self) -> std::io::Result<(PathBuf, Vec<String>)> {
        let path = match &self.restart_executable {
            Some(path) => path.clone(),
            None => std::env::current_exe()?,
        };
        let args = match &self.restart_args {
            Some(args) => args.clone(),
            None => std::env::args().skip(1).collect(),
        };
        Ok((path, args))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.software_name.trim().is_empty() {
            return Err("software_name must not be empty".to_string());
        }

        if self.update_check_interval_secs == 0 {
            return Err("update_check_interval_secs must be > 0".to_string());
        }

        if self.autoload_file.as_os_str().is_empty() {
            return Err("autoload_file must not be empty".to_string());
        }

        Ok(())
    }
}
