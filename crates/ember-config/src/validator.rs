//! Configuration validation.

use crate::schema::Config;

/// A problem found at a config key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Dotted key, e.g. `timers.tick_interval_ms`.
    pub path: String,
    pub message: String,
}

impl Issue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors make the config unusable; warnings are logged at startup.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(Issue::new(path, message));
    }

    fn warning(&mut self, path: &str, message: impl Into<String>) {
        self.warnings.push(Issue::new(path, message));
    }

    fn has(issues: &[Issue], path: &str) -> bool {
        issues.iter().any(|i| i.path == path)
    }

    /// Check if there is an error at `path`.
    pub fn has_error(&self, path: &str) -> bool {
        Self::has(&self.errors, path)
    }

    /// Check if there is a warning at `path`.
    pub fn has_warning(&self, path: &str) -> bool {
        Self::has(&self.warnings, path)
    }
}

/// Below this a Critical-tier job would monopolise its thread.
const MIN_SENSIBLE_TICK_MS: u64 = 5;

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_timers(config, &mut result);
        Self::validate_paths(config, &mut result);

        result
    }

    fn validate_server(config: &Config, result: &mut ValidationResult) {
        let server = &config.server;

        if server.port == 0 {
            result.error("server.port", "Port cannot be 0");
        }
        if server.name.trim().is_empty() {
            result.error("server.name", "Name cannot be empty");
        }
        if server.main_world.trim().is_empty() {
            result.error("server.main_world", "Main world cannot be empty");
        }

        if server.listen_ip.trim().is_empty() {
            result.warning(
                "server.listen_ip",
                "Listen IP is empty, listening on any address",
            );
        } else if server.listen_ip.parse::<std::net::IpAddr>().is_err() {
            result.warning(
                "server.listen_ip",
                format!(
                    "Unable to parse listen IP '{}', listening on any address",
                    server.listen_ip
                ),
            );
        }

        match &server.update_url {
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                result.error(
                    "server.update_url",
                    "update_url must start with http:// or https://",
                );
            }
            None if server.check_for_updates => {
                result.warning(
                    "server.update_url",
                    "check_for_updates is on but no update_url is set",
                );
            }
            _ => {}
        }
    }

    fn validate_timers(config: &Config, result: &mut ValidationResult) {
        let timers = &config.timers;
        let intervals = [
            ("timers.announcement_interval_secs", timers.announcement_interval_secs),
            ("timers.position_update_interval_ms", timers.position_update_interval_ms),
            ("timers.tick_interval_ms", timers.tick_interval_ms),
            ("timers.cache_cleanup_interval_secs", timers.cache_cleanup_interval_secs),
            ("timers.update_check_interval_secs", timers.update_check_interval_secs),
        ];

        for (path, value) in intervals {
            if value == 0 {
                result.error(path, "Interval must be greater than 0");
            }
        }

        if (1..MIN_SENSIBLE_TICK_MS).contains(&timers.tick_interval_ms) {
            result.warning(
                "timers.tick_interval_ms",
                format!(
                    "tick_interval_ms is very low (<{}ms), the critical tier may fall behind",
                    MIN_SENSIBLE_TICK_MS
                ),
            );
        }
    }

    fn validate_paths(config: &Config, result: &mut ValidationResult) {
        let paths = &config.paths;
        let files = [
            ("paths.autoload_file", &paths.autoload_file),
            ("paths.temp_ranks_file", &paths.temp_ranks_file),
            ("paths.muted_file", &paths.muted_file),
            ("paths.frozen_file", &paths.frozen_file),
        ];

        for (path, file) in files {
            if file.as_os_str().is_empty() {
                result.error(path, "Path cannot be empty");
            }
        }

        let data_dir = paths.data_dir();
        if data_dir.exists() && !data_dir.is_dir() {
            result.error(
                "paths.data_dir",
                format!("Data dir is not a directory: {:?}", data_dir),
            );
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
