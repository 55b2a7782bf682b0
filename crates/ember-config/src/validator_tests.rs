    use super::*;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_validate_default_config() {
        let result = ConfigValidator::validate(&Config::default());
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_validate_invalid_port() {
        let mut config = Config::default();
        config.server.port = 0;

        let result = ConfigValidator::validate(&config);
        assert!(!result.is_valid());
        assert!(result.has_error("server.port"));
    }

    #[test]
    fn test_validate_empty_names() {
        let mut config = Config::default();
        config.server.name = "  ".to_string();
        config.server.main_world = String::new();

        let result = ConfigValidator::validate(&config);
        assert!(result.has_error("server.name"));
        assert!(result.has_error("server.main_world"));
    }

    #[test]
    fn test_validate_zero_intervals() {
        let mut config = Config::default();
        config.timers.tick_interval_ms = 0;
        config.timers.update_check_interval_secs = 0;

        let result = ConfigValidator::validate(&config);
        assert_eq!(result.errors.len(), 2);
        assert!(result.has_error("timers.tick_interval_ms"));
        assert!(result.has_error("timers.update_check_interval_secs"));
        // A zero tick is an error, not also a warning.
        assert!(!result.has_warning("timers.tick_interval_ms"));
    }

    #[test]
    fn test_validate_tiny_tick_warning() {
        let mut config = Config::default();
        config.timers.tick_interval_ms = 1;

        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert!(result.has_warning("timers.tick_interval_ms"));
    }

    #[test]
    fn test_validate_listen_ip_warnings() {
        let mut config = Config::default();
        config.server.listen_ip = String::new();
        assert!(ConfigValidator::validate(&config).has_warning("server.listen_ip"));

        config.server.listen_ip = "not-an-ip".to_string();
        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert!(result.has_warning("server.listen_ip"));

        config.server.listen_ip = "::1".to_string();
        assert!(!ConfigValidator::validate(&config).has_warning("server.listen_ip"));
    }

    #[test]
    fn test_validate_update_url() {
        let mut config = Config::default();
        assert!(ConfigValidator::validate(&config).has_warning("server.update_url"));

        config.server.update_url = Some("ftp://example.org/version".to_string());
        assert!(ConfigValidator::validate(&config).has_error("server.update_url"));

        config.server.update_url = Some("https://example.org/version".to_string());
        let result = ConfigValidator::validate(&config);
        assert!(!result.has_error("server.update_url"));
        assert!(!result.has_warning("server.update_url"));
    }

    #[test]
    fn test_validate_updates_disabled_without_url() {
        let mut config = Config::default();
        config.server.check_for_updates = false;
        assert!(!ConfigValidator::validate(&config).has_warning("server.update_url"));
    }

    #[test]
    fn test_validate_empty_list_path() {
        let mut config = Config::default();
        config.paths.muted_file = PathBuf::new();

        let result = ConfigValidator::validate(&config);
        assert!(result.has_error("paths.muted_file"));
    }

    #[test]
    fn test_validate_data_dir_is_file() {
        let file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.paths.data_dir = file.path().to_path_buf();

        let result = ConfigValidator::validate(&config);
        assert!(result.has_error("paths.data_dir"));
    }

    #[test]
    fn test_error_display() {
        let err = Issue::new("server.port", "Port cannot be 0");
        assert_eq!(err.to_string(), "server.port: Port cannot be 0");
    }
