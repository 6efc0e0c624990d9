//! Integration tests for logging system

use bridge_traits::time::LogLevel;
use core_runtime::logging::{redact_if_sensitive, strip_path, LogFormat, LoggingConfig};

#[test]
fn test_logging_configuration() {
    // Logging can only be initialized once per process, so only the builder is exercised.
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Debug)
        .with_pii_redaction(true)
        .with_spans(true);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Debug);
    assert!(config.redact_pii);
    assert!(config.enable_spans);
}

#[test]
fn test_device_names_are_redacted() {
    assert_eq!(redact_if_sensitive("device_name", "Anna's iPad"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("device", "anna-laptop"), "[REDACTED]");
}

#[test]
fn test_plain_values_pass_through() {
    assert_eq!(redact_if_sensitive("file_name", "Trip.kml"), "Trip.kml");
    assert_eq!(redact_if_sensitive("intents", "4"), "4");
}

#[test]
fn test_path_stripping() {
    assert_eq!(strip_path("/home/anna/bookmarks/Trip.kml"), "Trip.kml");
    assert_eq!(strip_path("/cloud/bookmarks/.Trash/Old.kml"), "Old.kml");
    assert_eq!(strip_path("C:\\Users\\Anna\\Bookmarks\\Trip.kml"), "Trip.kml");
    assert_eq!(strip_path("Trip.kml"), "Trip.kml");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_format_selection() {
    let config = LoggingConfig::default();

    #[cfg(debug_assertions)]
    assert_eq!(config.format, LogFormat::Pretty);

    #[cfg(not(debug_assertions))]
    assert_eq!(config.format, LogFormat::Json);
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_pii_redaction(false)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true)
        .with_filter("core_sync=trace,bridge_desktop=debug");

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.redact_pii);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
    assert_eq!(
        config.filter,
        Some("core_sync=trace,bridge_desktop=debug".to_string())
    );
}
