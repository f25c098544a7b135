// Config loading tests - testing AppConfig::load error handling
//
// Tests focused on configuration file loading and validation errors.

use paylink_bridge::config::{AppConfig, ConfigError};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("bridge.toml");
    fs::write(&path, content).expect("Failed to write config");
    path
}

#[test]
fn returns_error_when_file_not_found() {
    let result = AppConfig::load(Some(Path::new("/nonexistent/path/bridge.toml")));
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn returns_error_when_toml_is_invalid() {
    let dir = tempdir().expect("tempdir");
    let path = write_config(dir.path(), "endpoint = [not toml");

    let result = AppConfig::load(Some(&path));
    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}

#[test]
fn returns_error_when_endpoint_is_blank() {
    let dir = tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        r#"
endpoint = "   "
model = "gpt-4o-mini"
"#,
    );

    let result = AppConfig::load(Some(&path));
    assert!(matches!(result, Err(ConfigError::EmptyEndpoint)));
}

#[test]
fn returns_error_when_timeout_is_zero() {
    let dir = tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        r#"
endpoint = "http://127.0.0.1:5003/mcp"
request_timeout_secs = 0
"#,
    );

    let result = AppConfig::load(Some(&path));
    assert!(matches!(result, Err(ConfigError::InvalidTimeout { .. })));
}

#[test]
fn returns_error_when_backoff_multiplier_shrinks() {
    let dir = tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        r#"
endpoint = "http://127.0.0.1:5003/mcp"

[discovery]
backoff_multiplier = 0.5
"#,
    );

    let result = AppConfig::load(Some(&path));
    assert!(matches!(result, Err(ConfigError::InvalidRetry { .. })));
}

#[test]
fn missing_fields_fall_back_to_defaults() {
    let dir = tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        r#"endpoint = "http://payments.internal:5003/mcp""#,
    );

    let config = AppConfig::load(Some(&path)).expect("partial config loads");
    assert_eq!(config.endpoint, "http://payments.internal:5003/mcp");
    assert_eq!(config.model, "gpt-4o-mini");
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert_eq!(config.retry_policy().max_attempts, 3);
}
