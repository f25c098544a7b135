use crate::transport::RetryPolicy;
use dotenvy::from_filename;
use serde::Deserialize;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5003/mcp";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONFIG_PATH: &str = "config/bridge.toml";

pub const ENV_ENDPOINT: &str = "PAYLINK_ENDPOINT";
pub const ENV_MODEL: &str = "PAYLINK_MODEL";
pub const ENV_TIMEOUT: &str = "PAYLINK_TIMEOUT_SECS";

static ENV_LOADER: Once = Once::new();

/// Ensures environment variables are loaded from config/.env
pub fn ensure_env_loaded() {
    ENV_LOADER.call_once(|| {
        let _ = from_filename("config/.env");
    });
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub endpoint: String,
    pub model: String,
    pub request_timeout: Duration,
    pub discovery: DiscoverySettings,
}

/// Retry schedule applied to catalog fetches and opt-in invocation retries.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySettings {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff_ms,
            backoff_multiplier: policy.backoff_multiplier,
            max_backoff_ms: policy.max_backoff_ms,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("tool service endpoint must not be empty")]
    EmptyEndpoint,
    #[error("invalid request timeout '{value}': expected a positive number of seconds")]
    InvalidTimeout { value: String },
    #[error("invalid discovery retry settings: {reason}")]
    InvalidRetry { reason: String },
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    endpoint: Option<String>,
    model: Option<String>,
    request_timeout_secs: Option<u64>,
    discovery: Option<RawDiscovery>,
}

#[derive(Debug, Deserialize, Default)]
struct RawDiscovery {
    attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    max_backoff_ms: Option<u64>,
}

impl AppConfig {
    /// Load configuration with file values overridden by environment
    /// variables. An explicit path must exist; the default path falls back to
    /// built-in defaults when absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        ensure_env_loaded();
        let raw = if let Some(path) = path {
            read_raw(path)?
        } else {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            match read_raw(default_path) {
                Ok(raw) => raw,
                Err(ConfigError::Io { source, .. })
                    if source.kind() == io::ErrorKind::NotFound =>
                {
                    info!("Configuration file not found; using defaults");
                    RawConfig::default()
                }
                Err(other) => return Err(other),
            }
        };
        build(raw)
    }

    pub fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            discovery: DiscoverySettings::default(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.discovery.attempts,
            initial_backoff_ms: self.discovery.initial_backoff_ms,
            backoff_multiplier: self.discovery.backoff_multiplier,
            max_backoff_ms: self.discovery.max_backoff_ms,
        }
    }
}

fn read_raw(path: &Path) -> Result<RawConfig, ConfigError> {
    debug!(path = %path.display(), "Reading bridge configuration file");
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn build(raw: RawConfig) -> Result<AppConfig, ConfigError> {
    let endpoint = env::var(ENV_ENDPOINT)
        .ok()
        .or(raw.endpoint)
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
    if endpoint.trim().is_empty() {
        return Err(ConfigError::EmptyEndpoint);
    }

    let model = env::var(ENV_MODEL)
        .ok()
        .or(raw.model)
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let timeout_secs = match env::var(ENV_TIMEOUT) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidTimeout { value })?,
        Err(_) => raw.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
    };
    if timeout_secs == 0 {
        return Err(ConfigError::InvalidTimeout {
            value: "0".to_string(),
        });
    }

    let defaults = DiscoverySettings::default();
    let raw_discovery = raw.discovery.unwrap_or_default();
    let discovery = DiscoverySettings {
        attempts: raw_discovery.attempts.unwrap_or(defaults.attempts),
        initial_backoff_ms: raw_discovery
            .initial_backoff_ms
            .unwrap_or(defaults.initial_backoff_ms),
        backoff_multiplier: raw_discovery
            .backoff_multiplier
            .unwrap_or(defaults.backoff_multiplier),
        max_backoff_ms: raw_discovery
            .max_backoff_ms
            .unwrap_or(defaults.max_backoff_ms),
    };
    if discovery.attempts == 0 {
        return Err(ConfigError::InvalidRetry {
            reason: "attempts must be at least 1".to_string(),
        });
    }
    if discovery.backoff_multiplier < 1.0 {
        return Err(ConfigError::InvalidRetry {
            reason: "backoff_multiplier must be 1.0 or greater".to_string(),
        });
    }

    Ok(AppConfig {
        endpoint,
        model,
        request_timeout: Duration::from_secs(timeout_secs),
        discovery,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;

    // Serializes tests that touch the working directory or the process
    // environment.
    static WORKDIR_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn returns_default_when_missing() {
        let _lock = WORKDIR_GUARD.lock().expect("lock guard");
        let original_dir = env::current_dir().expect("current dir");
        let temp = tempfile::tempdir().expect("tempdir");
        env::set_current_dir(temp.path()).expect("switch to temp dir");

        let config = AppConfig::load(None).expect("load succeeds");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.discovery, DiscoverySettings::default());

        env::set_current_dir(original_dir).expect("restore current dir");
    }

    #[test]
    fn reads_endpoint_model_and_timeout() {
        let _lock = WORKDIR_GUARD.lock().expect("lock guard");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.toml");
        let mut file = File::create(&path).expect("create config");
        writeln!(
            file,
            r#"
endpoint = "http://payments.internal:5003/mcp"
model = "gpt-4o-mini"
request_timeout_secs = 10
"#
        )
        .expect("write");

        let config = AppConfig::load(Some(&path)).expect("load config");
        assert_eq!(config.endpoint, "http://payments.internal:5003/mcp");
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn discovery_section_feeds_the_retry_policy() {
        let _lock = WORKDIR_GUARD.lock().expect("lock guard");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.toml");
        fs::write(
            &path,
            r#"
[discovery]
attempts = 5
initial_backoff_ms = 50
max_backoff_ms = 400
"#,
        )
        .expect("write discovery config");

        let config = AppConfig::load(Some(&path)).expect("load");
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff_ms, 50);
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert_eq!(policy.max_backoff_ms, 400);
    }

    #[test]
    fn rejects_zero_timeout() {
        let _lock = WORKDIR_GUARD.lock().expect("lock guard");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.toml");
        fs::write(&path, "request_timeout_secs = 0").expect("write");

        let error = AppConfig::load(Some(&path)).expect_err("zero timeout must fail");
        assert!(matches!(error, ConfigError::InvalidTimeout { .. }));
    }

    #[test]
    fn rejects_zero_retry_attempts() {
        let _lock = WORKDIR_GUARD.lock().expect("lock guard");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.toml");
        fs::write(&path, "[discovery]\nattempts = 0").expect("write");

        let error = AppConfig::load(Some(&path)).expect_err("zero attempts must fail");
        assert!(matches!(error, ConfigError::InvalidRetry { .. }));
    }

    #[test]
    fn environment_overrides_file_values() {
        let _lock = WORKDIR_GUARD.lock().expect("lock guard");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.toml");
        fs::write(&path, "model = \"gpt-4o-mini\"").expect("write");

        unsafe { env::set_var(ENV_MODEL, "o4-mini") };
        let config = AppConfig::load(Some(&path));
        unsafe { env::remove_var(ENV_MODEL) };

        let config = config.expect("load");
        assert_eq!(config.model, "o4-mini");
    }

    #[test]
    fn invalid_environment_timeout_is_rejected() {
        let _lock = WORKDIR_GUARD.lock().expect("lock guard");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.toml");
        fs::write(&path, "model = \"gpt-4o-mini\"").expect("write");

        unsafe { env::set_var(ENV_TIMEOUT, "soon") };
        let result = AppConfig::load(Some(&path));
        unsafe { env::remove_var(ENV_TIMEOUT) };

        assert!(matches!(result, Err(ConfigError::InvalidTimeout { .. })));
    }
}
