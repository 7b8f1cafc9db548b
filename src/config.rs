use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::state::EvictionPolicy;
use crate::{Error, RuntimeResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub automod: AutomodConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Cap for `flow_while` loops that do not set their own.
    #[serde(default = "default_max_while_iterations")]
    pub max_while_iterations: u64,

    /// Hard cap for `repeat` counts.
    #[serde(default = "default_max_repeat")]
    pub max_repeat: u64,

    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,

    #[serde(default = "default_pipe_timeout", with = "duration_ms")]
    pub pipe_timeout: Duration,

    /// Longest delay a `wait` action may request.
    #[serde(default = "default_max_wait", with = "duration_ms")]
    pub max_wait: Duration,

    #[serde(default = "default_parse_cache_capacity")]
    pub parse_cache_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_while_iterations: default_max_while_iterations(),
            max_repeat: default_max_repeat(),
            max_call_depth: default_max_call_depth(),
            pipe_timeout: default_pipe_timeout(),
            max_wait: default_max_wait(),
            parse_cache_capacity: default_parse_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default)]
    pub eviction: EvictionPolicy,

    #[serde(default = "default_lock_timeout", with = "duration_ms")]
    pub lock_timeout: Duration,

    /// Reject access to variables the specification does not declare.
    #[serde(default)]
    pub strict_variables: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            eviction: EvictionPolicy::default(),
            lock_timeout: default_lock_timeout(),
            strict_variables: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomodConfig {
    /// Skip event handlers for a message that matched a rule.
    #[serde(default = "default_true")]
    pub stop_on_match: bool,

    /// Messages remembered per user and channel for rate triggers.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for AutomodConfig {
    fn default() -> Self {
        Self {
            stop_on_match: default_true(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: false,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            executor: ExecutorConfig::default(),
            state: StateConfig::default(),
            automod: AutomodConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> RuntimeResult<Self> {
        from_file(path)
    }

    pub fn from_str(s: &str) -> RuntimeResult<Self> {
        from_str(s)
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> RuntimeResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> RuntimeResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_event_buffer_size() -> usize {
    1024
}
fn default_max_while_iterations() -> u64 {
    100
}
fn default_max_repeat() -> u64 {
    1000
}
fn default_max_call_depth() -> usize {
    32
}
fn default_pipe_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_max_wait() -> Duration {
    Duration::from_secs(60)
}
fn default_parse_cache_capacity() -> usize {
    1024
}
fn default_cache_capacity() -> usize {
    10_000
}
fn default_lock_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_true() -> bool {
    true
}
fn default_history_limit() -> usize {
    50
}
fn default_log_level() -> String {
    "info".to_string()
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.executor.max_while_iterations, 100);
        assert_eq!(config.executor.max_call_depth, 32);
        assert_eq!(config.executor.pipe_timeout, Duration::from_secs(30));
        assert_eq!(config.state.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.state.eviction, EvictionPolicy::Lru);
        assert!(config.automod.stop_on_match);
    }

    #[test]
    fn test_partial_json() {
        let config = RuntimeConfig::from_str(
            r#"{"executor": {"max_call_depth": 4}, "state": {"eviction": "insertion", "lock_timeout": 250}}"#,
        )
        .unwrap();
        assert_eq!(config.executor.max_call_depth, 4);
        assert_eq!(config.executor.max_while_iterations, 100);
        assert_eq!(config.state.eviction, EvictionPolicy::Insertion);
        assert_eq!(config.state.lock_timeout, Duration::from_millis(250));
        assert!(RuntimeConfig::from_str("{not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"logging": {{"level": "debug"}}}}"#).unwrap();
        let config = RuntimeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(RuntimeConfig::from_file("/nonexistent/flowbot.json").is_err());
    }
}
