use crate::state::RuntimeVariant;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read controller config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse controller config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("timeouts.{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Controller settings, loaded from TOML. Every field has a default.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// File backing the host-wide registry lock.
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Pins the managed runtime instead of probing the application.
    #[serde(default)]
    pub runtime_variant: Option<RuntimeVariant>,
    /// Logging-support binary copied into every application's `bin/`.
    #[serde(default)]
    pub logging_support_binary: Option<PathBuf>,
    #[serde(default = "default_event_provider_type")]
    pub event_provider_type: String,
    /// Connection-string templates keyed by service label.
    #[serde(default)]
    pub autowire_templates: BTreeMap<String, String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            lock_path: default_lock_path(),
            timeouts: Timeouts::default(),
            runtime_variant: None,
            logging_support_binary: None,
            event_provider_type: default_event_provider_type(),
            autowire_templates: BTreeMap::new(),
        }
    }
}

impl ControllerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.timeouts.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    #[must_use]
    pub fn with_templates<I, K, V>(mut self, templates: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.autowire_templates
            .extend(templates.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

/// Polling intervals and wait budgets, in milliseconds.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Timeouts {
    pub poll_interval_ms: u64,
    /// Budget for a prior stop to settle before a start is attempted.
    pub start_settle_ms: u64,
    pub start_ms: u64,
    pub stop_ms: u64,
    pub delete_poll_interval_ms: u64,
    pub delete_poll_attempts: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval_ms: 25,
            start_settle_ms: 5_000,
            start_ms: 20_000,
            stop_ms: 5_000,
            delete_poll_interval_ms: 100,
            delete_poll_attempts: 300,
        }
    }
}

impl Timeouts {
    /// Millisecond budgets suitable for tests against an in-memory host.
    pub fn fast() -> Self {
        Self {
            poll_interval_ms: 1,
            start_settle_ms: 50,
            start_ms: 200,
            stop_ms: 50,
            delete_poll_interval_ms: 1,
            delete_poll_attempts: 30,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("poll_interval_ms"));
        }
        if self.delete_poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("delete_poll_interval_ms"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn start_settle(&self) -> Duration {
        Duration::from_millis(self.start_settle_ms)
    }

    pub fn start(&self) -> Duration {
        Duration::from_millis(self.start_ms)
    }

    pub fn stop(&self) -> Duration {
        Duration::from_millis(self.stop_ms)
    }

    pub fn delete_poll_interval(&self) -> Duration {
        Duration::from_millis(self.delete_poll_interval_ms)
    }

    pub fn delete_budget(&self) -> Duration {
        self.delete_poll_interval() * self.delete_poll_attempts
    }
}

fn default_lock_path() -> PathBuf {
    std::env::temp_dir().join("sitectl").join("registry.lock")
}

fn default_event_provider_type() -> String {
    "LogFileWebEventProvider".to_owned()
}
