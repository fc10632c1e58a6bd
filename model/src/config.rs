use crate::constants::{
    CONDITION_READY, CONDITION_SYNCED, DEFAULT_DELETION_TIMEOUT_SECONDS, DEFAULT_PARALLELISM,
    DEFAULT_POLL_INTERVAL_SECONDS, DEFAULT_TEST_DIRECTORY, DEFAULT_TIMEOUT_SECONDS,
};
use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The configuration of one automated test run. It is produced by the command line layer (or
/// read from a YAML file) and passed explicitly to the `Preparer` and the `Tester`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutomatedTest {
    /// Example manifests to test, in the order they should be considered.
    pub manifest_paths: Vec<PathBuf>,
    /// YAML mapping of values injected through `${datasource.<key>}` placeholders.
    pub data_source_path: Option<PathBuf>,
    /// Where prepared manifests are written.
    pub directory: PathBuf,
    /// Condition types that must become `True` unless a manifest overrides them.
    pub default_conditions: Vec<String>,
    pub default_timeout_seconds: u64,
    pub deletion_timeout_seconds: u64,
    pub poll_interval_seconds: u64,
    /// Maximum number of resources driven at the same time.
    pub parallelism: usize,
    /// Deadline for the whole run. `None` means no deadline beyond the per-resource timeouts.
    pub global_timeout_seconds: Option<u64>,
    /// Skip the deletion step for every resource.
    pub skip_delete: bool,
    /// Condition reasons that mean the control plane has given up on a resource.
    pub terminal_reasons: Vec<String>,
    pub delete_retry: RetryPolicy,
}

impl Default for AutomatedTest {
    fn default() -> Self {
        Self {
            manifest_paths: Vec::new(),
            data_source_path: None,
            directory: PathBuf::from(DEFAULT_TEST_DIRECTORY),
            default_conditions: vec![CONDITION_READY.to_string(), CONDITION_SYNCED.to_string()],
            default_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            deletion_timeout_seconds: DEFAULT_DELETION_TIMEOUT_SECONDS,
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            parallelism: DEFAULT_PARALLELISM,
            global_timeout_seconds: None,
            skip_delete: false,
            terminal_reasons: vec!["Failed".to_string(), "ReconcileFailed".to_string()],
            delete_retry: RetryPolicy::default(),
        }
    }
}

impl AutomatedTest {
    /// Reads an `AutomatedTest` from a YAML file. Fields that are not present take their
    /// default values.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).context(error::ConfigReadSnafu { path })?;
        serde_yaml::from_str(&contents).context(error::ConfigParseSnafu { path })
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    pub fn deletion_timeout(&self) -> Duration {
        Duration::from_secs(self.deletion_timeout_seconds)
    }

    /// The poll interval, never shorter than one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn global_timeout(&self) -> Option<Duration> {
        self.global_timeout_seconds.map(Duration::from_secs)
    }

    /// The parallelism limit, never lower than one.
    pub fn parallelism(&self) -> usize {
        self.parallelism.max(1)
    }
}

/// Bounded exponential backoff for transient API errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 16000,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// The delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(retry);
        Duration::from_millis(
            self.initial_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }
}
