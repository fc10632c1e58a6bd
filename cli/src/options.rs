use anyhow::{bail, Context, Result};
use clap::{value_parser, Parser};
use krtest_model::AutomatedTest;
use std::path::PathBuf;

/// Options shared by every command that prepares manifests.
#[derive(Debug, Parser)]
pub(crate) struct TestOptions {
    /// A YAML file describing the run. Options given on the command line override its values.
    #[clap(long = "config", value_parser = value_parser!(PathBuf))]
    config: Option<PathBuf>,

    /// Example manifests to test. Can be repeated or given as a comma separated list.
    #[clap(
        long = "manifests",
        short = 'm',
        value_delimiter = ',',
        value_parser = value_parser!(PathBuf)
    )]
    manifests: Vec<PathBuf>,

    /// A YAML file with the values for `${datasource.<key>}` placeholders.
    #[clap(long = "data-source", value_parser = value_parser!(PathBuf))]
    data_source: Option<PathBuf>,

    /// The directory prepared manifests are written to.
    #[clap(long = "test-directory", value_parser = value_parser!(PathBuf))]
    test_directory: Option<PathBuf>,

    /// Condition types that must become `True`, unless a manifest says otherwise.
    #[clap(long = "default-conditions", value_delimiter = ',')]
    default_conditions: Vec<String>,

    /// Seconds to wait for a resource to converge.
    #[clap(long = "default-timeout")]
    default_timeout: Option<u64>,

    /// Seconds to wait for a resource to disappear after it is deleted.
    #[clap(long = "deletion-timeout")]
    deletion_timeout: Option<u64>,

    /// Seconds between two reads of a resource.
    #[clap(long = "poll-interval")]
    poll_interval: Option<u64>,

    /// The number of resources tested at the same time.
    #[clap(long = "parallelism")]
    parallelism: Option<usize>,

    /// Seconds after which the whole run is stopped.
    #[clap(long = "global-timeout")]
    global_timeout: Option<u64>,

    /// Leave resources in the cluster after they are tested.
    #[clap(long = "skip-delete")]
    skip_delete: bool,
}

impl TestOptions {
    /// Builds the run configuration from `--config` (or the defaults) and the other options.
    pub(crate) fn into_config(self) -> Result<AutomatedTest> {
        let mut config = match &self.config {
            Some(path) => AutomatedTest::from_file(path)
                .context(format!("Unable to read configuration from '{}'", path.display()))?,
            None => AutomatedTest::default(),
        };
        if !self.manifests.is_empty() {
            config.manifest_paths = self.manifests;
        }
        if self.data_source.is_some() {
            config.data_source_path = self.data_source;
        }
        if let Some(directory) = self.test_directory {
            config.directory = directory;
        }
        if !self.default_conditions.is_empty() {
            config.default_conditions = self.default_conditions;
        }
        if let Some(seconds) = self.default_timeout {
            config.default_timeout_seconds = seconds;
        }
        if let Some(seconds) = self.deletion_timeout {
            config.deletion_timeout_seconds = seconds;
        }
        if let Some(seconds) = self.poll_interval {
            config.poll_interval_seconds = seconds;
        }
        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }
        if self.global_timeout.is_some() {
            config.global_timeout_seconds = self.global_timeout;
        }
        config.skip_delete |= self.skip_delete;

        if config.manifest_paths.is_empty() {
            bail!("No manifests to test, use '--manifests' or 'manifestPaths' in '--config'");
        }
        Ok(config)
    }
}
