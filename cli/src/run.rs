use crate::options::TestOptions;
use anyhow::{bail, Context, Result};
use clap::Parser;
use krtest_model::clients::KubeClusterClient;
use krtest_model::{run_test, ClusterClient};
use std::path::PathBuf;
use std::sync::Arc;

/// Prepare the manifests and test every resource against the cluster.
#[derive(Debug, Parser)]
pub(crate) struct Run {
    #[clap(flatten)]
    options: TestOptions,

    /// Output the results in JSON format.
    #[clap(long = "json")]
    json: bool,
}

impl Run {
    pub(crate) async fn run(self, kubeconfig: Option<PathBuf>) -> Result<()> {
        let config = self.options.into_config()?;
        let client: Arc<dyn ClusterClient> = match kubeconfig {
            Some(path) => Arc::new(
                KubeClusterClient::new_from_kubeconfig_path(&path)
                    .await
                    .context(format!(
                        "Unable to create Kubernetes client from path '{:?}'",
                        path
                    ))?,
            ),
            None => Arc::new(
                KubeClusterClient::new()
                    .await
                    .context("Unable to create default Kubernetes client")?,
            ),
        };

        let report = run_test(&config, client)
            .await
            .context("Unable to run tests")?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report)
                    .context("Could not create string from report.")?
            );
        } else {
            println!("{}", report);
        }

        if !report.success() {
            let failed = report.outcomes().iter().filter(|o| !o.passed()).count();
            bail!(
                "{} of {} resources did not pass",
                failed,
                report.outcomes().len()
            );
        }
        Ok(())
    }
}
