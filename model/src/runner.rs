use crate::clients::ClusterClient;
use crate::config::AutomatedTest;
use crate::error::{self, Result};
use crate::prepare::Preparer;
use crate::report::TestReport;
use crate::tester::Tester;
use log::info;
use snafu::ResultExt;
use std::sync::Arc;

/// Prepares the manifests named by `config` and tests them against `client`. An error means
/// nothing was applied; test failures are reported in the returned `TestReport`.
pub async fn run_test(
    config: &AutomatedTest,
    client: Arc<dyn ClusterClient>,
) -> Result<TestReport> {
    let prepared = Preparer::from_config(config)
        .prepare_manifests()
        .map_err(Box::new)
        .context(error::PrepareManifestsSnafu)?;
    info!(
        "testing {} resources with parallelism {}",
        prepared.documents.len(),
        config.parallelism()
    );
    let report = Tester::new(client, config.clone())
        .execute_tests(prepared)
        .await;
    info!(
        "{} of {} resources passed",
        report.outcomes().iter().filter(|o| o.passed()).count(),
        report.outcomes().len()
    );
    Ok(report)
}
