use crate::options::TestOptions;
use anyhow::{Context, Result};
use clap::Parser;
use krtest_model::Preparer;

/// Prepare the manifests and write them to the test directory without touching a cluster.
#[derive(Debug, Parser)]
pub(crate) struct Prepare {
    #[clap(flatten)]
    options: TestOptions,
}

impl Prepare {
    pub(crate) fn run(self) -> Result<()> {
        let config = self.options.into_config()?;
        let preparer = Preparer::from_config(&config);
        let prepared = preparer
            .prepare_manifests()
            .context("Unable to prepare manifests")?;
        println!(
            "Prepared {} resources in '{}':",
            prepared.documents.len(),
            preparer.test_directory().display()
        );
        for (position, document) in prepared.documents.iter().enumerate() {
            let deferred = document.placeholders.len();
            if deferred == 0 {
                println!("{:>4}  {}", position, document.identity);
            } else {
                println!(
                    "{:>4}  {} ({} placeholders resolved at test time)",
                    position, document.identity, deferred
                );
            }
        }
        Ok(())
    }
}
