/*!

This library prepares example manifests for declarative resources and tests them against a
reconciling control plane. Manifests are parsed, values from a data source are injected, and the
resources are ordered by their dependencies. Each resource is then applied, observed until its
conditions converge, checked against its assertions, optionally updated, and deleted.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use clients::{ClusterClient, Error as ClientError, ErrorKind as ClientErrorKind};
pub use config::{AutomatedTest, RetryPolicy};
pub use data_source::DataSource;
pub use error::{Error, Result};
pub use field_path::{FieldPath, FieldPathError, Segment};
pub use graph::DependencyGraph;
pub use inject::{InjectionExpression, Injector, ObservedResources, Placeholder};
pub use manifest::{parse_manifest, read_manifest};
pub use prepare::{PreparedManifests, Preparer};
pub use report::{Failure, OutcomeStatus, Phase, TestOutcome, TestReport};
pub use resource::{
    Assertion, Body, ManifestSource, ResourceDocument, ResourceIdentity, ResourceRef, TestSettings,
};
pub use runner::run_test;
pub use tester::{TestCase, Tester};

pub mod clients;
mod config;
pub mod constants;
mod data_source;
mod error;
mod field_path;
mod graph;
mod inject;
mod manifest;
mod prepare;
mod report;
mod resource;
mod runner;
pub mod tester;
