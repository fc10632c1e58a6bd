use snafu::Snafu;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a run before anything is applied to the cluster.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to read data source '{}': {}", path.display(), source))]
    DataSourceUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Data source '{}' is malformed: {}", path.display(), reason))]
    DataSourceMalformed { path: PathBuf, reason: String },

    #[snafu(display("Unable to read manifest '{}': {}", path.display(), source))]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to parse manifest '{}' at line {}: {}", path.display(), line, reason))]
    ManifestParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[snafu(display("Resource '{}' is declared twice, at {} and at {}", resource, first, second))]
    DuplicateResource {
        resource: String,
        first: String,
        second: String,
    },

    #[snafu(display(
        "Resource '{}' ({}) references '{}', which is not declared in any manifest",
        resource,
        source_location,
        reference
    ))]
    UnknownReference {
        resource: String,
        source_location: String,
        reference: String,
    },

    #[snafu(display(
        "Resource '{}' ({}) references '{}', which matches more than one resource: {}",
        resource,
        source_location,
        reference,
        candidates
    ))]
    AmbiguousReference {
        resource: String,
        source_location: String,
        reference: String,
        candidates: String,
    },

    #[snafu(display("Ordering hints form a cycle between: {}", resources.join(", ")))]
    OrderingCycle { resources: Vec<String> },

    #[snafu(display(
        "Resource '{}' ({}) uses data source key '{}' which is not present in the data source",
        resource,
        source_location,
        key
    ))]
    InjectionKeyNotFound {
        resource: String,
        source_location: String,
        key: String,
    },

    #[snafu(display(
        "Resource '{}' references field '{}' of '{}', which is not present in its observed state",
        resource,
        field,
        dependency
    ))]
    ObservedFieldNotFound {
        resource: String,
        dependency: String,
        field: String,
    },

    #[snafu(display("Unable to prepare test directory '{}': {}", path.display(), source))]
    TestDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to serialize manifest for '{}': {}", resource, source))]
    SerializeManifest {
        resource: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("Unable to write prepared manifest '{}': {}", path.display(), source))]
    WriteManifest {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Cannot prepare manifests: {}", source))]
    PrepareManifests { source: Box<Error> },

    #[snafu(display("Unable to read configuration '{}': {}", path.display(), source))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to parse configuration '{}': {}", path.display(), source))]
    ConfigParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}
