use crate::config::AutomatedTest;
use crate::constants::DEFAULT_TEST_DIRECTORY;
use crate::data_source::DataSource;
use crate::error::{self, Result};
use crate::graph::DependencyGraph;
use crate::inject::{Injector, ObservedResources};
use crate::manifest::read_manifest;
use crate::resource::ResourceDocument;
use log::{debug, info};
use regex::Regex;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const PREPARED_FILE_NAME_REGEX: &str = r"^\d{2,}-.+\.yaml$";

lazy_static::lazy_static! {
    static ref PREPARED_FILE_NAME: Regex = {
        #[allow(clippy::unwrap_used)]
        Regex::new(PREPARED_FILE_NAME_REGEX).unwrap()
    };
}

/// Documents that are ready for the lifecycle tester: data source values are injected, and the
/// documents are sorted so that each one comes after everything it depends on.
#[derive(Debug, Clone)]
pub struct PreparedManifests {
    pub documents: Vec<ResourceDocument>,
    /// Built over `documents` in their sorted order, so graph indices are positions in
    /// `documents`.
    pub graph: DependencyGraph,
    /// Kept so that placeholders deferred to test time can be injected with the same values.
    pub data_source: DataSource,
}

/// Turns example manifests into prepared documents and writes them to a test directory.
#[derive(Debug, Clone)]
pub struct Preparer {
    manifest_paths: Vec<PathBuf>,
    data_source_path: Option<PathBuf>,
    directory: PathBuf,
}

impl Preparer {
    pub fn new<I, P>(manifest_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            manifest_paths: manifest_paths.into_iter().map(Into::into).collect(),
            data_source_path: None,
            directory: PathBuf::from(DEFAULT_TEST_DIRECTORY),
        }
    }

    pub fn from_config(config: &AutomatedTest) -> Self {
        Self::new(config.manifest_paths.iter().cloned())
            .with_data_source(config.data_source_path.clone())
            .with_test_directory(&config.directory)
    }

    pub fn with_data_source<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.data_source_path = path.map(Into::into);
        self
    }

    pub fn with_test_directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn test_directory(&self) -> &Path {
        &self.directory
    }

    /// Loads the data source, parses and orders the manifests, injects data source values and
    /// writes the result to the test directory. Any error aborts the run before anything is
    /// applied.
    pub fn prepare_manifests(&self) -> Result<PreparedManifests> {
        let data_source = match &self.data_source_path {
            Some(path) => DataSource::load(path)?,
            None => DataSource::empty(),
        };

        let mut documents = Vec::new();
        for path in &self.manifest_paths {
            let parsed = read_manifest(path)?;
            debug!("parsed {} resources from '{}'", parsed.len(), path.display());
            documents.extend(parsed);
        }
        check_duplicates(&documents)?;

        let graph = DependencyGraph::build(&documents)?;
        let order = graph.ordered(&documents)?;
        let mut slots: Vec<Option<ResourceDocument>> = documents.into_iter().map(Some).collect();
        let mut documents: Vec<ResourceDocument> = order
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect();
        let graph = DependencyGraph::build(&documents)?;

        // Resource references are resolved by the tester once their targets have converged.
        let injector = Injector::new(&data_source);
        let nothing_observed = ObservedResources::new();
        for document in &mut documents {
            injector.inject(document, &nothing_observed)?;
        }

        self.write(&documents)?;
        info!(
            "prepared {} resources in '{}'",
            documents.len(),
            self.directory.display()
        );
        Ok(PreparedManifests {
            documents,
            graph,
            data_source,
        })
    }

    fn write(&self, documents: &[ResourceDocument]) -> Result<()> {
        let directory = &self.directory;
        std::fs::create_dir_all(directory).context(error::TestDirectorySnafu { path: directory })?;

        // The test directory may also hold the inputs, which are never removed.
        let inputs: Vec<PathBuf> = self
            .manifest_paths
            .iter()
            .chain(self.data_source_path.iter())
            .map(|path| canonical(path))
            .collect();
        let entries =
            std::fs::read_dir(directory).context(error::TestDirectorySnafu { path: directory })?;
        for entry in entries {
            let path = entry
                .context(error::TestDirectorySnafu { path: directory })?
                .path();
            if is_prepared_file(&path) && !inputs.contains(&canonical(&path)) {
                debug!("removing stale prepared manifest '{}'", path.display());
                std::fs::remove_file(&path).context(error::TestDirectorySnafu { path: &path })?;
            }
        }

        for (position, document) in documents.iter().enumerate() {
            let stem = format!("{:02}-{}", position, document.identity.file_stem());
            write_body(
                &directory.join(format!("{}.yaml", stem)),
                document,
                &document.body,
            )?;
            if let Some(update_body) = &document.update_body {
                write_body(
                    &directory.join(format!("{}.update.yaml", stem)),
                    document,
                    update_body,
                )?;
            }
        }
        Ok(())
    }
}

/// `true` for files named like the ones `Preparer::write` creates, e.g. `03-bucket-b.yaml`.
fn is_prepared_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| PREPARED_FILE_NAME.is_match(name))
            .unwrap_or(false)
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn write_body(path: &Path, document: &ResourceDocument, body: &serde_json::Value) -> Result<()> {
    let yaml = serde_yaml::to_string(body).context(error::SerializeManifestSnafu {
        resource: document.identity.to_string(),
    })?;
    std::fs::write(path, yaml).context(error::WriteManifestSnafu { path })
}

fn check_duplicates(documents: &[ResourceDocument]) -> Result<()> {
    let mut seen = BTreeMap::new();
    for document in documents {
        if let Some(first) = seen.insert(&document.identity, &document.source) {
            return error::DuplicateResourceSnafu {
                resource: document.identity.to_string(),
                first: first.to_string(),
                second: document.source.to_string(),
            }
            .fail();
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use crate::inject::InjectionExpression;
    use tempfile::TempDir;

    const DB: &str = r#"apiVersion: example.org/v1
kind: Database
metadata:
  name: db
spec:
  password: ${datasource.password}
"#;

    const APP: &str = r#"apiVersion: example.org/v1
kind: App
metadata:
  name: app
  namespace: default
spec:
  endpoint: ${resource.db.status.endpoint}
  user: ${datasource.user}
"#;

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join("data.yaml"), "password: s3cr3t\nuser: admin\n")
                .unwrap();
            Self { dir }
        }

        fn manifest(&self, name: &str, contents: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            path
        }

        fn preparer(&self, manifests: Vec<PathBuf>) -> Preparer {
            Preparer::new(manifests)
                .with_data_source(Some(self.dir.path().join("data.yaml")))
                .with_test_directory(self.dir.path().join("out"))
        }

        fn written(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.dir.path().join("out"))
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    #[test]
    fn prepares_and_orders() {
        let fixture = Fixture::new();
        // The app is declared first but depends on the database.
        let app = fixture.manifest("app.yaml", APP);
        let db = fixture.manifest("db.yaml", DB);
        let prepared = fixture.preparer(vec![app, db]).prepare_manifests().unwrap();

        assert_eq!(prepared.documents[0].identity.name, "db");
        assert_eq!(prepared.documents[1].identity.name, "app");
        assert_eq!(prepared.graph.dependencies_of(1).collect::<Vec<_>>(), vec![0]);
        assert!(prepared.documents[0].is_resolved());
        assert_eq!(prepared.documents[1].body["spec"]["user"], "admin");
        assert!(matches!(
            prepared.documents[1].placeholders[0].expression,
            InjectionExpression::Resource { .. }
        ));

        assert_eq!(
            fixture.written(),
            vec!["00-database-db.yaml", "01-app-default-app.yaml"]
        );
        let db_yaml =
            std::fs::read_to_string(fixture.dir.path().join("out/00-database-db.yaml")).unwrap();
        assert!(db_yaml.contains("s3cr3t"));
        assert!(!db_yaml.contains("${"));
    }

    #[test]
    fn idempotent() {
        let fixture = Fixture::new();
        let db = fixture.manifest("db.yaml", DB);
        let preparer = fixture.preparer(vec![db]);
        let path = fixture.dir.path().join("out/00-database-db.yaml");

        preparer.prepare_manifests().unwrap();
        let first = std::fs::read(&path).unwrap();
        preparer.prepare_manifests().unwrap();
        assert_eq!(first, std::fs::read(&path).unwrap());
    }

    #[test]
    fn stale_files_are_removed() {
        let fixture = Fixture::new();
        let out = fixture.dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("07-old-resource.yaml"), "stale").unwrap();
        std::fs::write(out.join("notes.txt"), "kept").unwrap();
        let db = fixture.manifest("db.yaml", DB);
        fixture.preparer(vec![db]).prepare_manifests().unwrap();
        assert_eq!(fixture.written(), vec!["00-database-db.yaml", "notes.txt"]);
    }

    #[test]
    fn inputs_in_the_test_directory_are_kept() {
        let fixture = Fixture::new();
        let db = fixture.manifest("db.yaml", DB);
        let config = fixture.manifest(
            "01-config.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n",
        );
        let unrelated = fixture.manifest("other-example.yaml", APP);
        let preparer = Preparer::new(vec![db.clone(), config.clone()])
            .with_data_source(Some(fixture.dir.path().join("data.yaml")))
            .with_test_directory(fixture.dir.path());
        preparer.prepare_manifests().unwrap();
        // Running again must not remove the inputs either.
        preparer.prepare_manifests().unwrap();

        assert_eq!(std::fs::read_to_string(&db).unwrap(), DB);
        assert!(config.is_file());
        assert_eq!(std::fs::read_to_string(&unrelated).unwrap(), APP);
        assert!(fixture.dir.path().join("data.yaml").is_file());
        assert!(fixture.dir.path().join("00-database-db.yaml").is_file());
        assert!(fixture.dir.path().join("01-configmap-cfg.yaml").is_file());
    }

    #[test]
    fn missing_key_writes_nothing() {
        let fixture = Fixture::new();
        let token = fixture.manifest(
            "token.yaml",
            concat!(
                "apiVersion: v1\nkind: Secret\nmetadata:\n  name: token\n",
                "stringData:\n  token: ${datasource.token}\n",
            ),
        );
        let err = fixture
            .preparer(vec![token])
            .prepare_manifests()
            .unwrap_err();
        assert!(matches!(err, Error::InjectionKeyNotFound { .. }));
        assert!(!fixture.dir.path().join("out").exists());
    }

    #[test]
    fn duplicates_are_rejected() {
        let fixture = Fixture::new();
        let first = fixture.manifest("first.yaml", DB);
        let second = fixture.manifest("second.yaml", DB);
        assert!(matches!(
            fixture.preparer(vec![first, second]).prepare_manifests(),
            Err(Error::DuplicateResource { .. })
        ));
    }

    #[test]
    fn missing_data_source() {
        let fixture = Fixture::new();
        let db = fixture.manifest("db.yaml", DB);
        let preparer = Preparer::new(vec![db])
            .with_data_source(Some(fixture.dir.path().join("nope.yaml")))
            .with_test_directory(fixture.dir.path().join("out"));
        assert!(matches!(
            preparer.prepare_manifests(),
            Err(Error::DataSourceUnavailable { .. })
        ));
    }
}
