use assert_cmd::Command;
use std::path::Path;
use tempfile::TempDir;

const MANIFEST: &str = r#"apiVersion: example.org/v1
kind: App
metadata:
  name: app
spec:
  databaseEndpoint: ${resource.db.status.endpoint}
---
apiVersion: example.org/v1
kind: Database
metadata:
  name: db
spec:
  password: ${datasource.db.password}
"#;

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

fn stderr(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(!output.status.success());
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn help() {
    let output = Command::cargo_bin("krtest")
        .unwrap()
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    assert!(help.contains("run"));
    assert!(help.contains("prepare"));
}

/// `prepare` writes the ordered manifests with data source values injected.
#[test]
fn prepare() {
    let dir = TempDir::new().unwrap();
    let manifest = write(dir.path(), "app.yaml", MANIFEST);
    let data_source = write(dir.path(), "data.yaml", "db:\n  password: s3cr3t\n");
    let out = dir.path().join("out");

    let mut cmd = Command::cargo_bin("krtest").unwrap();
    cmd.args(&[
        "prepare",
        "--manifests",
        &manifest,
        "--data-source",
        &data_source,
        "--test-directory",
        out.to_str().unwrap(),
    ]);
    cmd.assert().success();

    let db = std::fs::read_to_string(out.join("00-database-db.yaml")).unwrap();
    assert!(db.contains("s3cr3t"));
    let app = std::fs::read_to_string(out.join("01-app-app.yaml")).unwrap();
    assert!(app.contains("${resource.db.status.endpoint}"));
}

#[test]
fn prepare_with_a_missing_key() {
    let dir = TempDir::new().unwrap();
    let manifest = write(dir.path(), "app.yaml", MANIFEST);
    let out = dir.path().join("out");

    let mut cmd = Command::cargo_bin("krtest").unwrap();
    cmd.args(&[
        "prepare",
        "--manifests",
        &manifest,
        "--test-directory",
        out.to_str().unwrap(),
    ]);
    let stderr = stderr(&mut cmd);
    assert!(stderr.contains("db.password"), "{}", stderr);
    assert!(!out.join("00-database-db.yaml").exists());
}

#[test]
fn prepare_from_a_config_file() {
    let dir = TempDir::new().unwrap();
    let manifest = write(dir.path(), "app.yaml", MANIFEST);
    let data_source = write(dir.path(), "data.yaml", "db:\n  password: s3cr3t\n");
    let out = dir.path().join("out");
    let config = write(
        dir.path(),
        "run.yaml",
        &format!(
            "manifestPaths: ['{}']\ndataSourcePath: '{}'\ndirectory: '{}'\n",
            manifest,
            data_source,
            dir.path().join("ignored").display()
        ),
    );

    let mut cmd = Command::cargo_bin("krtest").unwrap();
    cmd.args(&[
        "prepare",
        "--config",
        &config,
        "--test-directory",
        out.to_str().unwrap(),
    ]);
    cmd.assert().success();
    assert!(out.join("00-database-db.yaml").is_file());
    assert!(!dir.path().join("ignored").exists());
}

#[test]
fn run_without_manifests() {
    let mut cmd = Command::cargo_bin("krtest").unwrap();
    cmd.args(&["run", "--parallelism", "2"]);
    let stderr = stderr(&mut cmd);
    assert!(stderr.contains("No manifests to test"), "{}", stderr);
}
