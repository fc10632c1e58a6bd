use crate::constants::{
    ANNOTATION_ASSERT, ANNOTATION_CONDITIONS, ANNOTATION_DELETION_TIMEOUT, ANNOTATION_DEPENDS_ON,
    ANNOTATION_SKIP_DELETE, ANNOTATION_TIMEOUT, ANNOTATION_UPDATE_ASSERT, ANNOTATION_UPDATE_PATCH,
    KRTEST,
};
use crate::error::{self, Result};
use crate::inject;
use crate::resource::{
    Assertion, Body, ManifestSource, ResourceDocument, ResourceIdentity, ResourceRef, TestSettings,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Reads the manifest file at `path` and parses every resource it declares.
pub fn read_manifest(path: &Path) -> Result<Vec<ResourceDocument>> {
    let contents = std::fs::read_to_string(path).context(error::ManifestReadSnafu { path })?;
    parse_manifest(path, &contents)
}

/// Parses the contents of one manifest file into its resources, in declaration order. Empty
/// documents are skipped. `path` is recorded as the source of each document.
pub fn parse_manifest(path: &Path, contents: &str) -> Result<Vec<ResourceDocument>> {
    if is_blank(contents) {
        return Ok(Vec::new());
    }
    let mut documents = Vec::new();
    for (line, text) in split_documents(contents) {
        if is_blank(&text) {
            continue;
        }
        let source = ManifestSource {
            path: path.to_path_buf(),
            line,
        };
        if let Some(document) = parse_document(source, text)? {
            documents.push(document);
        }
    }

    // The YAML parser has the final say on where documents begin and end.
    let expected = count_documents(path, contents)?;
    if expected != documents.len() {
        return error::ManifestParseSnafu {
            path,
            line: 1usize,
            reason: format!(
                "found {} resources but the file holds {} YAML documents, check the document \
                 separators",
                documents.len(),
                expected
            ),
        }
        .fail();
    }
    Ok(documents)
}

/// The number of documents in `contents` that are not empty.
fn count_documents(path: &Path, contents: &str) -> Result<usize> {
    let mut count = 0;
    for document in serde_yaml::Deserializer::from_str(contents) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| {
            error::ManifestParseSnafu {
                path,
                line: e.location().map(|location| location.line()).unwrap_or(1),
                reason: e.to_string(),
            }
            .build()
        })?;
        if !value.is_null() {
            count += 1;
        }
    }
    Ok(count)
}

/// Splits a multi-document YAML file at `---` separators and `...` document end markers. Returns
/// the 1-based line on which each document starts along with its text. Content that follows `---`
/// on the separator line belongs to the next document.
fn split_documents(contents: &str) -> Vec<(usize, String)> {
    let mut documents = Vec::new();
    let mut current = String::new();
    let mut start = 1;
    for (i, line) in contents.lines().enumerate() {
        let trimmed = line.trim_end();
        if let Some(tail) = separator_tail(trimmed) {
            documents.push((start, std::mem::take(&mut current)));
            if tail.is_empty() {
                start = i + 2;
            } else {
                start = i + 1;
                current.push_str(tail);
                current.push('\n');
            }
        } else if trimmed == "..." {
            documents.push((start, std::mem::take(&mut current)));
            start = i + 2;
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    documents.push((start, current));
    documents
}

/// For a `---` separator line, whatever follows the marker.
fn separator_tail(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("---")?;
    if rest.is_empty() {
        Some(rest)
    } else if rest.starts_with(' ') || rest.starts_with('\t') {
        Some(rest.trim_start())
    } else {
        None
    }
}

/// `true` if the document has nothing but whitespace and comments.
pub(crate) fn is_blank(text: &str) -> bool {
    text.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with('#'))
}

fn parse_error<T, S: Into<String>>(source: &ManifestSource, line: usize, reason: S) -> Result<T> {
    error::ManifestParseSnafu {
        path: &source.path,
        line,
        reason,
    }
    .fail()
}

fn parse_document(source: ManifestSource, text: String) -> Result<Option<ResourceDocument>> {
    let yaml: serde_yaml::Value = match serde_yaml::from_str(&text) {
        Ok(ok) => ok,
        Err(e) => {
            let line = e
                .location()
                .map(|location| source.line + location.line().saturating_sub(1))
                .unwrap_or(source.line);
            return parse_error(&source, line, e.to_string());
        }
    };
    if yaml.is_null() {
        return Ok(None);
    }
    let mut body = match serde_json::to_value(&yaml) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(_) => return parse_error(&source, source.line, "document is not a mapping"),
        Err(e) => return parse_error(&source, source.line, e.to_string()),
    };

    let identity = identity(&source, &body)?;
    let annotations = take_annotations(&mut body);
    let settings = settings(&source, &annotations)?;
    let depends_on = match annotations.get(ANNOTATION_DEPENDS_ON) {
        Some(value) => split_list(value)
            .map(|item| {
                item.parse::<ResourceRef>()
                    .or_else(|e| parse_error(&source, source.line, e))
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    let update_body = match annotations.get(ANNOTATION_UPDATE_PATCH) {
        Some(patch) => {
            let patch = match parse_embedded(patch) {
                Ok(patch @ Value::Object(_)) => patch,
                Ok(_) => {
                    return parse_error(
                        &source,
                        source.line,
                        format!("'{}' must be a mapping", ANNOTATION_UPDATE_PATCH),
                    )
                }
                Err(e) => {
                    return parse_error(
                        &source,
                        source.line,
                        format!("'{}': {}", ANNOTATION_UPDATE_PATCH, e),
                    )
                }
            };
            let mut update_body = body.clone();
            json_patch::merge(&mut update_body, &patch);
            Some(update_body)
        }
        None => None,
    };

    let mut placeholders = Vec::new();
    for (which, value) in [(Body::Apply, Some(&body)), (Body::Update, update_body.as_ref())] {
        if let Some(value) = value {
            let found = inject::scan(which, value).or_else(|(location, reason)| {
                parse_error(
                    &source,
                    source.line,
                    format!("invalid placeholder at '{}': {}", location, reason),
                )
            })?;
            placeholders.extend(found);
        }
    }

    Ok(Some(ResourceDocument {
        identity,
        body,
        update_body,
        placeholders,
        depends_on,
        settings,
        source,
    }))
}

fn identity(source: &ManifestSource, body: &Value) -> Result<ResourceIdentity> {
    let string_field = |pointer: &str, name: &str| -> Result<String> {
        match body.pointer(pointer) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(_) => parse_error(source, source.line, format!("'{}' must be a string", name)),
            None => parse_error(source, source.line, format!("missing '{}'", name)),
        }
    };
    let namespace = match body.pointer("/metadata/namespace") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return parse_error(source, source.line, "'metadata.namespace' must be a string"),
    };
    Ok(ResourceIdentity {
        api_version: string_field("/apiVersion", "apiVersion")?,
        kind: string_field("/kind", "kind")?,
        name: string_field("/metadata/name", "metadata.name")?,
        namespace,
    })
}

/// Removes the `krtest.dev/*` annotations from `body` and returns them. The `annotations` field is
/// removed entirely if nothing else is left in it.
fn take_annotations(body: &mut Value) -> BTreeMap<String, String> {
    let mut taken = BTreeMap::new();
    let metadata = match body.get_mut("metadata").and_then(Value::as_object_mut) {
        Some(some) => some,
        None => return taken,
    };
    let mut now_empty = false;
    if let Some(Value::Object(annotations)) = metadata.get_mut("annotations") {
        let keys: Vec<String> = annotations
            .keys()
            .filter(|key| key.starts_with(&format!("{}/", KRTEST)))
            .cloned()
            .collect();
        for key in keys {
            if let Some(value) = annotations.remove(&key) {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                taken.insert(key, value);
            }
        }
        now_empty = annotations.is_empty();
    }
    if now_empty {
        metadata.remove("annotations");
    }
    taken
}

fn settings(
    source: &ManifestSource,
    annotations: &BTreeMap<String, String>,
) -> Result<TestSettings> {
    let seconds = |key: &str| -> Result<Option<Duration>> {
        match annotations.get(key) {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(seconds) => Ok(Some(Duration::from_secs(seconds))),
                Err(_) => parse_error(
                    source,
                    source.line,
                    format!("'{}' must be a number of seconds, got '{}'", key, value),
                ),
            },
            None => Ok(None),
        }
    };
    let assertions = |key: &str| -> Result<Option<Vec<Assertion>>> {
        match annotations.get(key) {
            Some(value) => parse_assertions(value)
                .map(Some)
                .or_else(|e| parse_error(source, source.line, format!("'{}': {}", key, e))),
            None => Ok(None),
        }
    };
    let skip_delete = match annotations.get(ANNOTATION_SKIP_DELETE) {
        Some(value) => match value.trim().parse::<bool>() {
            Ok(b) => Some(b),
            Err(_) => {
                return parse_error(
                    source,
                    source.line,
                    format!("'{}' must be 'true' or 'false'", ANNOTATION_SKIP_DELETE),
                )
            }
        },
        None => None,
    };

    Ok(TestSettings {
        conditions: annotations
            .get(ANNOTATION_CONDITIONS)
            .map(|value| split_list(value).map(str::to_string).collect()),
        timeout: seconds(ANNOTATION_TIMEOUT)?,
        deletion_timeout: seconds(ANNOTATION_DELETION_TIMEOUT)?,
        skip_delete,
        assertions: assertions(ANNOTATION_ASSERT)?.unwrap_or_default(),
        update_assertions: assertions(ANNOTATION_UPDATE_ASSERT)?,
    })
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

/// Parses a YAML (or JSON) value embedded in an annotation.
fn parse_embedded(value: &str) -> std::result::Result<Value, String> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(value).map_err(|e| e.to_string())?;
    serde_json::to_value(&yaml).map_err(|e| e.to_string())
}

/// Parses a mapping of field paths to expected values.
fn parse_assertions(value: &str) -> std::result::Result<Vec<Assertion>, String> {
    let map: Map<String, Value> = match parse_embedded(value)? {
        Value::Object(map) => map,
        _ => return Err("expected a mapping of field paths to values".to_string()),
    };
    map.into_iter()
        .map(|(path, expected)| {
            Ok(Assertion {
                path: path.parse().map_err(|e| format!("{}", e))?,
                expected,
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use crate::inject::InjectionExpression;
    use serde_json::json;
    use std::path::PathBuf;

    const MANIFEST: &str = r#"# leading comment
apiVersion: example.org/v1alpha1
kind: Database
metadata:
  name: db
  annotations:
    krtest.dev/timeout: "300"
    krtest.dev/conditions: Ready
    krtest.dev/assert: |
      status.atProvider.engine: postgres
      status.atProvider.port: 5432
    team: storage
spec:
  forProvider:
    password: ${datasource.password}
---
apiVersion: example.org/v1alpha1
kind: App
metadata:
  name: app
  namespace: default
  annotations:
    krtest.dev/depends-on: db, Cache/cache
    krtest.dev/skip-delete: "true"
    krtest.dev/update-patch: '{"spec": {"replicas": 2}}'
spec:
  replicas: 1
  endpoint: ${resource.db.status.endpoint}
---
# an empty document
"#;

    fn parse(contents: &str) -> Result<Vec<ResourceDocument>> {
        parse_manifest(&PathBuf::from("examples/app.yaml"), contents)
    }

    #[test]
    fn parses_documents_in_order() {
        let docs = parse(MANIFEST).unwrap();
        assert_eq!(docs.len(), 2);

        let db = &docs[0];
        assert_eq!(db.identity.kind, "Database");
        assert_eq!(db.identity.namespace, None);
        assert_eq!(db.source.line, 1);
        assert_eq!(db.settings.timeout, Some(Duration::from_secs(300)));
        assert_eq!(db.settings.conditions, Some(vec!["Ready".to_string()]));
        assert_eq!(db.settings.assertions.len(), 2);
        assert_eq!(db.settings.assertions[1].expected, json!(5432));
        // Only the harness annotations are removed.
        assert_eq!(
            db.body["metadata"]["annotations"],
            json!({"team": "storage"})
        );
        assert_eq!(
            db.placeholders[0].expression,
            InjectionExpression::DataSource {
                key: "password".into()
            }
        );

        let app = &docs[1];
        assert_eq!(app.source.line, 17);
        assert_eq!(app.identity.namespace.as_deref(), Some("default"));
        assert_eq!(app.depends_on.len(), 2);
        assert_eq!(app.depends_on[1].kind.as_deref(), Some("Cache"));
        assert_eq!(app.settings.skip_delete, Some(true));
        assert!(app.body["metadata"].get("annotations").is_none());
        assert_eq!(
            app.update_body.as_ref().unwrap()["spec"]["replicas"],
            json!(2)
        );
        // The placeholder is found in both the apply and the update body.
        assert_eq!(app.placeholders.len(), 2);
    }

    #[test]
    fn yaml_errors_report_the_file_line() {
        let contents = concat!(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n",
            "---\napiVersion: v1\nkind: [oops\n",
        );
        match parse(contents) {
            // The error is in the second document, which starts on line 6.
            Err(Error::ManifestParse { line, .. }) => assert!(line >= 6, "line {}", line),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn structural_errors() {
        let cases = [
            "- just\n- a list\n",
            "kind: ConfigMap\nmetadata:\n  name: a\n",
            "apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n",
            concat!(
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n",
                "  annotations:\n    krtest.dev/timeout: soon\n",
            ),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\ndata:\n  key: ${datasource.}\n",
            concat!(
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n",
                "  annotations:\n    krtest.dev/update-patch: '[1]'\n",
            ),
        ];
        for contents in cases {
            assert!(
                matches!(parse(contents), Err(Error::ManifestParse { .. })),
                "expected a parse error for:\n{}",
                contents
            );
        }
    }

    #[test]
    fn inline_documents_and_end_markers() {
        let contents = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n\
            --- {apiVersion: v1, kind: ConfigMap, metadata: {name: b}}\n\
            ...\n\
            --- # c follows\n\
            apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: c\n";
        let docs = parse(contents).unwrap();
        let names: Vec<(&str, usize)> = docs
            .iter()
            .map(|doc| (doc.identity.name.as_str(), doc.source.line))
            .collect();
        assert_eq!(names, vec![("a", 1), ("b", 5), ("c", 7)]);
    }

    #[test]
    fn empty_file() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("---\n---\n").unwrap().is_empty());
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            read_manifest(&PathBuf::from("/nonexistent/krtest/manifest.yaml")),
            Err(Error::ManifestRead { .. })
        ));
    }
}
