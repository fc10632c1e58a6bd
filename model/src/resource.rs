use crate::field_path::FieldPath;
use crate::inject::Placeholder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// The identity of a resource in the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentity {
    /// `group/version`, or just `version` for the core group.
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceIdentity {
    /// The API group, empty for the core group.
    pub fn group(&self) -> &str {
        self.api_version
            .rsplit_once('/')
            .map(|(group, _)| group)
            .unwrap_or_default()
    }

    pub fn version(&self) -> &str {
        self.api_version
            .rsplit_once('/')
            .map(|(_, version)| version)
            .unwrap_or(&self.api_version)
    }

    /// A filesystem-safe name derived from the identity, e.g. `bucket-default-my-bucket`.
    pub fn file_stem(&self) -> String {
        let mut parts = vec![self.kind.as_str()];
        if let Some(namespace) = &self.namespace {
            parts.push(namespace);
        }
        parts.push(&self.name);
        parts
            .join("-")
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl Display for ResourceIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", self.kind, namespace, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// A reference from one manifest to another resource, written `name` or `Kind/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub kind: Option<String>,
    pub name: String,
}

impl ResourceRef {
    pub fn matches(&self, identity: &ResourceIdentity) -> bool {
        self.name == identity.name
            && self
                .kind
                .as_ref()
                .map(|kind| kind.eq_ignore_ascii_case(&identity.kind))
                .unwrap_or(true)
    }
}

impl FromStr for ResourceRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, name) = match s.split_once('/') {
            Some((kind, name)) => (Some(kind.trim()), name.trim()),
            None => (None, s),
        };
        if name.is_empty() || kind.map(str::is_empty).unwrap_or(false) || name.contains('/') {
            return Err(format!("'{}' is not a valid resource reference", s));
        }
        Ok(Self {
            kind: kind.map(str::to_string),
            name: name.to_string(),
        })
    }
}

impl Display for ResourceRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "{}/{}", kind, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An expected value at a path in the observed state of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub path: FieldPath,
    pub expected: Value,
}

/// Per-resource test settings declared through `krtest.dev/*` annotations. `None` means the run
/// configuration's default applies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestSettings {
    pub conditions: Option<Vec<String>>,
    pub timeout: Option<Duration>,
    pub deletion_timeout: Option<Duration>,
    pub skip_delete: Option<bool>,
    pub assertions: Vec<Assertion>,
    pub update_assertions: Option<Vec<Assertion>>,
}

/// Where a document was declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSource {
    pub path: PathBuf,
    /// 1-based line of the first line of the document.
    pub line: usize,
}

impl Display for ManifestSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.line)
    }
}

/// Which of a document's bodies a placeholder lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Body {
    Apply,
    Update,
}

/// A single parsed resource definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDocument {
    pub identity: ResourceIdentity,
    /// The manifest that is applied, with `krtest.dev/*` annotations removed.
    pub body: Value,
    /// The manifest applied during the update step: `body` with the `krtest.dev/update-patch`
    /// merged in.
    pub update_body: Option<Value>,
    /// Placeholders that have not been resolved yet.
    pub placeholders: Vec<Placeholder>,
    /// Explicit ordering hints (`krtest.dev/depends-on`).
    pub depends_on: Vec<ResourceRef>,
    pub settings: TestSettings,
    pub source: ManifestSource,
}

impl ResourceDocument {
    /// `true` once every placeholder has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.placeholders.is_empty()
    }

    pub fn body(&self, which: Body) -> Option<&Value> {
        match which {
            Body::Apply => Some(&self.body),
            Body::Update => self.update_body.as_ref(),
        }
    }

    pub(crate) fn body_mut(&mut self, which: Body) -> Option<&mut Value> {
        match which {
            Body::Apply => Some(&mut self.body),
            Body::Update => self.update_body.as_mut(),
        }
    }
}
