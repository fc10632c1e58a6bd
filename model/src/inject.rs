/*!

Placeholders have the form `${datasource.<key>}` (a value from the data source) or
`${resource.<name>.<field.path>}` / `${resource.<Kind>/<name>.<field.path>}` (a field from the
observed state of another resource). A string that consists of exactly one placeholder is replaced
by the referenced value with its type intact; placeholders embedded in a longer string are
interpolated as text.

!*/

use crate::constants::{DATA_SOURCE_PREFIX, RESOURCE_PREFIX};
use crate::data_source::DataSource;
use crate::error::{self, Result};
use crate::field_path::FieldPath;
use crate::resource::{Body, ResourceDocument, ResourceIdentity, ResourceRef};
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

// Only `${datasource.*}` and `${resource.*}` are placeholders; other `${...}` text is left alone.
const PLACEHOLDER_PATTERN_REGEX: &str = r"\$\{\s*((?:datasource|resource)\.[^{}]*)\}";

lazy_static::lazy_static! {

    static ref REGEX: Regex = {
        #[allow(clippy::unwrap_used)]
        Regex::new(PLACEHOLDER_PATTERN_REGEX).unwrap()
    };
}

/// The observed state of resources that have converged, keyed by identity.
pub type ObservedResources = BTreeMap<ResourceIdentity, Value>;

/// What a placeholder refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InjectionExpression {
    /// A key in the data source.
    DataSource { key: String },
    /// A field in the observed state of another resource.
    Resource { target: ResourceRef, path: FieldPath },
}

impl FromStr for InjectionExpression {
    type Err = String;

    fn from_str(expression: &str) -> std::result::Result<Self, Self::Err> {
        let expression = expression.trim();
        let (prefix, rest) = expression
            .split_once('.')
            .ok_or_else(|| format!("'{}' has no prefix", expression))?;
        match prefix {
            DATA_SOURCE_PREFIX if !rest.is_empty() => Ok(Self::DataSource {
                key: rest.to_string(),
            }),
            DATA_SOURCE_PREFIX => Err("data source key is empty".to_string()),
            RESOURCE_PREFIX => {
                let (target, path) = rest.split_once('.').ok_or_else(|| {
                    format!(
                        "'{}' must name a resource and a field path, e.g. \
                         'resource.db.status.endpoint'",
                        expression
                    )
                })?;
                Ok(Self::Resource {
                    target: target.parse()?,
                    path: path.parse().map_err(|e| format!("{}", e))?,
                })
            }
            other => Err(format!(
                "unknown placeholder prefix '{}', expected '{}' or '{}'",
                other, DATA_SOURCE_PREFIX, RESOURCE_PREFIX
            )),
        }
    }
}

impl Display for InjectionExpression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataSource { key } => write!(f, "${{{}.{}}}", DATA_SOURCE_PREFIX, key),
            Self::Resource { target, path } => {
                write!(f, "${{{}.{}.{}}}", RESOURCE_PREFIX, target, path)
            }
        }
    }
}

impl Serialize for InjectionExpression {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// An injection expression and where it sits in a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Placeholder {
    pub body: Body,
    pub location: FieldPath,
    pub expression: InjectionExpression,
}

impl Display for Placeholder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at '{}'", self.expression, self.location)
    }
}

/// Finds every placeholder in `value`. Returns the location and message of the first malformed
/// placeholder as an error.
pub(crate) fn scan(
    body: Body,
    value: &Value,
) -> std::result::Result<Vec<Placeholder>, (FieldPath, String)> {
    let mut found = Vec::new();
    scan_value(body, value, FieldPath::root(), &mut found)?;
    Ok(found)
}

fn scan_value(
    body: Body,
    value: &Value,
    location: FieldPath,
    found: &mut Vec<Placeholder>,
) -> std::result::Result<(), (FieldPath, String)> {
    match value {
        Value::String(s) => {
            for captures in REGEX.captures_iter(s) {
                let expression = captures
                    .get(1)
                    .map(|m| m.as_str())
                    .unwrap_or_default()
                    .parse()
                    .map_err(|e| (location.clone(), e))?;
                found.push(Placeholder {
                    body,
                    location: location.clone(),
                    expression,
                });
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                scan_value(body, item, location.index(i), found)?;
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                scan_value(body, item, location.key(key.as_str()), found)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Rewrites placeholders in documents.
pub struct Injector<'a> {
    data_source: &'a DataSource,
}

impl<'a> Injector<'a> {
    pub fn new(data_source: &'a DataSource) -> Self {
        Self { data_source }
    }

    /// Replaces every data source placeholder in `document`, and every resource placeholder whose
    /// target is present in `observed`. Returns the placeholders that are still unresolved because
    /// their target has not been observed yet; `document.placeholders` is set to the same list.
    ///
    /// A data source key that does not exist is an error, as is a field that is missing from an
    /// observed resource.
    pub fn inject(
        &self,
        document: &mut ResourceDocument,
        observed: &ObservedResources,
    ) -> Result<Vec<Placeholder>> {
        let context = Context {
            data_source: self.data_source,
            observed,
            document_identity: document.identity.to_string(),
            document_source: document.source.to_string(),
        };
        let mut unresolved = Vec::new();
        for body in [Body::Apply, Body::Update] {
            if let Some(value) = document.body_mut(body) {
                context.inject_value(body, value, FieldPath::root(), &mut unresolved)?;
            }
        }
        document.placeholders = unresolved.clone();
        Ok(unresolved)
    }
}

struct Context<'a> {
    data_source: &'a DataSource,
    observed: &'a ObservedResources,
    document_identity: String,
    document_source: String,
}

impl Context<'_> {
    fn inject_value(
        &self,
        body: Body,
        value: &mut Value,
        location: FieldPath,
        unresolved: &mut Vec<Placeholder>,
    ) -> Result<()> {
        match value {
            Value::String(s) => {
                if let Some(replacement) = self.inject_string(body, s, &location, unresolved)? {
                    *value = replacement;
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    self.inject_value(body, item, location.index(i), unresolved)?;
                }
            }
            Value::Object(map) => {
                for (key, item) in map.iter_mut() {
                    self.inject_value(body, item, location.key(key.as_str()), unresolved)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Returns the new value for the string `s`, or `None` if nothing changed.
    fn inject_string(
        &self,
        body: Body,
        s: &str,
        location: &FieldPath,
        unresolved: &mut Vec<Placeholder>,
    ) -> Result<Option<Value>> {
        let whole_match = REGEX
            .find(s)
            .map(|m| m.start() == 0 && m.end() == s.len())
            .unwrap_or(false);

        let mut changed = false;
        let mut typed_value = None;
        let mut rewritten = String::with_capacity(s.len());
        let mut last = 0;
        for captures in REGEX.captures_iter(s) {
            let (whole, expression) = match split_captures(&captures) {
                Some(some) => some,
                None => continue,
            };
            rewritten.push_str(&s[last..whole.start()]);
            last = whole.end();

            // Malformed expressions are rejected when manifests are parsed.
            let expression: InjectionExpression = match expression.parse() {
                Ok(ok) => ok,
                Err(_) => {
                    rewritten.push_str(whole.as_str());
                    continue;
                }
            };
            match self.resolve(&expression)? {
                Some(resolved) => {
                    changed = true;
                    rewritten.push_str(&as_text(&resolved));
                    if whole_match {
                        typed_value = Some(resolved);
                    }
                }
                None => {
                    rewritten.push_str(whole.as_str());
                    unresolved.push(Placeholder {
                        body,
                        location: location.clone(),
                        expression,
                    });
                }
            }
        }
        rewritten.push_str(&s[last..]);

        if !changed {
            return Ok(None);
        }
        Ok(Some(typed_value.unwrap_or(Value::String(rewritten))))
    }

    fn resolve(&self, expression: &InjectionExpression) -> Result<Option<Value>> {
        match expression {
            InjectionExpression::DataSource { key } => match self.data_source.get(key) {
                Some(value) => Ok(Some(value.clone())),
                None => error::InjectionKeyNotFoundSnafu {
                    resource: &self.document_identity,
                    source_location: &self.document_source,
                    key,
                }
                .fail(),
            },
            InjectionExpression::Resource { target, path } => {
                let (identity, observed) =
                    match self.observed.iter().find(|(id, _)| target.matches(id)) {
                        Some(some) => some,
                        None => return Ok(None),
                    };
                match path.get(observed) {
                    Some(value) => Ok(Some(value.clone())),
                    None => error::ObservedFieldNotFoundSnafu {
                        resource: &self.document_identity,
                        dependency: identity.to_string(),
                        field: path.to_string(),
                    }
                    .fail(),
                }
            }
        }
    }
}

fn split_captures<'t>(captures: &Captures<'t>) -> Option<(regex::Match<'t>, &'t str)> {
    Some((captures.get(0)?, captures.get(1)?.as_str()))
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
