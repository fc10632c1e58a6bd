use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use snafu::Snafu;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The error returned when a string cannot be parsed into a [`FieldPath`].
#[derive(Debug, Snafu)]
#[snafu(display("Invalid field path '{}': {}", path, reason))]
pub struct FieldPathError {
    path: String,
    reason: String,
}

fn invalid<T>(path: &str, reason: &str) -> Result<T, FieldPathError> {
    FieldPathSnafu { path, reason }.fail()
}

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A location inside a structured document, written as `status.atProvider.endpoints[0].host`.
/// Keys containing `.` or brackets can be quoted: `metadata.labels["app.kubernetes.io/name"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<Segment>);

impl FieldPath {
    /// The empty path, which refers to the whole document.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new path with `key` appended.
    pub fn key<S: Into<String>>(&self, key: S) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Key(key.into()));
        Self(segments)
    }

    /// Returns a new path with `index` appended.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Index(index));
        Self(segments)
    }

    /// Looks up the value at this path, `None` if any step is missing or has the wrong shape.
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(value, |current, segment| match segment {
                Segment::Key(key) => current.as_object()?.get(key),
                Segment::Index(index) => current.as_array()?.get(*index),
            })
    }
}

impl FromStr for FieldPath {
    type Err = FieldPathError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        let mut key = String::new();
        let mut chars = path.chars();
        // True at the start of the path and directly after a `.`.
        let mut expecting_key = true;
        // True directly after a `]`, where only `.` or `[` may follow.
        let mut after_bracket = false;

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    } else if expecting_key {
                        return invalid(path, "empty segment");
                    }
                    expecting_key = true;
                    after_bracket = false;
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    } else if expecting_key && !segments.is_empty() {
                        return invalid(path, "'[' must follow a key");
                    }
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return invalid(path, "unterminated '['");
                    }
                    segments.push(parse_bracket(path, &inner)?);
                    expecting_key = false;
                    after_bracket = true;
                }
                ']' => return invalid(path, "unexpected ']'"),
                c => {
                    if after_bracket {
                        return invalid(path, "expected '.' or '[' after ']'");
                    }
                    key.push(c);
                    expecting_key = false;
                }
            }
        }

        if !key.is_empty() {
            segments.push(Segment::Key(key));
        } else if expecting_key && !segments.is_empty() {
            return invalid(path, "trailing '.'");
        }
        if segments.is_empty() {
            return invalid(path, "empty path");
        }
        Ok(Self(segments))
    }
}

fn parse_bracket(path: &str, inner: &str) -> Result<Segment, FieldPathError> {
    let quoted = |q: char| inner.len() >= 2 && inner.starts_with(q) && inner.ends_with(q);
    if quoted('"') || quoted('\'') {
        return Ok(Segment::Key(inner[1..inner.len() - 1].to_string()));
    }
    match inner.trim().parse::<usize>() {
        Ok(index) => Ok(Segment::Index(index)),
        Err(_) => invalid(path, "bracket must contain an index or a quoted key"),
    }
}

fn needs_quotes(key: &str) -> bool {
    key.is_empty() || key.contains(|c| matches!(c, '.' | '[' | ']'))
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Key(key) if needs_quotes(key) => write!(f, "[\"{}\"]", key)?,
                Segment::Key(key) if i == 0 => write!(f, "{}", key)?,
                Segment::Key(key) => write!(f, ".{}", key)?,
                Segment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
