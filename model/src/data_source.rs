use crate::error::{self, Result};
use log::trace;
use serde_json::Value;
use serde_yaml::Value as YamlValue;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::path::Path;

/// Values that manifests can inject with `${datasource.<key>}`. Nested mappings in the source
/// file are flattened into dotted keys, so
///
/// ```yaml
/// db:
///   password: s3cr3t
/// ```
///
/// is available as `${datasource.db.password}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSource {
    values: BTreeMap<String, Value>,
}

impl DataSource {
    /// A data source without any values, used when none is configured.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads and flattens the YAML mapping at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).context(error::DataSourceUnavailableSnafu { path })?;
        let data_source = Self::from_yaml_str(path, &contents)?;
        trace!(
            "loaded {} data source keys from '{}'",
            data_source.len(),
            path.display()
        );
        Ok(data_source)
    }

    /// Parses YAML `contents`. `path` is only used for error messages.
    pub fn from_yaml_str(path: &Path, contents: &str) -> Result<Self> {
        if crate::manifest::is_blank(contents) {
            return Ok(Self::empty());
        }
        let root: YamlValue = serde_yaml::from_str(contents).map_err(|e| {
            error::DataSourceMalformedSnafu {
                path,
                reason: e.to_string(),
            }
            .build()
        })?;
        let mut values = BTreeMap::new();
        match root {
            YamlValue::Null => {}
            YamlValue::Mapping(_) => flatten(path, "", root, &mut values)?,
            _ => {
                return error::DataSourceMalformedSnafu {
                    path,
                    reason: "the top level must be a mapping of keys to values",
                }
                .fail()
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for DataSource
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn flatten(
    path: &Path,
    prefix: &str,
    value: YamlValue,
    values: &mut BTreeMap<String, Value>,
) -> Result<()> {
    match value {
        YamlValue::Mapping(mapping) => {
            for (key, value) in mapping {
                let key = match key {
                    YamlValue::String(s) => s,
                    YamlValue::Number(n) => n.to_string(),
                    YamlValue::Bool(b) => b.to_string(),
                    other => {
                        return error::DataSourceMalformedSnafu {
                            path,
                            reason: format!("unsupported key {:?} under '{}'", other, prefix),
                        }
                        .fail()
                    }
                };
                let full_key = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(path, &full_key, value, values)?;
            }
        }
        YamlValue::Sequence(_) => {
            return error::DataSourceMalformedSnafu {
                path,
                reason: format!("key '{}' holds a list, only scalar values are supported", prefix),
            }
            .fail()
        }
        scalar => {
            let json = serde_json::to_value(&scalar).map_err(|e| {
                error::DataSourceMalformedSnafu {
                    path,
                    reason: format!("key '{}': {}", prefix, e),
                }
                .build()
            })?;
            values.insert(prefix.to_string(), json);
        }
    }
    Ok(())
}
