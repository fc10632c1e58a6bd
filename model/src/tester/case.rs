use super::state::{Plan, Stage};
use crate::config::AutomatedTest;
use crate::resource::{Assertion, ResourceDocument, ResourceIdentity};
use serde_json::Value;
use std::time::Duration;

/// Everything the tester needs to drive one resource. The document's own annotations take
/// precedence over the run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    /// Position of the document in the prepared order.
    pub index: usize,
    pub document: ResourceDocument,
    pub conditions: Vec<String>,
    pub assertions: Vec<Assertion>,
    pub update_assertions: Vec<Assertion>,
    pub timeout: Duration,
    pub deletion_timeout: Duration,
    pub skip_delete: bool,
}

impl TestCase {
    pub fn new(index: usize, document: ResourceDocument, config: &AutomatedTest) -> Self {
        let settings = &document.settings;
        let assertions = settings.assertions.clone();
        let update_assertions = match &settings.update_assertions {
            Some(overrides) => merge_assertions(&assertions, overrides),
            None => assertions.clone(),
        };
        Self {
            index,
            conditions: settings
                .conditions
                .clone()
                .unwrap_or_else(|| config.default_conditions.clone()),
            assertions,
            update_assertions,
            timeout: settings.timeout.unwrap_or_else(|| config.default_timeout()),
            deletion_timeout: settings
                .deletion_timeout
                .unwrap_or_else(|| config.deletion_timeout()),
            skip_delete: config.skip_delete || settings.skip_delete.unwrap_or(false),
            document,
        }
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.document.identity
    }

    pub fn has_update(&self) -> bool {
        self.document.update_body.is_some()
    }

    pub fn plan(&self) -> Plan {
        Plan {
            has_update: self.has_update(),
            skip_delete: self.skip_delete,
        }
    }

    /// The manifest submitted for `stage`.
    pub fn manifest(&self, stage: Stage) -> Option<&Value> {
        match stage {
            Stage::Create => Some(&self.document.body),
            Stage::Update => self.document.update_body.as_ref(),
        }
    }

    pub fn assertions(&self, stage: Stage) -> &[Assertion] {
        match stage {
            Stage::Create => &self.assertions,
            Stage::Update => &self.update_assertions,
        }
    }
}

/// `base` with every assertion on a path in `overrides` replaced, followed by the new paths.
fn merge_assertions(base: &[Assertion], overrides: &[Assertion]) -> Vec<Assertion> {
    let mut merged: Vec<Assertion> = base
        .iter()
        .filter(|a| !overrides.iter().any(|o| o.path == a.path))
        .cloned()
        .collect();
    merged.extend(overrides.iter().cloned());
    merged
}
