use crate::resource::ResourceIdentity;
use log::warn;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tabled::{Style, Table, Tabled};
use tokio::sync::Mutex;

/// The terminal result of driving one resource through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Passed,
    /// The control plane reported a failure, or an assertion did not hold.
    Failed,
    /// A condition, or the deletion, did not happen in time.
    TimedOut,
    /// The harness could not drive the resource, e.g. an API call failed.
    Errored,
}

serde_plain::derive_display_from_serialize!(OutcomeStatus);

/// The furthest lifecycle step a resource reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Applying,
    Observing,
    Asserting,
    Updating,
    ObservingUpdate,
    AssertingUpdate,
    Deleting,
    ObservingDeletion,
    Complete,
}

serde_plain::derive_display_from_serialize!(Phase);

/// Why a resource did not pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Failure {
    /// A resource this one depends on did not converge.
    DependencyFailed { dependency: String },
    /// Placeholders that could still not be resolved when the resource was about to be applied.
    Unresolved { placeholders: Vec<String> },
    Injection { message: String },
    Api { operation: String, message: String },
    /// A condition reported a failure that the control plane will not recover from.
    Condition {
        condition: String,
        reason: Option<String>,
        message: Option<String>,
    },
    Assertion {
        path: String,
        expected: Value,
        actual: Option<Value>,
    },
    Timeout { waiting_for: String, seconds: u64 },
    /// The deadline for the whole run expired.
    Cancelled,
    Internal { message: String },
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::DependencyFailed { dependency } => {
                write!(f, "dependency '{}' did not converge", dependency)
            }
            Failure::Unresolved { placeholders } => {
                write!(f, "unresolved placeholders: {}", placeholders.join(", "))
            }
            Failure::Injection { message } => write!(f, "injection failed: {}", message),
            Failure::Api { operation, message } => {
                write!(f, "{} failed: {}", operation, message)
            }
            Failure::Condition {
                condition,
                reason,
                message,
            } => {
                write!(f, "condition '{}' failed", condition)?;
                if let Some(reason) = reason {
                    write!(f, " with reason '{}'", reason)?;
                }
                if let Some(message) = message {
                    write!(f, ": {}", message)?;
                }
                Ok(())
            }
            Failure::Assertion {
                path,
                expected,
                actual,
            } => match actual {
                Some(actual) => write!(
                    f,
                    "expected '{}' to be {}, found {}",
                    path, expected, actual
                ),
                None => write!(f, "expected '{}' to be {}, found nothing", path, expected),
            },
            Failure::Timeout {
                waiting_for,
                seconds,
            } => write!(f, "timed out after {}s waiting for {}", seconds, waiting_for),
            Failure::Cancelled => write!(f, "the run deadline expired"),
            Failure::Internal { message } => write!(f, "{}", message),
        }
    }
}

/// The terminal result of one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    pub identity: ResourceIdentity,
    pub status: OutcomeStatus,
    pub phase: Phase,
    pub failure: Option<Failure>,
    /// The most recent state read from the control plane, if any read succeeded.
    pub last_observed: Option<Value>,
    #[serde(serialize_with = "serialize_seconds")]
    pub elapsed: Duration,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.status == OutcomeStatus::Passed
    }
}

fn serialize_seconds<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// One outcome per tested resource, in the order the resources were prepared.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestReport {
    outcomes: Vec<TestOutcome>,
}

impl TestReport {
    pub fn new(outcomes: Vec<TestOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[TestOutcome] {
        &self.outcomes
    }

    /// `true` if every resource passed.
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(TestOutcome::passed)
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    /// A table with one row per resource, followed by the details of every resource that did not
    /// pass.
    pub fn summary(&self) -> String {
        let rows: Vec<ResultRow> = self.outcomes.iter().map(ResultRow::from).collect();
        let mut summary = Table::new(rows).with(Style::blank()).to_string();
        summary.push_str(&format!(
            "\n\n{} passed, {} failed, {} timed out, {} errored\n",
            self.count(OutcomeStatus::Passed),
            self.count(OutcomeStatus::Failed),
            self.count(OutcomeStatus::TimedOut),
            self.count(OutcomeStatus::Errored),
        ));

        let failures: Vec<&TestOutcome> = self.outcomes.iter().filter(|o| !o.passed()).collect();
        if !failures.is_empty() {
            summary.push_str("\nFailures:\n");
            for outcome in failures {
                summary.push_str(&format!(
                    "\n{} ({} during {})\n",
                    outcome.identity, outcome.status, outcome.phase
                ));
                if let Some(failure) = &outcome.failure {
                    summary.push_str(&format!("  {}\n", failure));
                }
                if let Some(observed) = &outcome.last_observed {
                    summary.push_str("  last observed state:\n");
                    let yaml = serde_yaml::to_string(observed)
                        .unwrap_or_else(|e| format!("<unable to render: {}>", e));
                    for line in yaml.lines().filter(|line| *line != "---") {
                        summary.push_str(&format!("    {}\n", line));
                    }
                }
            }
        }
        summary
    }
}

impl Display for TestReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary())
    }
}

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "STATUS")]
    status: OutcomeStatus,
    #[tabled(rename = "PHASE")]
    phase: Phase,
    #[tabled(rename = "ELAPSED")]
    #[tabled(display_with = "display_elapsed")]
    elapsed: Duration,
    #[tabled(rename = "DETAIL")]
    #[tabled(display_with = "display_failure")]
    failure: Option<Failure>,
}

impl From<&TestOutcome> for ResultRow {
    fn from(outcome: &TestOutcome) -> Self {
        let identity = &outcome.identity;
        Self {
            name: match &identity.namespace {
                Some(namespace) => format!("{}/{}", namespace, identity.name),
                None => identity.name.clone(),
            },
            kind: identity.kind.clone(),
            status: outcome.status,
            phase: outcome.phase,
            elapsed: outcome.elapsed,
            failure: outcome.failure.clone(),
        }
    }
}

fn display_elapsed(elapsed: &Duration) -> String {
    format!("{:.1}s", elapsed.as_secs_f64())
}

fn display_failure(failure: &Option<Failure>) -> String {
    match failure {
        Some(failure) => failure.to_string(),
        None => "".to_string(),
    }
}

/// Collects outcomes from concurrently running cases. Each slot is written once; later writes
/// for the same case are ignored.
pub(crate) struct ReportBuilder {
    identities: Vec<ResourceIdentity>,
    outcomes: Mutex<Vec<Option<TestOutcome>>>,
}

impl ReportBuilder {
    pub(crate) fn new(identities: Vec<ResourceIdentity>) -> Self {
        let outcomes = Mutex::new(vec![None; identities.len()]);
        Self {
            identities,
            outcomes,
        }
    }

    pub(crate) async fn record(&self, index: usize, outcome: TestOutcome) {
        let mut outcomes = self.outcomes.lock().await;
        match outcomes.get_mut(index) {
            Some(slot @ None) => *slot = Some(outcome),
            Some(Some(existing)) => warn!(
                "ignoring second outcome for '{}', already recorded as {}",
                existing.identity, existing.status
            ),
            None => warn!("ignoring outcome for unknown case {}", index),
        }
    }

    /// Builds the report. Cases that never recorded an outcome are reported as `Errored`.
    pub(crate) async fn finish(&self) -> TestReport {
        let mut outcomes = self.outcomes.lock().await;
        let outcomes = outcomes
            .iter_mut()
            .zip(&self.identities)
            .map(|(slot, identity)| {
                slot.take().unwrap_or_else(|| TestOutcome {
                    identity: identity.clone(),
                    status: OutcomeStatus::Errored,
                    phase: Phase::Pending,
                    failure: Some(Failure::Internal {
                        message: "no outcome was recorded".to_string(),
                    }),
                    last_observed: None,
                    elapsed: Duration::ZERO,
                })
            })
            .collect();
        TestReport::new(outcomes)
    }
}
