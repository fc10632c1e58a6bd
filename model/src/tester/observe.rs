use crate::constants::CONDITION_STALLED;
use crate::report::Failure;
use crate::resource::Assertion;
use serde::Deserialize;
use serde_json::Value;

/// What a single read of a resource's state says about its conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Converged,
    /// Names the conditions that are not satisfied yet.
    Progressing { waiting_for: Vec<String> },
    /// The control plane has given up on the resource.
    TerminalFailure(Failure),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Condition {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
    reason: Option<String>,
    message: Option<String>,
    observed_generation: Option<i64>,
}

impl Condition {
    fn is(&self, status: &str) -> bool {
        self.status.eq_ignore_ascii_case(status)
    }

    fn into_failure(self) -> Failure {
        Failure::Condition {
            condition: self.condition_type,
            reason: self.reason,
            message: self.message,
        }
    }
}

fn conditions(observed: &Value) -> Vec<Condition> {
    observed
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Evaluates `expected` condition types against the observed state.
///
/// The resource has converged when every expected condition is `True` and, where the condition
/// carries an `observedGeneration`, it matches `metadata.generation`. A `Stalled` condition that
/// is `True`, or an expected condition that is `False` with one of `terminal_reasons`, is a
/// terminal failure.
pub fn evaluate(observed: &Value, expected: &[String], terminal_reasons: &[String]) -> Observation {
    let generation = observed.pointer("/metadata/generation").and_then(Value::as_i64);
    let conditions = conditions(observed);

    if let Some(stalled) = conditions
        .iter()
        .find(|c| c.condition_type == CONDITION_STALLED && c.is("True"))
    {
        return Observation::TerminalFailure(stalled.clone().into_failure());
    }

    let mut waiting_for = Vec::new();
    for expected_type in expected {
        let condition = match conditions.iter().find(|c| &c.condition_type == expected_type) {
            Some(condition) => condition,
            None => {
                waiting_for.push(expected_type.clone());
                continue;
            }
        };
        let terminal = condition.is("False")
            && condition
                .reason
                .as_ref()
                .map(|reason| terminal_reasons.contains(reason))
                .unwrap_or(false);
        if terminal {
            return Observation::TerminalFailure(condition.clone().into_failure());
        }
        let current = match (generation, condition.observed_generation) {
            (Some(generation), Some(observed)) => generation == observed,
            _ => true,
        };
        if !condition.is("True") || !current {
            waiting_for.push(expected_type.clone());
        }
    }

    if waiting_for.is_empty() {
        Observation::Converged
    } else {
        Observation::Progressing { waiting_for }
    }
}

/// Checks `assertions` in order and returns the first one that does not hold.
pub fn check_assertions(observed: &Value, assertions: &[Assertion]) -> Result<(), Failure> {
    for assertion in assertions {
        let actual = assertion.path.get(observed);
        if !actual
            .map(|actual| values_match(&assertion.expected, actual))
            .unwrap_or(false)
        {
            return Err(Failure::Assertion {
                path: assertion.path.to_string(),
                expected: assertion.expected.clone(),
                actual: actual.cloned(),
            });
        }
    }
    Ok(())
}

/// Numbers compare by value so that `1` matches `1.0`; everything else must be equal.
fn values_match(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(expected), Value::Number(actual)) => {
            match (expected.as_f64(), actual.as_f64()) {
                (Some(expected), Some(actual)) => expected == actual,
                _ => expected == actual,
            }
        }
        _ => expected == actual,
    }
}
