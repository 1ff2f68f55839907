use crate::check::Check;
use crate::config::resource_address;
use crate::model::RuleConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    pub name: String,
    #[serde(default = "default_resource_name")]
    pub resource_name: String,
    pub steps: Vec<Step>,
}

fn default_resource_name() -> String {
    "test".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Apply(ApplyStep),
    Import(ImportStep),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplyStep {
    pub config: RuleConfig,
    #[serde(default)]
    pub checks: Vec<Check>,
    #[serde(default)]
    pub expect_non_empty_plan: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportStep {
    #[serde(default = "default_true")]
    pub verify: bool,
    /// Attribute key prefixes excluded from the verification.
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl Default for ImportStep {
    fn default() -> Self {
        Self {
            verify: true,
            ignore: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_name: default_resource_name(),
            steps: Vec::new(),
        }
    }

    pub fn address(&self) -> String {
        resource_address(&self.resource_name)
    }

    pub fn apply(mut self, config: RuleConfig, checks: Vec<Check>) -> Self {
        self.steps.push(Step::Apply(ApplyStep {
            config,
            checks,
            expect_non_empty_plan: false,
        }));
        self
    }

    /// Apply step whose checks leave drift behind, such as an out-of-band delete.
    pub fn apply_expecting_drift(mut self, config: RuleConfig, checks: Vec<Check>) -> Self {
        self.steps.push(Step::Apply(ApplyStep {
            config,
            checks,
            expect_non_empty_plan: true,
        }));
        self
    }

    pub fn import_verify(mut self) -> Self {
        self.steps.push(Step::Import(ImportStep::default()));
        self
    }

    pub fn summary(&self) -> ScenarioSummary {
        ScenarioSummary {
            name: self.name.clone(),
            address: self.address(),
            total_steps: self.steps.len(),
            steps: self
                .steps
                .iter()
                .enumerate()
                .map(|(idx, step)| match step {
                    Step::Apply(apply) => StepSummary {
                        index: idx + 1,
                        kind: "apply".to_string(),
                        detail: format!(
                            "rule {} ({} check(s){})",
                            apply.config.rule_name,
                            apply.checks.len(),
                            if apply.expect_non_empty_plan {
                                ", expects drift"
                            } else {
                                ""
                            }
                        ),
                    },
                    Step::Import(import) => StepSummary {
                        index: idx + 1,
                        kind: "import".to_string(),
                        detail: if import.verify {
                            if import.ignore.is_empty() {
                                "verify all attributes".to_string()
                            } else {
                                format!("verify, ignoring {}", import.ignore.join(", "))
                            }
                        } else {
                            "no verification".to_string()
                        },
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub name: String,
    pub address: String,
    pub total_steps: usize,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub index: usize,
    pub kind: String,
    pub detail: String,
}

impl fmt::Display for ScenarioSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scenario: {} ({})", self.name, self.address)?;
        writeln!(f, "Steps: {}", self.total_steps)?;
        for step in &self.steps {
            writeln!(f, "  {}. {} - {}", step.index, step.kind, step.detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("unterminated placeholder")]
    UnterminatedPlaceholder,
    #[error("empty placeholder")]
    EmptyPlaceholder,
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("invalid scenario document: {0}")]
    InvalidDocument(String),
}

pub fn parse_scenario_json(source: &str) -> Result<Scenario, ParseError> {
    serde_json::from_str(source).map_err(|err| ParseError::InvalidDocument(err.to_string()))
}

/// Builds a scenario from an already parsed document, filling placeholders in
/// string values and map keys only, so variable values never reach the parser.
pub fn resolve_scenario(
    mut document: serde_json::Value,
    variables: &HashMap<String, String>,
) -> Result<Scenario, ParseError> {
    substitute_in_value(&mut document, variables)?;
    serde_json::from_value(document).map_err(|err| ParseError::InvalidDocument(err.to_string()))
}

fn substitute_in_value(
    value: &mut serde_json::Value,
    variables: &HashMap<String, String>,
) -> Result<(), ParseError> {
    match value {
        serde_json::Value::String(text) => {
            if text.contains("${") {
                *text = substitute_variables(text, variables)?;
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                substitute_in_value(item, variables)?;
            }
        }
        serde_json::Value::Object(map) => {
            let entries = std::mem::take(map);
            for (key, mut item) in entries {
                substitute_in_value(&mut item, variables)?;
                let key = if key.contains("${") {
                    substitute_variables(&key, variables)?
                } else {
                    key
                };
                map.insert(key, item);
            }
        }
        serde_json::Value::Null | serde_json::Value::Bool(_) | serde_json::Value::Number(_) => {}
    }
    Ok(())
}

/// Replaces `${name}` placeholders in a string; `$${` yields a literal `${`.
pub fn substitute_variables(
    value: &str,
    variables: &HashMap<String, String>,
) -> Result<String, ParseError> {
    let mut result = String::with_capacity(value.len());
    let mut cursor = 0;

    while let Some(start_offset) = value[cursor..].find("${") {
        let start_idx = cursor + start_offset;

        if start_idx > 0 && value.as_bytes()[start_idx - 1] == b'$' {
            // `$${` is an escaped literal `${`.
            result.push_str(&value[cursor..start_idx - 1]);
            result.push_str("${");
            cursor = start_idx + 2;
            continue;
        }

        result.push_str(&value[cursor..start_idx]);

        let remainder = &value[start_idx + 2..];
        let end_offset = remainder
            .find('}')
            .ok_or(ParseError::UnterminatedPlaceholder)?;
        let end_idx = start_idx + 2 + end_offset;
        let token = remainder[..end_offset].trim();

        if token.is_empty() {
            return Err(ParseError::EmptyPlaceholder);
        }

        let replacement = variables
            .get(token)
            .ok_or_else(|| ParseError::UndefinedVariable(token.to_string()))?;
        result.push_str(replacement);
        cursor = end_idx + 1;
    }

    result.push_str(&value[cursor..]);
    Ok(result)
}
