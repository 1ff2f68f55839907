use crate::document::format_number;
use crate::model::{FilterCriterion, FindingFieldsUpdate, RemoteRule, RuleConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flattened attribute view: lists as `key.#`/`key.N.field`, maps as `key.%`/`key.k`.
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    pub type_name: String,
    pub id: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct State {
    pub resources: BTreeMap<String, ResourceState>,
}

impl State {
    pub fn get(&self, address: &str) -> Option<&ResourceState> {
        self.resources.get(address)
    }

    pub fn insert(&mut self, address: impl Into<String>, resource: ResourceState) {
        self.resources.insert(address.into(), resource);
    }

    pub fn remove(&mut self, address: &str) -> Option<ResourceState> {
        self.resources.remove(address)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeDiff {
    pub key: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl std::fmt::Display for AttributeDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |value: &Option<String>| match value {
            Some(v) => format!("{v:?}"),
            None => "<absent>".to_string(),
        };
        write!(
            f,
            "{}: {} => {}",
            self.key,
            show(&self.expected),
            show(&self.actual)
        )
    }
}

struct Flattener {
    out: Attributes,
}

impl Flattener {
    fn new() -> Self {
        Self {
            out: Attributes::new(),
        }
    }

    fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.out.insert(key.into(), value.into());
    }

    fn set_opt(&mut self, key: String, value: Option<String>) {
        if let Some(value) = value {
            self.out.insert(key, value);
        }
    }

    fn count(&mut self, prefix: &str, len: usize) {
        self.set(format!("{prefix}.#"), len.to_string());
    }

    fn map(&mut self, prefix: &str, map: &BTreeMap<String, String>) {
        self.set(format!("{prefix}.%"), map.len().to_string());
        for (key, value) in map {
            self.set(format!("{prefix}.{key}"), value.clone());
        }
    }

    fn finish(self) -> Attributes {
        self.out
    }
}

/// Attributes the configuration itself determines.
pub fn flatten_config(config: &RuleConfig) -> Attributes {
    let mut flat = Flattener::new();
    flat.set("rule_name", config.rule_name.clone());
    flat.set("description", config.description.clone());
    flat.set("rule_order", config.rule_order.to_string());
    flat.set("rule_status", config.rule_status.as_str());
    flat.set("is_terminal", config.is_terminal.to_string());

    flat.count("actions", config.actions.len());
    for (idx, action) in config.actions.iter().enumerate() {
        let prefix = format!("actions.{idx}");
        flat.set(format!("{prefix}.type"), action.action_type.as_str());
        let updates: Vec<&FindingFieldsUpdate> = action.finding_fields_update.iter().collect();
        flat.count(&format!("{prefix}.finding_fields_update"), updates.len());
        for update in updates {
            flatten_update(&mut flat, &format!("{prefix}.finding_fields_update.0"), update);
        }
    }

    flat.count("criteria", 1);
    for (field, filters) in config.criteria.entries() {
        let prefix = format!("criteria.0.{field}");
        flat.count(&prefix, filters.len());
        for (idx, filter) in filters.iter().enumerate() {
            flatten_filter(&mut flat, &format!("{prefix}.{idx}"), filter);
        }
    }

    flat.map("tags", &config.tags);
    flat.finish()
}

/// Full materialized view of a remote rule, including computed attributes.
pub fn flatten_rule(rule: &RemoteRule) -> Attributes {
    let mut attributes = flatten_config(&rule.config);
    let mut flat = Flattener::new();
    flat.set("id", rule.arn.clone());
    flat.set("arn", rule.arn.clone());
    flat.map("tags_all", &rule.tags_all);
    attributes.extend(flat.finish());
    attributes
}

fn flatten_update(flat: &mut Flattener, prefix: &str, update: &FindingFieldsUpdate) {
    flat.set_opt(
        format!("{prefix}.confidence"),
        update.confidence.map(|v| v.to_string()),
    );
    flat.set_opt(
        format!("{prefix}.criticality"),
        update.criticality.map(|v| v.to_string()),
    );

    let notes: Vec<_> = update.note.iter().collect();
    flat.count(&format!("{prefix}.note"), notes.len());
    for note in notes {
        flat.set(format!("{prefix}.note.0.text"), note.text.clone());
        flat.set(format!("{prefix}.note.0.updated_by"), note.updated_by.clone());
    }

    let severities: Vec<_> = update.severity.iter().collect();
    flat.count(&format!("{prefix}.severity"), severities.len());
    for severity in severities {
        flat.set_opt(
            format!("{prefix}.severity.0.label"),
            severity.label.map(|label| label.as_str().to_string()),
        );
        flat.set_opt(
            format!("{prefix}.severity.0.product"),
            severity.product.map(format_number),
        );
    }

    flat.count(&format!("{prefix}.types"), update.types.len());
    for (idx, finding_type) in update.types.iter().enumerate() {
        flat.set(format!("{prefix}.types.{idx}"), finding_type.clone());
    }

    flat.map(
        &format!("{prefix}.user_defined_fields"),
        &update.user_defined_fields,
    );
    flat.set_opt(
        format!("{prefix}.verification_state"),
        update
            .verification_state
            .map(|state| state.as_str().to_string()),
    );

    let workflows: Vec<_> = update.workflow.iter().collect();
    flat.count(&format!("{prefix}.workflow"), workflows.len());
    for workflow in workflows {
        flat.set(
            format!("{prefix}.workflow.0.status"),
            workflow.status.as_str(),
        );
    }
}

fn flatten_filter(flat: &mut Flattener, prefix: &str, filter: &FilterCriterion) {
    match filter {
        FilterCriterion::String(f) => {
            flat.set(format!("{prefix}.comparison"), f.comparison.as_str());
            flat.set(format!("{prefix}.value"), f.value.clone());
        }
        FilterCriterion::Number(f) => {
            flat.set_opt(format!("{prefix}.eq"), f.eq.map(format_number));
            flat.set_opt(format!("{prefix}.gte"), f.gte.map(format_number));
            flat.set_opt(format!("{prefix}.lte"), f.lte.map(format_number));
        }
        FilterCriterion::Date(f) => {
            flat.set_opt(format!("{prefix}.start"), f.start.clone());
            flat.set_opt(format!("{prefix}.end"), f.end.clone());
            let ranges: Vec<_> = f.date_range.iter().collect();
            flat.count(&format!("{prefix}.date_range"), ranges.len());
            for range in ranges {
                flat.set(format!("{prefix}.date_range.0.unit"), range.unit.as_str());
                flat.set(
                    format!("{prefix}.date_range.0.value"),
                    range.value.to_string(),
                );
            }
        }
        FilterCriterion::Map(f) => {
            flat.set(format!("{prefix}.comparison"), f.comparison.as_str());
            flat.set(format!("{prefix}.key"), f.key.clone());
            flat.set(format!("{prefix}.value"), f.value.clone());
        }
    }
}

/// Keys whose values differ between two views; keys under an ignored prefix are skipped.
pub fn diff_attributes(
    expected: &Attributes,
    actual: &Attributes,
    ignore: &[String],
) -> Vec<AttributeDiff> {
    let ignored = |key: &str| ignore.iter().any(|prefix| key.starts_with(prefix.as_str()));

    let mut keys: Vec<&String> = expected.keys().chain(actual.keys()).collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .filter(|key| !ignored(key.as_str()))
        .filter_map(|key| {
            let left = expected.get(key);
            let right = actual.get(key);
            if left == right {
                None
            } else {
                Some(AttributeDiff {
                    key: key.clone(),
                    expected: left.cloned(),
                    actual: right.cloned(),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Action, Criteria, DateFilter, DateRangeUnit, NumberFilter, RuleStatus, StringComparison,
        StringFilter,
    };

    fn config() -> RuleConfig {
        let mut update = FindingFieldsUpdate::default();
        update
            .user_defined_fields
            .insert("key".to_string(), "value".to_string());
        let mut tags = BTreeMap::new();
        tags.insert("key1".to_string(), "value1".to_string());
        RuleConfig {
            rule_name: "name".to_string(),
            description: "test description".to_string(),
            rule_order: 1,
            rule_status: RuleStatus::Enabled,
            is_terminal: false,
            actions: vec![Action::finding_fields_update(update)],
            criteria: Criteria {
                aws_account_id: vec![StringFilter {
                    comparison: StringComparison::Equals,
                    value: "1234567890".to_string(),
                }],
                confidence: vec![NumberFilter::eq(5.0)],
                created_at: vec![DateFilter::relative(DateRangeUnit::Days, 10)],
                ..Criteria::default()
            },
            tags,
        }
    }

    #[test]
    fn flattens_criteria_with_counts() {
        let attrs = flatten_config(&config());
        let get = |key: &str| attrs.get(key).map(String::as_str);

        assert_eq!(get("criteria.#"), Some("1"));
        assert_eq!(get("criteria.0.aws_account_id.#"), Some("1"));
        assert_eq!(get("criteria.0.aws_account_id.0.comparison"), Some("EQUALS"));
        assert_eq!(get("criteria.0.aws_account_id.0.value"), Some("1234567890"));
        assert_eq!(get("criteria.0.confidence.0.eq"), Some("5"));
        assert_eq!(get("criteria.0.confidence.0.lte"), None);
        assert_eq!(get("criteria.0.created_at.0.date_range.#"), Some("1"));
        assert_eq!(get("criteria.0.created_at.0.date_range.0.unit"), Some("DAYS"));
        assert_eq!(get("criteria.0.created_at.0.date_range.0.value"), Some("10"));
        assert_eq!(get("criteria.0.title.#"), None);
        assert_eq!(get("tags.%"), Some("1"));
        assert_eq!(get("tags.key1"), Some("value1"));
        assert_eq!(
            get("actions.0.finding_fields_update.0.user_defined_fields.key"),
            Some("value")
        );
        assert_eq!(get("actions.0.finding_fields_update.0.severity.#"), Some("0"));
    }

    #[test]
    fn diff_respects_ignored_prefixes() {
        let mut left = flatten_config(&config());
        let mut right = left.clone();
        right.insert("tags.key1".to_string(), "changed".to_string());
        right.insert("tags_all.%".to_string(), "0".to_string());
        left.insert("rule_order".to_string(), "1".to_string());

        let diffs = diff_attributes(&left, &right, &["tags_all".to_string()]);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].key, "tags.key1");
        assert_eq!(diffs[0].to_string(), "tags.key1: \"value1\" => \"changed\"");
    }
}
