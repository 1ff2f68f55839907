use crate::document::{Block, Document, Value};
use crate::model::{
    Action, Criteria, DateField, DateFilter, FindingFieldsUpdate, MapComparison, MapField,
    MapFilter, NumberField, NumberFilter, RuleConfig, RuleStatus, StringComparison, StringField,
    StringFilter, RESOURCE_TYPE,
};
use crate::validation::{validate_rule, Diagnostic};
use std::collections::BTreeMap;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid rule configuration: {}", summarize(.0))]
    Invalid(Vec<Diagnostic>),
    #[error("failed to format timestamp: {0}")]
    Timestamp(String),
}

impl ConfigError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            ConfigError::Invalid(diagnostics) => diagnostics,
            ConfigError::Timestamp(_) => &[],
        }
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .filter(|diag| diag.is_error())
        .map(|diag| diag.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Typed builder for a rule configuration; `build` validates the shape.
#[derive(Debug, Clone)]
pub struct RuleConfigBuilder {
    config: RuleConfig,
}

impl RuleConfigBuilder {
    pub fn new(rule_name: impl Into<String>) -> Self {
        Self {
            config: RuleConfig {
                rule_name: rule_name.into(),
                description: String::new(),
                rule_order: 1,
                rule_status: RuleStatus::Enabled,
                is_terminal: false,
                actions: Vec::new(),
                criteria: Criteria::default(),
                tags: BTreeMap::new(),
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    pub fn rule_order(mut self, order: i32) -> Self {
        self.config.rule_order = order;
        self
    }

    pub fn rule_status(mut self, status: RuleStatus) -> Self {
        self.config.rule_status = status;
        self
    }

    pub fn terminal(mut self, is_terminal: bool) -> Self {
        self.config.is_terminal = is_terminal;
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.config.actions.push(action);
        self
    }

    pub fn finding_fields_update(self, update: FindingFieldsUpdate) -> Self {
        self.action(Action::finding_fields_update(update))
    }

    pub fn string_filter(
        mut self,
        field: StringField,
        comparison: StringComparison,
        value: impl Into<String>,
    ) -> Self {
        self.config.criteria.strings_mut(field).push(StringFilter {
            comparison,
            value: value.into(),
        });
        self
    }

    pub fn number_filter(mut self, field: NumberField, filter: NumberFilter) -> Self {
        self.config.criteria.numbers_mut(field).push(filter);
        self
    }

    pub fn date_filter(mut self, field: DateField, filter: DateFilter) -> Self {
        self.config.criteria.dates_mut(field).push(filter);
        self
    }

    pub fn map_filter(
        mut self,
        field: MapField,
        comparison: MapComparison,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.config.criteria.maps_mut(field).push(MapFilter {
            comparison,
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.tags.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<RuleConfig, ConfigError> {
        let diagnostics = validate_rule(&self.config);
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Err(ConfigError::Invalid(diagnostics));
        }
        Ok(self.config)
    }
}

/// Address of a resource block, `<type>.<name>`.
pub fn resource_address(name: &str) -> String {
    format!("{RESOURCE_TYPE}.{name}")
}

pub fn to_block(name: &str, config: &RuleConfig) -> Block {
    let mut block = Block::new("resource")
        .label(RESOURCE_TYPE)
        .label(name)
        .attr("description", config.description.as_str())
        .attr("rule_name", config.rule_name.as_str())
        .attr("rule_order", config.rule_order);

    if config.rule_status != RuleStatus::Enabled {
        block = block.attr("rule_status", config.rule_status.as_str());
    }
    if config.is_terminal {
        block = block.attr("is_terminal", true);
    }

    block = block.blocks(config.actions.iter().map(action_block));
    block = block.block(criteria_block(&config.criteria));

    if !config.tags.is_empty() {
        block = block.attr("tags", &config.tags);
    }
    block
}

/// Renders the configuration document holding exactly one rule resource.
pub fn render_config(name: &str, config: &RuleConfig) -> String {
    let mut document = Document::new();
    document.push(to_block(name, config));
    document.render()
}

fn action_block(action: &Action) -> Block {
    let mut block = Block::new("actions");
    if let Some(update) = &action.finding_fields_update {
        block = block.block(finding_fields_update_block(update));
    }
    block.attr("type", action.action_type.as_str())
}

fn finding_fields_update_block(update: &FindingFieldsUpdate) -> Block {
    let mut block = Block::new("finding_fields_update")
        .attr_opt("confidence", update.confidence)
        .attr_opt("criticality", update.criticality);

    if let Some(note) = &update.note {
        block = block.block(
            Block::new("note")
                .attr("text", note.text.as_str())
                .attr("updated_by", note.updated_by.as_str()),
        );
    }
    if let Some(severity) = &update.severity {
        block = block.block(
            Block::new("severity")
                .attr_opt("label", severity.label.map(|label| label.as_str()))
                .attr_opt("product", severity.product),
        );
    }
    if !update.types.is_empty() {
        block = block.attr(
            "types",
            Value::List(
                update
                    .types
                    .iter()
                    .map(|t| Value::String(t.clone()))
                    .collect(),
            ),
        );
    }
    if !update.user_defined_fields.is_empty() {
        block = block.attr("user_defined_fields", &update.user_defined_fields);
    }
    block = block.attr_opt(
        "verification_state",
        update.verification_state.map(|state| state.as_str()),
    );
    if let Some(workflow) = &update.workflow {
        block = block.block(Block::new("workflow").attr("status", workflow.status.as_str()));
    }
    block
}

fn criteria_block(criteria: &Criteria) -> Block {
    use crate::model::FilterCriterion;

    let mut block = Block::new("criteria");
    for (field, filters) in criteria.entries() {
        for filter in filters {
            let child = match filter {
                FilterCriterion::String(f) => Block::new(field)
                    .attr("comparison", f.comparison.as_str())
                    .attr("value", f.value),
                FilterCriterion::Number(f) => Block::new(field)
                    .attr_opt("eq", f.eq)
                    .attr_opt("gte", f.gte)
                    .attr_opt("lte", f.lte),
                FilterCriterion::Date(f) => {
                    let mut date = Block::new(field)
                        .attr_opt("end", f.end)
                        .attr_opt("start", f.start);
                    if let Some(range) = f.date_range {
                        date = date.block(
                            Block::new("date_range")
                                .attr("unit", range.unit.as_str())
                                .attr("value", range.value),
                        );
                    }
                    date
                }
                FilterCriterion::Map(f) => Block::new(field)
                    .attr("comparison", f.comparison.as_str())
                    .attr("key", f.key)
                    .attr("value", f.value),
            };
            block = block.block(child);
        }
    }
    block
}
