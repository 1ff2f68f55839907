use crate::model::{
    ActionType, DateFilter, FilterCriterion, FindingFieldsUpdate, NumberFilter, RuleConfig,
    RESOURCE_TYPE,
};
use crate::scenario::{Scenario, Step};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub const MAX_RULE_ORDER: i32 = 1000;
pub const MAX_FILTERS_PER_FIELD: usize = 20;
const MAX_DESCRIPTION_LEN: usize = 1024;
const MAX_RULE_NAME_LEN: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub location: Option<String>,
    pub message: String,
}

impl Diagnostic {
    fn error(location: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            location,
            message: message.into(),
        }
    }

    fn warning(location: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            location,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.level, DiagnosticLevel::Error)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warn",
        };
        match &self.location {
            Some(location) => write!(f, "[{level}] {location}: {}", self.message),
            None => write!(f, "[{level}] {}", self.message),
        }
    }
}

pub fn validate_rule(config: &RuleConfig) -> Vec<Diagnostic> {
    let mut ctx = ValidationContext::new();
    validate_top_level(config, &mut ctx);

    ctx.push("actions".to_string());
    if config.actions.len() != 1 {
        ctx.error(format!(
            "exactly one action is required, found {}",
            config.actions.len()
        ));
    }
    for (idx, action) in config.actions.iter().enumerate() {
        ctx.push(format!("{idx}"));
        match (action.action_type, &action.finding_fields_update) {
            (ActionType::FindingFieldsUpdate, Some(update)) => {
                ctx.push("finding_fields_update".to_string());
                validate_finding_fields_update(update, &mut ctx);
                ctx.pop();
            }
            (ActionType::FindingFieldsUpdate, None) => {
                ctx.error("FINDING_FIELDS_UPDATE requires a finding_fields_update block");
            }
        }
        ctx.pop();
    }
    ctx.pop();

    ctx.push("criteria".to_string());
    let entries = config.criteria.entries();
    if entries.is_empty() {
        ctx.error("criteria must contain at least one filter");
    }
    for (field, filters) in entries {
        ctx.push(field.to_string());
        if filters.len() > MAX_FILTERS_PER_FIELD {
            ctx.error(format!(
                "at most {MAX_FILTERS_PER_FIELD} filters are allowed, found {}",
                filters.len()
            ));
        }
        for (idx, filter) in filters.iter().enumerate() {
            ctx.push(format!("{idx}"));
            validate_filter(filter, &mut ctx);
            ctx.pop();
        }
        ctx.pop();
    }
    ctx.pop();

    ctx.push("tags".to_string());
    for key in config.tags.keys() {
        if key.trim().is_empty() {
            ctx.error("tag keys cannot be empty");
        }
        if key.starts_with("aws:") {
            ctx.error(format!("tag key '{key}' uses the reserved 'aws:' prefix"));
        }
    }
    ctx.pop();

    ctx.finish()
}

/// Scenario-level checks plus every apply step's rule diagnostics, located by step.
pub fn validate_scenario(scenario: &Scenario) -> Vec<Diagnostic> {
    let mut ctx = ValidationContext::new();

    if scenario.name.trim().is_empty() {
        ctx.push("name".to_string());
        ctx.error("scenario name cannot be empty");
        ctx.pop();
    }
    if !is_identifier(&scenario.resource_name) {
        ctx.push("resource_name".to_string());
        ctx.error(format!(
            "'{}' is not a valid resource name",
            scenario.resource_name
        ));
        ctx.pop();
    }
    if scenario.steps.is_empty() {
        ctx.error("scenario has no steps");
    }

    let mut applied = false;
    for (idx, step) in scenario.steps.iter().enumerate() {
        ctx.push(format!("step {}", idx + 1));
        match step {
            Step::Apply(apply) => {
                applied = true;
                ctx.extend(validate_rule(&apply.config));
                let disappears = apply
                    .checks
                    .iter()
                    .any(|check| matches!(check, crate::check::Check::Disappears));
                if disappears && !apply.expect_non_empty_plan {
                    ctx.warning("a disappears check leaves drift; set expect_non_empty_plan");
                }
            }
            Step::Import(_) if !applied => {
                ctx.error("import requires an earlier apply step");
            }
            Step::Import(_) => {}
        }
        ctx.pop();
    }

    ctx.finish()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

struct ValidationContext {
    stack: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl ValidationContext {
    fn new() -> Self {
        Self {
            stack: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn push(&mut self, label: String) {
        self.stack.push(label);
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    fn location(&self) -> Option<String> {
        if self.stack.is_empty() {
            None
        } else {
            Some(self.stack.join("."))
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        let diag = Diagnostic::error(self.location(), message);
        self.diagnostics.push(diag);
    }

    fn warning(&mut self, message: impl Into<String>) {
        let diag = Diagnostic::warning(self.location(), message);
        self.diagnostics.push(diag);
    }

    /// Re-roots diagnostics produced elsewhere under the current location.
    fn extend(&mut self, diagnostics: Vec<Diagnostic>) {
        let outer = self.location();
        for mut diag in diagnostics {
            diag.location = match (&outer, diag.location.take()) {
                (Some(outer), Some(inner)) => Some(format!("{outer}.{inner}")),
                (Some(outer), None) => Some(outer.clone()),
                (None, inner) => inner,
            };
            self.diagnostics.push(diag);
        }
    }

    fn finish(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

fn validate_top_level(config: &RuleConfig, ctx: &mut ValidationContext) {
    if config.rule_name.trim().is_empty() {
        ctx.error("rule_name cannot be empty");
    } else if config.rule_name.len() > MAX_RULE_NAME_LEN {
        ctx.error(format!(
            "rule_name must be at most {MAX_RULE_NAME_LEN} characters"
        ));
    }

    if config.description.trim().is_empty() {
        ctx.error("description cannot be empty");
    } else if config.description.len() > MAX_DESCRIPTION_LEN {
        ctx.error(format!(
            "description must be at most {MAX_DESCRIPTION_LEN} characters"
        ));
    }

    if !(1..=MAX_RULE_ORDER).contains(&config.rule_order) {
        ctx.error(format!(
            "rule_order must be between 1 and {MAX_RULE_ORDER}, found {}",
            config.rule_order
        ));
    }
}

fn validate_finding_fields_update(update: &FindingFieldsUpdate, ctx: &mut ValidationContext) {
    if update == &FindingFieldsUpdate::default() {
        ctx.warning("finding_fields_update does not change any field");
    }
    if let Some(confidence) = update.confidence {
        if !(0..=100).contains(&confidence) {
            ctx.error(format!("confidence must be between 0 and 100, found {confidence}"));
        }
    }
    if let Some(criticality) = update.criticality {
        if !(0..=100).contains(&criticality) {
            ctx.error(format!(
                "criticality must be between 0 and 100, found {criticality}"
            ));
        }
    }
    if let Some(note) = &update.note {
        if note.text.trim().is_empty() || note.updated_by.trim().is_empty() {
            ctx.error("note requires both text and updated_by");
        }
    }
    if let Some(severity) = &update.severity {
        if severity.label.is_none() && severity.product.is_none() {
            ctx.warning("severity block sets neither label nor product");
        }
        if let Some(product) = severity.product {
            if !(0.0..=100.0).contains(&product) {
                ctx.error(format!(
                    "severity product must be between 0 and 100, found {product}"
                ));
            }
        }
    }
    for finding_type in &update.types {
        if finding_type.trim().is_empty() {
            ctx.error("finding types cannot contain empty entries");
        }
    }
}

fn validate_filter(filter: &FilterCriterion, ctx: &mut ValidationContext) {
    match filter {
        FilterCriterion::String(string) => {
            if string.value.is_empty() {
                ctx.error("string filter value cannot be empty");
            }
        }
        FilterCriterion::Number(number) => validate_number_filter(number, ctx),
        FilterCriterion::Date(date) => validate_date_filter(date, ctx),
        FilterCriterion::Map(map) => {
            if map.key.is_empty() {
                ctx.error("map filter key cannot be empty");
            }
            if map.value.is_empty() {
                ctx.error("map filter value cannot be empty");
            }
        }
    }
}

fn validate_number_filter(filter: &NumberFilter, ctx: &mut ValidationContext) {
    if filter.is_empty() {
        ctx.error("number filter must set at least one of eq, gte or lte");
        return;
    }
    if filter.eq.is_some() && (filter.gte.is_some() || filter.lte.is_some()) {
        ctx.warning("eq is combined with a range bound; the range is redundant");
    }
    if let (Some(gte), Some(lte)) = (filter.gte, filter.lte) {
        if gte > lte {
            ctx.error(format!("gte ({gte}) is greater than lte ({lte})"));
        }
    }
}

fn validate_date_filter(filter: &DateFilter, ctx: &mut ValidationContext) {
    match (filter.is_absolute(), &filter.date_range) {
        (true, Some(_)) => {
            ctx.error("date filter cannot combine start/end with date_range");
        }
        (false, None) => {
            ctx.error("date filter must set either start/end or date_range");
        }
        (false, Some(range)) => {
            if range.value <= 0 {
                ctx.error(format!(
                    "date_range value must be positive, found {}",
                    range.value
                ));
            }
        }
        (true, None) => {
            let start = filter.start.as_deref().map(|raw| parse_timestamp("start", raw, ctx));
            let end = filter.end.as_deref().map(|raw| parse_timestamp("end", raw, ctx));
            match (start, end) {
                (Some(Some(start)), Some(Some(end))) if start > end => {
                    ctx.error("start must not be after end");
                }
                (Some(_), None) | (None, Some(_)) => {
                    ctx.warning("absolute date filter sets only one bound");
                }
                _ => {}
            }
        }
    }
}

fn parse_timestamp(field: &str, raw: &str, ctx: &mut ValidationContext) -> Option<OffsetDateTime> {
    match OffsetDateTime::parse(raw, &Rfc3339) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            ctx.error(format!("{field} '{raw}' is not an RFC 3339 timestamp: {err}"));
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub path: String,
    pub kind: String,
    pub required: bool,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub type_name: String,
    pub version: String,
    pub generated_at: String,
    pub attributes: Vec<AttributeSchema>,
}

struct AttributeDef {
    path: &'static str,
    kind: &'static str,
    required: bool,
    description: &'static str,
}

const SCHEMA_VERSION: &str = "1.0.0";

const RULE_ATTRIBUTES: &[AttributeDef] = &[
    AttributeDef {
        path: "arn",
        kind: "string (computed)",
        required: false,
        description: "Identifier assigned by the service",
    },
    AttributeDef {
        path: "rule_name",
        kind: "string",
        required: true,
        description: "Name of the rule",
    },
    AttributeDef {
        path: "description",
        kind: "string",
        required: true,
        description: "Description of the rule",
    },
    AttributeDef {
        path: "rule_order",
        kind: "number (1-1000)",
        required: true,
        description: "Order in which rules are applied",
    },
    AttributeDef {
        path: "rule_status",
        kind: "ENABLED | DISABLED",
        required: false,
        description: "Whether the rule is active",
    },
    AttributeDef {
        path: "is_terminal",
        kind: "bool",
        required: false,
        description: "Stop evaluating later rules when this one matches",
    },
    AttributeDef {
        path: "actions",
        kind: "block list (1)",
        required: true,
        description: "Action applied to matching findings",
    },
    AttributeDef {
        path: "actions.finding_fields_update",
        kind: "block",
        required: false,
        description: "Finding fields to overwrite",
    },
    AttributeDef {
        path: "criteria",
        kind: "block (1)",
        required: true,
        description: "Filters selecting findings, combined with AND",
    },
    AttributeDef {
        path: "criteria.<string field>",
        kind: "block list {comparison, value}",
        required: false,
        description: "aws_account_id, product_name, resource_type, severity_label, title",
    },
    AttributeDef {
        path: "criteria.<number field>",
        kind: "block list {eq, gte, lte}",
        required: false,
        description: "confidence, criticality",
    },
    AttributeDef {
        path: "criteria.<date field>",
        kind: "block list {start, end} | {date_range {unit, value}}",
        required: false,
        description: "created_at, updated_at",
    },
    AttributeDef {
        path: "criteria.<map field>",
        kind: "block list {comparison, key, value}",
        required: false,
        description: "resource_details_other, resource_tags, user_defined_fields",
    },
    AttributeDef {
        path: "tags",
        kind: "map(string)",
        required: false,
        description: "Resource tags",
    },
    AttributeDef {
        path: "tags_all",
        kind: "map(string) (computed)",
        required: false,
        description: "Resource tags merged with default tags",
    },
];

pub fn rule_schema() -> ResourceSchema {
    ResourceSchema {
        type_name: RESOURCE_TYPE.to_string(),
        version: SCHEMA_VERSION.to_string(),
        generated_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string()),
        attributes: RULE_ATTRIBUTES
            .iter()
            .map(|def| AttributeSchema {
                path: def.path.to_string(),
                kind: def.kind.to_string(),
                required: def.required,
                description: def.description.to_string(),
            })
            .collect(),
    }
}
