use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const RESOURCE_TYPE: &str = "aws_securityhub_automation_rule";

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $(#[$meta])*
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(StringComparison {
    Equals => "EQUALS",
    Prefix => "PREFIX",
    NotEquals => "NOT_EQUALS",
    PrefixNotEquals => "PREFIX_NOT_EQUALS",
    Contains => "CONTAINS",
    NotContains => "NOT_CONTAINS",
});

wire_enum!(MapComparison {
    Equals => "EQUALS",
    NotEquals => "NOT_EQUALS",
    Contains => "CONTAINS",
    NotContains => "NOT_CONTAINS",
});

wire_enum!(DateRangeUnit {
    Days => "DAYS",
});

wire_enum!(#[derive(Default)] RuleStatus {
    #[default]
    Enabled => "ENABLED",
    Disabled => "DISABLED",
});

wire_enum!(ActionType {
    FindingFieldsUpdate => "FINDING_FIELDS_UPDATE",
});

wire_enum!(SeverityLabel {
    Informational => "INFORMATIONAL",
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Critical => "CRITICAL",
});

wire_enum!(WorkflowStatus {
    New => "NEW",
    Notified => "NOTIFIED",
    Resolved => "RESOLVED",
    Suppressed => "SUPPRESSED",
});

wire_enum!(VerificationState {
    Unknown => "UNKNOWN",
    TruePositive => "TRUE_POSITIVE",
    FalsePositive => "FALSE_POSITIVE",
    BenignPositive => "BENIGN_POSITIVE",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StringFilter {
    pub comparison: StringComparison,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NumberFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
}

impl NumberFilter {
    pub fn eq(value: f64) -> Self {
        Self {
            eq: Some(value),
            ..Self::default()
        }
    }

    pub fn gte(value: f64) -> Self {
        Self {
            gte: Some(value),
            ..Self::default()
        }
    }

    pub fn lte(value: f64) -> Self {
        Self {
            lte: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.eq.is_none() && self.gte.is_none() && self.lte.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DateRange {
    pub unit: DateRangeUnit,
    pub value: i32,
}

/// Either an absolute `start`/`end` window or a relative `date_range`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DateFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
}

impl DateFilter {
    pub fn absolute(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
            date_range: None,
        }
    }

    pub fn relative(unit: DateRangeUnit, value: i32) -> Self {
        Self {
            start: None,
            end: None,
            date_range: Some(DateRange { unit, value }),
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapFilter {
    pub comparison: MapComparison,
    pub key: String,
    pub value: String,
}

/// A single filter criterion, independent of the criteria field it sits under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterCriterion {
    String(StringFilter),
    Number(NumberFilter),
    Date(DateFilter),
    Map(MapFilter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringField {
    AwsAccountId,
    ProductName,
    ResourceType,
    SeverityLabel,
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberField {
    Confidence,
    Criticality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapField {
    ResourceDetailsOther,
    ResourceTags,
    UserDefinedFields,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Criteria {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aws_account_id: Vec<StringFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confidence: Vec<NumberFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_at: Vec<DateFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criticality: Vec<NumberFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub product_name: Vec<StringFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_details_other: Vec<MapFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_tags: Vec<MapFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_type: Vec<StringFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub severity_label: Vec<StringFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub title: Vec<StringFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated_at: Vec<DateFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_defined_fields: Vec<MapFilter>,
}

impl Criteria {
    pub fn strings_mut(&mut self, field: StringField) -> &mut Vec<StringFilter> {
        match field {
            StringField::AwsAccountId => &mut self.aws_account_id,
            StringField::ProductName => &mut self.product_name,
            StringField::ResourceType => &mut self.resource_type,
            StringField::SeverityLabel => &mut self.severity_label,
            StringField::Title => &mut self.title,
        }
    }

    pub fn numbers_mut(&mut self, field: NumberField) -> &mut Vec<NumberFilter> {
        match field {
            NumberField::Confidence => &mut self.confidence,
            NumberField::Criticality => &mut self.criticality,
        }
    }

    pub fn dates_mut(&mut self, field: DateField) -> &mut Vec<DateFilter> {
        match field {
            DateField::CreatedAt => &mut self.created_at,
            DateField::UpdatedAt => &mut self.updated_at,
        }
    }

    pub fn maps_mut(&mut self, field: MapField) -> &mut Vec<MapFilter> {
        match field {
            MapField::ResourceDetailsOther => &mut self.resource_details_other,
            MapField::ResourceTags => &mut self.resource_tags,
            MapField::UserDefinedFields => &mut self.user_defined_fields,
        }
    }

    /// Every populated field with its filters, in attribute-name order.
    pub fn entries(&self) -> Vec<(&'static str, Vec<FilterCriterion>)> {
        let all = vec![
            ("aws_account_id", wrap(&self.aws_account_id, FilterCriterion::String)),
            ("confidence", wrap(&self.confidence, FilterCriterion::Number)),
            ("created_at", wrap(&self.created_at, FilterCriterion::Date)),
            ("criticality", wrap(&self.criticality, FilterCriterion::Number)),
            ("product_name", wrap(&self.product_name, FilterCriterion::String)),
            (
                "resource_details_other",
                wrap(&self.resource_details_other, FilterCriterion::Map),
            ),
            ("resource_tags", wrap(&self.resource_tags, FilterCriterion::Map)),
            ("resource_type", wrap(&self.resource_type, FilterCriterion::String)),
            ("severity_label", wrap(&self.severity_label, FilterCriterion::String)),
            ("title", wrap(&self.title, FilterCriterion::String)),
            ("updated_at", wrap(&self.updated_at, FilterCriterion::Date)),
            (
                "user_defined_fields",
                wrap(&self.user_defined_fields, FilterCriterion::Map),
            ),
        ];

        all.into_iter()
            .filter(|(_, filters)| !filters.is_empty())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

fn wrap<T: Clone>(filters: &[T], variant: fn(T) -> FilterCriterion) -> Vec<FilterCriterion> {
    filters.iter().cloned().map(variant).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub text: String,
    pub updated_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Severity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<SeverityLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub status: WorkflowStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FindingFieldsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<Note>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user_defined_fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_state: Option<VerificationState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Workflow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finding_fields_update: Option<FindingFieldsUpdate>,
}

impl Action {
    pub fn finding_fields_update(update: FindingFieldsUpdate) -> Self {
        Self {
            action_type: ActionType::FindingFieldsUpdate,
            finding_fields_update: Some(update),
        }
    }
}

/// Desired configuration of one automation rule resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleConfig {
    pub rule_name: String,
    pub description: String,
    pub rule_order: i32,
    #[serde(default)]
    pub rule_status: RuleStatus,
    #[serde(default)]
    pub is_terminal: bool,
    pub actions: Vec<Action>,
    pub criteria: Criteria,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// What the remote service reports for a rule it holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteRule {
    pub arn: String,
    pub config: RuleConfig,
    pub tags_all: BTreeMap<String, String>,
    pub created_at: String,
    pub updated_at: String,
    pub created_by: String,
}
