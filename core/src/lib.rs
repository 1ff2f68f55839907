pub mod backend;
pub mod builtin;
pub mod check;
pub mod config;
pub mod document;
pub mod error;
pub mod model;
pub mod oracle;
pub mod report;
pub mod runtime;
pub mod scenario;
pub mod settings;
pub mod state;
pub mod validation;

pub use backend::{BackendError, InMemoryBackend, Operation, RuleBackend};
pub use builtin::{builtin_scenario, builtin_scenarios, BUILTIN_NAMES};
pub use check::{run_checks, Check, CheckContext};
pub use config::{render_config, resource_address, to_block, ConfigError, RuleConfigBuilder};
pub use document::{Block, Document, Value};
pub use error::HarnessError;
pub use model::{
    Action, ActionType, Criteria, DateField, DateFilter, DateRange, DateRangeUnit,
    FilterCriterion, FindingFieldsUpdate, MapComparison, MapField, MapFilter, Note, NumberField,
    NumberFilter, RemoteRule, RuleConfig, RuleStatus, Severity, SeverityLabel, StringComparison,
    StringField, StringFilter, VerificationState, Workflow, WorkflowStatus, RESOURCE_TYPE,
};
pub use oracle::{check_destroyed, check_exists};
pub use report::{junit_xml, render_attributes, render_summary, ReportError};
pub use runtime::{
    ExecutionOutcome, ExecutionReport, ExecutionStatus, Executor, Phase, ScenarioStatus,
    StepExecution, StepKind,
};
pub use scenario::{
    parse_scenario_json, resolve_scenario, substitute_variables, ApplyStep, ImportStep,
    ParseError, Scenario, ScenarioSummary, Step, StepSummary,
};
pub use settings::HarnessConfig;
pub use state::{
    diff_attributes, flatten_config, flatten_rule, AttributeDiff, Attributes, ResourceState,
    State,
};
pub use validation::{
    rule_schema, validate_rule, validate_scenario, AttributeSchema, Diagnostic, DiagnosticLevel,
    ResourceSchema,
};
