use crate::check::Check;
use crate::config::{ConfigError, RuleConfigBuilder};
use crate::model::{
    DateField, DateFilter, DateRangeUnit, FindingFieldsUpdate, MapComparison, MapField,
    NumberField, NumberFilter, RuleConfig, Severity, SeverityLabel, StringComparison, StringField,
};
use crate::scenario::Scenario;
use crate::settings::HarnessConfig;
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};

pub const BUILTIN_NAMES: &[&str] = &[
    "basic",
    "disappears",
    "string_filters",
    "number_filters",
    "date_filters",
    "map_filters",
    "tags",
];

const DESCRIPTION: &str = "test description";
const ACCOUNT_ID: &str = "1234567890";

/// Builds a named scenario with a fresh random rule name.
pub fn builtin_scenario(
    name: &str,
    settings: &HarnessConfig,
) -> Result<Option<Scenario>, ConfigError> {
    let rule_name = settings.random_name();
    let scenario = match name {
        "basic" => basic(&rule_name)?,
        "disappears" => disappears(&rule_name)?,
        "string_filters" => string_filters(&rule_name)?,
        "number_filters" => number_filters(&rule_name)?,
        "date_filters" => date_filters(&rule_name)?,
        "map_filters" => map_filters(&rule_name)?,
        "tags" => tags(&rule_name)?,
        _ => return Ok(None),
    };
    Ok(Some(scenario))
}

pub fn builtin_scenarios(settings: &HarnessConfig) -> Result<Vec<Scenario>, ConfigError> {
    let mut scenarios = Vec::with_capacity(BUILTIN_NAMES.len());
    for name in BUILTIN_NAMES {
        if let Some(scenario) = builtin_scenario(name, settings)? {
            scenarios.push(scenario);
        }
    }
    Ok(scenarios)
}

fn user_defined_update() -> FindingFieldsUpdate {
    let mut update = FindingFieldsUpdate::default();
    update
        .user_defined_fields
        .insert("key".to_string(), "value".to_string());
    update
}

/// Common shape: description, order 1 and a user-defined-fields action.
fn base(rule_name: &str) -> RuleConfigBuilder {
    RuleConfigBuilder::new(rule_name)
        .description(DESCRIPTION)
        .rule_order(1)
        .finding_fields_update(user_defined_update())
}

fn basic_builder(rule_name: &str) -> RuleConfigBuilder {
    let mut update = user_defined_update();
    update.severity = Some(Severity {
        label: Some(SeverityLabel::Low),
        product: Some(0.0),
    });
    update.types =
        vec!["Software and Configuration Checks/Industry and Regulatory Standards".to_string()];

    RuleConfigBuilder::new(rule_name)
        .description(DESCRIPTION)
        .rule_order(1)
        .finding_fields_update(update)
        .string_filter(StringField::AwsAccountId, StringComparison::Equals, ACCOUNT_ID)
}

fn basic(rule_name: &str) -> Result<Scenario, ConfigError> {
    Ok(Scenario::new("basic")
        .apply(
            basic_builder(rule_name).build()?,
            vec![
                Check::Exists,
                Check::attr("rule_name", rule_name),
                Check::attr("actions.0.finding_fields_update.0.severity.0.label", "LOW"),
            ],
        )
        .import_verify())
}

fn disappears(rule_name: &str) -> Result<Scenario, ConfigError> {
    Ok(Scenario::new("disappears").apply_expecting_drift(
        basic_builder(rule_name).build()?,
        vec![Check::Exists, Check::Disappears],
    ))
}

fn string_filter_step(
    rule_name: &str,
    comparison: StringComparison,
    value: &str,
) -> Result<(RuleConfig, Vec<Check>), ConfigError> {
    let config = base(rule_name)
        .string_filter(StringField::AwsAccountId, comparison, value)
        .build()?;
    let checks = vec![
        Check::Exists,
        Check::attr("criteria.0.aws_account_id.#", "1"),
        Check::attr("criteria.0.aws_account_id.0.comparison", comparison.as_str()),
        Check::attr("criteria.0.aws_account_id.0.value", value),
    ];
    Ok((config, checks))
}

fn string_filters(rule_name: &str) -> Result<Scenario, ConfigError> {
    let (first, first_checks) =
        string_filter_step(rule_name, StringComparison::Equals, ACCOUNT_ID)?;
    let (second, second_checks) =
        string_filter_step(rule_name, StringComparison::Contains, "0987654321")?;

    Ok(Scenario::new("string_filters")
        .apply(first, first_checks)
        .import_verify()
        .apply(second, second_checks))
}

fn number_filters(rule_name: &str) -> Result<Scenario, ConfigError> {
    let first = base(rule_name)
        .number_filter(NumberField::Confidence, NumberFilter::eq(5.0))
        .build()?;
    let second = base(rule_name)
        .number_filter(NumberField::Confidence, NumberFilter::lte(50.0))
        .build()?;

    Ok(Scenario::new("number_filters")
        .apply(
            first,
            vec![
                Check::Exists,
                Check::attr("criteria.0.confidence.#", "1"),
                Check::attr("criteria.0.confidence.0.eq", "5"),
            ],
        )
        .import_verify()
        .apply(
            second,
            vec![
                Check::Exists,
                Check::attr("criteria.0.confidence.#", "1"),
                Check::attr("criteria.0.confidence.0.lte", "50"),
                Check::absent("criteria.0.confidence.0.eq"),
            ],
        ))
}

fn date_filters(rule_name: &str) -> Result<Scenario, ConfigError> {
    let now = OffsetDateTime::now_utc()
        .replace_nanosecond(0)
        .map_err(|err| ConfigError::Timestamp(err.to_string()))?;
    let format = |value: OffsetDateTime| {
        value
            .format(&Rfc3339)
            .map_err(|err| ConfigError::Timestamp(err.to_string()))
    };
    let start = format(now)?;
    let end = format(now + Duration::minutes(5))?;

    let absolute = base(rule_name)
        .date_filter(DateField::CreatedAt, DateFilter::absolute(&start, &end))
        .build()?;
    let relative = base(rule_name)
        .date_filter(
            DateField::CreatedAt,
            DateFilter::relative(DateRangeUnit::Days, 10),
        )
        .build()?;

    Ok(Scenario::new("date_filters")
        .apply(
            absolute,
            vec![
                Check::Exists,
                Check::attr("criteria.0.created_at.#", "1"),
                Check::attr("criteria.0.created_at.0.end", end),
                Check::attr("criteria.0.created_at.0.start", start),
            ],
        )
        .import_verify()
        .apply(
            relative,
            vec![
                Check::Exists,
                Check::attr("criteria.0.created_at.#", "1"),
                Check::attr("criteria.0.created_at.0.date_range.#", "1"),
                Check::attr("criteria.0.created_at.0.date_range.0.unit", "DAYS"),
                Check::attr("criteria.0.created_at.0.date_range.0.value", "10"),
                Check::absent("criteria.0.created_at.0.start"),
            ],
        ))
}

fn map_filter_checks(comparison: MapComparison, key: &str, value: &str) -> Vec<Check> {
    vec![
        Check::Exists,
        Check::attr("criteria.0.resource_details_other.#", "1"),
        Check::attr(
            "criteria.0.resource_details_other.0.comparison",
            comparison.as_str(),
        ),
        Check::attr("criteria.0.resource_details_other.0.key", key),
        Check::attr("criteria.0.resource_details_other.0.value", value),
    ]
}

fn map_filters(rule_name: &str) -> Result<Scenario, ConfigError> {
    let first = base(rule_name)
        .map_filter(
            MapField::ResourceDetailsOther,
            MapComparison::Equals,
            "key1",
            "value1",
        )
        .build()?;
    let second = base(rule_name)
        .map_filter(
            MapField::ResourceDetailsOther,
            MapComparison::Contains,
            "key2",
            "value2",
        )
        .build()?;

    Ok(Scenario::new("map_filters")
        .apply(first, map_filter_checks(MapComparison::Equals, "key1", "value1"))
        .import_verify()
        .apply(
            second,
            map_filter_checks(MapComparison::Contains, "key2", "value2"),
        ))
}

fn tagged(rule_name: &str, tags: &[(&str, &str)]) -> Result<RuleConfig, ConfigError> {
    let mut builder = base(rule_name).string_filter(
        StringField::AwsAccountId,
        StringComparison::Equals,
        ACCOUNT_ID,
    );
    for (key, value) in tags {
        builder = builder.tag(*key, *value);
    }
    builder.build()
}

fn tags(rule_name: &str) -> Result<Scenario, ConfigError> {
    Ok(Scenario::new("tags")
        .apply(
            tagged(rule_name, &[("key1", "value1")])?,
            vec![
                Check::Exists,
                Check::attr("tags.%", "1"),
                Check::attr("tags.key1", "value1"),
            ],
        )
        .import_verify()
        .apply(
            tagged(rule_name, &[("key1", "value1updated"), ("key2", "value2")])?,
            vec![
                Check::Exists,
                Check::attr("tags.%", "2"),
                Check::attr("tags.key1", "value1updated"),
                Check::attr("tags.key2", "value2"),
            ],
        )
        .apply(
            tagged(rule_name, &[("key1", "value1")])?,
            vec![
                Check::Exists,
                Check::attr("tags.%", "1"),
                Check::attr("tags.key1", "value1"),
                Check::absent("tags.key2"),
            ],
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, InMemoryBackend, Operation, RuleBackend};
    use crate::runtime::{Executor, Phase, ScenarioStatus};
    use std::sync::Arc;

    fn run(name: &str) -> (Arc<InMemoryBackend>, crate::runtime::ExecutionOutcome) {
        let settings = HarnessConfig::default();
        let backend = Arc::new(InMemoryBackend::new(&settings));
        let scenario = builtin_scenario(name, &settings)
            .expect("valid config")
            .expect("known scenario");
        let executor = Executor::new(backend.clone(), settings);
        let outcome = executor.execute(&scenario);
        (backend, outcome)
    }

    fn assert_destroyed(backend: &InMemoryBackend, created: &[String]) {
        assert!(backend.is_empty());
        for arn in created {
            let err = backend.find_by_arn(arn).expect_err("destroyed");
            assert!(err.is_not_found());
        }
    }

    #[test]
    fn every_builtin_scenario_passes_and_cleans_up() {
        for name in BUILTIN_NAMES {
            let (backend, outcome) = run(name);
            assert_eq!(
                outcome.status,
                ScenarioStatus::Passed,
                "{name}: {:?}",
                outcome.failure
            );
            assert_eq!(outcome.created.len(), 1, "{name} updates in place");
            assert_eq!(outcome.phases.last(), Some(&Phase::Destroyed));
            assert_destroyed(&backend, &outcome.created);
        }
    }

    #[test]
    fn tags_scenario_walks_three_tag_sets() {
        let (_, outcome) = run("tags");
        assert_eq!(outcome.report.steps.len(), 4);
        assert!(outcome.phases.contains(&Phase::Imported(2)));
        assert!(outcome.phases.contains(&Phase::Verified(4)));
    }

    #[test]
    fn disappears_scenario_recreates_nothing() {
        let (backend, outcome) = run("disappears");
        assert!(outcome.passed());
        assert!(backend.is_empty());
        assert_eq!(outcome.report.steps.len(), 1);
    }

    #[test]
    fn unknown_names_return_none() {
        let settings = HarnessConfig::default();
        assert!(builtin_scenario("nope", &settings)
            .expect("no config built")
            .is_none());
        assert_eq!(
            builtin_scenarios(&settings).expect("valid configs").len(),
            BUILTIN_NAMES.len()
        );
    }

    #[test]
    fn unsupported_region_skips_scenario() {
        let settings = HarnessConfig::default();
        let backend = Arc::new(InMemoryBackend::new(&settings));
        backend.inject_failure(
            Operation::Create,
            BackendError::api("InvalidAccessException", "not subscribed"),
        );
        let scenario = builtin_scenario("basic", &settings)
            .expect("valid config")
            .expect("known scenario");
        let outcome = Executor::new(backend.clone(), settings).execute(&scenario);
        assert_eq!(outcome.status, ScenarioStatus::Skipped);
        assert!(backend.is_empty());
    }

    #[test]
    fn whole_suite_runs_concurrently() {
        let settings = HarnessConfig::default();
        let backend = Arc::new(InMemoryBackend::new(&settings));
        let scenarios = builtin_scenarios(&settings).expect("valid configs");
        let executor = Executor::new(backend.clone(), settings);

        let outcomes = executor.run_concurrently(&scenarios);
        assert!(outcomes.iter().all(|o| o.passed()));
        let created: Vec<String> = outcomes.iter().flat_map(|o| o.created.clone()).collect();
        assert_eq!(created.len(), BUILTIN_NAMES.len());
        assert_destroyed(&backend, &created);
    }
}
