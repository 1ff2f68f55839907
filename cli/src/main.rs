use anyhow::{anyhow, Context};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use ruleharness_core::{
    builtin_scenario, builtin_scenarios, flatten_config, junit_xml, render_attributes,
    render_config, render_summary, resolve_scenario, rule_schema, validate_scenario, Diagnostic,
    DiagnosticLevel, ExecutionOutcome, Executor, HarnessConfig, InMemoryBackend, Scenario,
    ScenarioStatus, Step, BUILTIN_NAMES,
};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "RULEHARNESS_LOG";

#[derive(Debug, Parser)]
#[command(author, version, about = "Acceptance-test harness for Security Hub automation rules")]
struct HarnessCli {
    #[command(flatten)]
    settings: SettingsArgs,
    #[command(subcommand)]
    command: Command,
}

/// Overrides applied on top of the environment.
#[derive(Debug, Args)]
struct SettingsArgs {
    /// Region used in generated ARNs
    #[arg(long, global = true)]
    region: Option<String>,
    /// Account id used in generated ARNs
    #[arg(long, global = true)]
    account_id: Option<String>,
    /// Prefix for random rule names
    #[arg(long, global = true)]
    resource_prefix: Option<String>,
    /// Provider-level default tag (format: key=value). Repeat for multiple tags.
    #[arg(long = "default-tag", global = true, value_parser = parse_key_val, value_name = "KEY=VALUE", action = ArgAction::Append)]
    default_tags: Vec<(String, String)>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a scenario file and print its steps
    Plan {
        /// Path to a YAML or JSON scenario file
        input: PathBuf,
        /// Output JSON instead of a human-readable summary
        #[arg(long)]
        json: bool,
        /// Override a variable (format: key=value). Repeat for multiple overrides.
        #[arg(long = "var", value_parser = parse_key_val, value_name = "KEY=VALUE", action = ArgAction::Append)]
        vars: Vec<(String, String)>,
    },
    /// Print the configuration document of each apply step
    Render {
        /// Path to a YAML or JSON scenario file
        input: PathBuf,
        /// Only render this step (1-based)
        #[arg(long)]
        step: Option<usize>,
        /// Also print the flattened attribute view
        #[arg(long)]
        attributes: bool,
        /// Override a variable (format: key=value). Repeat for multiple overrides.
        #[arg(long = "var", value_parser = parse_key_val, value_name = "KEY=VALUE", action = ArgAction::Append)]
        vars: Vec<(String, String)>,
    },
    /// Run a scenario file against the in-memory backend
    Run {
        /// Path to a YAML or JSON scenario file
        input: PathBuf,
        /// Output JSON instead of a human-readable report
        #[arg(long)]
        json: bool,
        /// Write a JUnit XML report to this path
        #[arg(long)]
        junit: Option<PathBuf>,
        /// Override a variable (format: key=value). Repeat for multiple overrides.
        #[arg(long = "var", value_parser = parse_key_val, value_name = "KEY=VALUE", action = ArgAction::Append)]
        vars: Vec<(String, String)>,
    },
    /// Run the built-in scenarios
    Suite {
        /// Scenario names to run; all when omitted
        names: Vec<String>,
        /// Output JSON instead of a human-readable report
        #[arg(long)]
        json: bool,
        /// Write a JUnit XML report to this path
        #[arg(long)]
        junit: Option<PathBuf>,
        /// Run scenarios one after another instead of concurrently
        #[arg(long)]
        sequential: bool,
    },
    /// Export the automation rule resource schema
    Schema {
        /// Output format
        #[arg(long, default_value_t = SchemaFormat::Json)]
        format: SchemaFormat,
    },
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = HarnessCli::parse();
    let settings = cli.settings.resolve();
    debug!(region = %settings.region, account_id = %settings.account_id, "resolved settings");

    match cli.command {
        Command::Plan { input, json, vars } => {
            let scenario = load_scenario(&input, &settings, vars)?;
            let diagnostics = validate_scenario(&scenario);
            let has_errors = output_plan(&scenario, &diagnostics, json)?;
            if has_errors {
                anyhow::bail!("validation failed");
            }
        }
        Command::Render {
            input,
            step,
            attributes,
            vars,
        } => {
            let scenario = load_scenario(&input, &settings, vars)?;
            output_render(&scenario, step, attributes)?;
        }
        Command::Run {
            input,
            json,
            junit,
            vars,
        } => {
            let scenario = load_scenario(&input, &settings, vars)?;
            let diagnostics = validate_scenario(&scenario);
            if diagnostics.iter().any(Diagnostic::is_error) {
                print_diagnostics(&diagnostics);
                anyhow::bail!("validation failed");
            }
            let executor = executor(settings);
            let outcome = executor.execute(&scenario);
            finish(vec![outcome], json, junit.as_deref())?;
        }
        Command::Suite {
            names,
            json,
            junit,
            sequential,
        } => {
            let scenarios = select_builtins(&names, &settings)?;
            info!(count = scenarios.len(), "running built-in suite");
            let executor = executor(settings);
            let outcomes = if sequential {
                scenarios
                    .iter()
                    .map(|scenario| executor.execute(scenario))
                    .collect()
            } else {
                executor.run_concurrently(&scenarios)
            };
            finish(outcomes, json, junit.as_deref())?;
        }
        Command::Schema { format } => {
            output_schema(format)?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

impl SettingsArgs {
    fn resolve(&self) -> HarnessConfig {
        let mut settings = HarnessConfig::from_env();
        if let Some(region) = &self.region {
            settings.region = region.clone();
        }
        if let Some(account_id) = &self.account_id {
            settings.account_id = account_id.clone();
        }
        if let Some(prefix) = &self.resource_prefix {
            settings.resource_prefix = prefix.clone();
        }
        settings
            .default_tags
            .extend(self.default_tags.iter().cloned());
        settings
    }
}

fn executor(settings: HarnessConfig) -> Executor {
    let backend = Arc::new(InMemoryBackend::new(&settings));
    Executor::new(backend, settings)
}

/// Reads a scenario file, then fills `${...}` placeholders in its string values.
fn load_scenario(
    path: &Path,
    settings: &HarnessConfig,
    vars: Vec<(String, String)>,
) -> anyhow::Result<Scenario> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut variables: HashMap<String, String> = vars.into_iter().collect();
    variables
        .entry("rule_name".to_string())
        .or_insert_with(|| settings.random_name());
    variables
        .entry("region".to_string())
        .or_insert_with(|| settings.region.clone());
    variables
        .entry("account_id".to_string())
        .or_insert_with(|| settings.account_id.clone());

    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    );
    let document: serde_json::Value = if is_yaml {
        serde_yaml::from_str(&source)
            .map_err(|err| anyhow!("{}: invalid scenario document: {err}", path.display()))?
    } else {
        serde_json::from_str(&source)
            .map_err(|err| anyhow!("{}: invalid scenario document: {err}", path.display()))?
    };
    let scenario = resolve_scenario(document, &variables)
        .map_err(|err| anyhow!("{}: {err}", path.display()))?;
    debug!(path = %path.display(), "loaded scenario");
    Ok(scenario)
}

fn select_builtins(names: &[String], settings: &HarnessConfig) -> anyhow::Result<Vec<Scenario>> {
    if names.is_empty() {
        return Ok(builtin_scenarios(settings)?);
    }

    let mut scenarios = Vec::with_capacity(names.len());
    for name in names {
        match builtin_scenario(name, settings)? {
            Some(scenario) => scenarios.push(scenario),
            None => anyhow::bail!(
                "unknown scenario '{name}' (expected one of: {})",
                BUILTIN_NAMES.join(", ")
            ),
        }
    }
    Ok(scenarios)
}

fn output_plan(scenario: &Scenario, diagnostics: &[Diagnostic], json: bool) -> anyhow::Result<bool> {
    let has_errors = diagnostics.iter().any(Diagnostic::is_error);
    let summary = scenario.summary();

    if json {
        let payload = json!({
            "summary": summary,
            "diagnostics": diagnostics,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_diagnostics(diagnostics);
        println!("{summary}");
    }

    Ok(has_errors)
}

fn output_render(scenario: &Scenario, only: Option<usize>, attributes: bool) -> anyhow::Result<()> {
    if let Some(index) = only {
        if index == 0 || index > scenario.steps.len() {
            anyhow::bail!(
                "step {index} is out of range (scenario has {} steps)",
                scenario.steps.len()
            );
        }
    }

    for (idx, step) in scenario.steps.iter().enumerate() {
        let number = idx + 1;
        if only.is_some_and(|wanted| wanted != number) {
            continue;
        }
        match step {
            Step::Apply(apply) => {
                println!("# step {number}");
                print!("{}", render_config(&scenario.resource_name, &apply.config));
                if attributes {
                    println!("{}", render_attributes(&flatten_config(&apply.config)));
                }
                println!();
            }
            Step::Import(_) => {
                println!("# step {number}: import {}\n", scenario.address());
            }
        }
    }

    Ok(())
}

fn finish(
    outcomes: Vec<ExecutionOutcome>,
    json: bool,
    junit: Option<&Path>,
) -> anyhow::Result<()> {
    if let Some(path) = junit {
        let xml = junit_xml(&outcomes)?;
        fs::write(path, xml).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote junit report");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            println!("Scenario: {}", outcome.scenario);
            println!("{}", outcome.report);
            for cleanup in &outcome.cleanup_errors {
                println!("[warn] cleanup: {cleanup}");
            }
        }
        println!("{}", render_summary(&outcomes));
    }

    let failed = outcomes
        .iter()
        .filter(|outcome| outcome.status == ScenarioStatus::Failed)
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} scenario(s) failed", outcomes.len());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SchemaFormat {
    Json,
    Yaml,
}

impl std::fmt::Display for SchemaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            SchemaFormat::Json => "json",
            SchemaFormat::Yaml => "yaml",
        };
        write!(f, "{value}")
    }
}

fn output_schema(format: SchemaFormat) -> anyhow::Result<()> {
    let schema = rule_schema();
    match format {
        SchemaFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        SchemaFormat::Yaml => {
            let yaml = serde_yaml::to_string(&schema)?;
            print!("{yaml}");
        }
    }
    Ok(())
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }

    println!("Diagnostics:");
    for diagnostic in diagnostics {
        let level = match diagnostic.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warn",
        };
        match &diagnostic.location {
            Some(location) => println!("  - [{level}] {location}: {}", diagnostic.message),
            None => println!("  - [{level}] {}", diagnostic.message),
        }
    }
    println!();
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].trim().is_empty() {
        return Err(format!("expected KEY=VALUE, got '{s}'"));
    }
    Ok((parts[0].trim().to_string(), parts[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs() {
        assert_eq!(
            parse_key_val("rule_name=tf-acc-test=1").expect("pair"),
            ("rule_name".to_string(), "tf-acc-test=1".to_string())
        );
        assert!(parse_key_val("=value").is_err());
        assert!(parse_key_val("novalue").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        HarnessCli::command().debug_assert();
    }

    #[test]
    fn loads_yaml_scenarios_with_generated_rule_name() {
        let dir = std::env::temp_dir().join(format!("ruleharness-cli-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("tags.yaml");
        fs::write(
            &path,
            r#"name: tags
steps:
  - kind: apply
    config:
      rule_name: ${rule_name}
      description: test description
      rule_order: 1
      actions:
        - type: FINDING_FIELDS_UPDATE
          finding_fields_update:
            user_defined_fields:
              key: value
      criteria:
        aws_account_id:
          - comparison: EQUALS
            value: "1234567890"
      tags:
        key1: value1
    checks:
      - check: attr_equals
        key: tags.%
        value: "1"
  - kind: import
"#,
        )
        .expect("write scenario");

        let settings = HarnessConfig::default();
        let scenario = load_scenario(&path, &settings, Vec::new()).expect("loaded");
        match &scenario.steps[0] {
            Step::Apply(apply) => assert!(apply.config.rule_name.starts_with("tf-acc-test-")),
            other => panic!("unexpected step {other:?}"),
        }
        assert!(validate_scenario(&scenario).is_empty());

        let outcome = executor(settings).execute(&scenario);
        assert_eq!(outcome.status, ScenarioStatus::Passed, "{:?}", outcome.failure);

        let pinned = load_scenario(
            &path,
            &HarnessConfig::default(),
            vec![("rule_name".to_string(), "pinned".to_string())],
        )
        .expect("loaded");
        match &pinned.steps[0] {
            Step::Apply(apply) => assert_eq!(apply.config.rule_name, "pinned"),
            other => panic!("unexpected step {other:?}"),
        }

        fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn variable_values_stay_inside_their_string() {
        let dir = std::env::temp_dir().join(format!("ruleharness-vars-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("basic.yaml");
        fs::write(
            &path,
            r#"name: basic
steps:
  - kind: apply
    config:
      rule_name: ${rule_name}
      description: "${description}"
      rule_order: 1
      actions:
        - type: FINDING_FIELDS_UPDATE
          finding_fields_update:
            user_defined_fields:
              key: value
      criteria:
        aws_account_id:
          - comparison: EQUALS
            value: ${account_id}
"#,
        )
        .expect("write scenario");

        let injected = "evil\n      is_terminal: true\n      rule_status: DISABLED";
        let scenario = load_scenario(
            &path,
            &HarnessConfig::default(),
            vec![
                ("rule_name".to_string(), injected.to_string()),
                ("description".to_string(), r#"say "hi""#.to_string()),
            ],
        )
        .expect("loaded");
        match &scenario.steps[0] {
            Step::Apply(apply) => {
                assert_eq!(apply.config.rule_name, injected);
                assert_eq!(apply.config.description, r#"say "hi""#);
                assert!(!apply.config.is_terminal);
                assert_eq!(apply.config.criteria.aws_account_id[0].value, "123456789012");
            }
            other => panic!("unexpected step {other:?}"),
        }

        fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn selects_builtins_by_name() {
        let settings = HarnessConfig::default();
        assert_eq!(
            select_builtins(&[], &settings).expect("all").len(),
            BUILTIN_NAMES.len()
        );
        let picked = select_builtins(&["tags".to_string()], &settings).expect("tags");
        assert_eq!(picked[0].name, "tags");
        assert!(select_builtins(&["bogus".to_string()], &settings).is_err());
    }
}
