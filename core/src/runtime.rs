use crate::backend::RuleBackend;
use crate::check::{run_checks, CheckContext};
use crate::error::HarnessError;
use crate::model::{RemoteRule, RuleConfig, RESOURCE_TYPE};
use crate::oracle;
use crate::scenario::{ApplyStep, ImportStep, Scenario, Step};
use crate::settings::HarnessConfig;
use crate::state::{diff_attributes, flatten_config, flatten_rule, ResourceState, State};
use crate::validation::{validate_rule, Diagnostic};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, error, info, info_span, warn};

pub struct Executor {
    backend: Arc<dyn RuleBackend>,
    settings: HarnessConfig,
}

/// Per-scenario bookkeeping threaded through the steps.
#[derive(Debug, Default)]
struct RunState {
    state: State,
    created: Vec<String>,
    phases: Vec<Phase>,
    steps: Vec<StepExecution>,
}

impl RunState {
    fn enter(&mut self, phase: Phase) {
        debug!(phase = %phase, "scenario phase");
        self.phases.push(phase);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PlanAction {
    NoOp,
    Create,
    Update(Vec<String>),
}

impl PlanAction {
    fn changes(&self) -> Vec<String> {
        match self {
            PlanAction::NoOp => Vec::new(),
            PlanAction::Create => vec!["create".to_string()],
            PlanAction::Update(keys) => keys.iter().map(|key| format!("update {key}")).collect(),
        }
    }
}

impl Executor {
    pub fn new(backend: Arc<dyn RuleBackend>, settings: HarnessConfig) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &HarnessConfig {
        &self.settings
    }

    pub fn execute(&self, scenario: &Scenario) -> ExecutionOutcome {
        let span = info_span!("scenario", name = %scenario.name);
        let _entered = span.enter();
        info!(steps = scenario.steps.len(), "starting scenario");

        let mut run = RunState::default();
        run.enter(Phase::Init);

        let result = self.execute_steps(scenario, &mut run);
        // Teardown runs whatever happened above.
        let cleanup_errors = self.teardown(&mut run);

        let (status, failure) = match (&result, cleanup_errors.first()) {
            (Ok(()), None) => (ScenarioStatus::Passed, None),
            (Ok(()), Some(cleanup)) => (ScenarioStatus::Failed, Some(cleanup.clone())),
            (Err(err), cleanup) => match err.api_code() {
                // A leaked resource always fails the run, even on a skippable error.
                Some(code) if self.settings.is_skippable(code) && cleanup.is_none() => {
                    warn!(code, "skipping scenario on unsupported API response");
                    (ScenarioStatus::Skipped, Some(err.to_string()))
                }
                _ => (ScenarioStatus::Failed, Some(err.to_string())),
            },
        };

        match status {
            ScenarioStatus::Passed => info!("scenario passed"),
            ScenarioStatus::Skipped => info!("scenario skipped"),
            ScenarioStatus::Failed => error!(
                failure = failure.as_deref().unwrap_or_default(),
                "scenario failed"
            ),
        }

        let RunState {
            created,
            phases,
            steps,
            ..
        } = run;
        let (steps, teardown): (Vec<_>, Vec<_>) = steps
            .into_iter()
            .partition(|step| step.kind != StepKind::Teardown && step.kind != StepKind::DestroyCheck);

        ExecutionOutcome {
            scenario: scenario.name.clone(),
            status,
            failure,
            cleanup_errors,
            created,
            phases,
            report: ExecutionReport { steps, teardown },
        }
    }

    /// Runs scenarios on their own threads against the shared backend.
    pub fn run_concurrently(&self, scenarios: &[Scenario]) -> Vec<ExecutionOutcome> {
        thread::scope(|scope| {
            let handles: Vec<_> = scenarios
                .iter()
                .map(|scenario| scope.spawn(move || self.execute(scenario)))
                .collect();
            handles
                .into_iter()
                .zip(scenarios)
                .map(|(handle, scenario)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| ExecutionOutcome::panicked(&scenario.name))
                })
                .collect()
        })
    }

    fn execute_steps(&self, scenario: &Scenario, run: &mut RunState) -> Result<(), HarnessError> {
        let address = scenario.address();

        for (idx, step) in scenario.steps.iter().enumerate() {
            let number = idx + 1;
            let started_at = timestamp();
            let timer = Instant::now();

            let (kind, result) = match step {
                Step::Apply(apply) => (
                    StepKind::Apply,
                    self.process_apply(number, &address, apply, run),
                ),
                Step::Import(import) => (
                    StepKind::Import,
                    self.process_import(number, &address, import, run),
                ),
            };

            let name = format!("step {number}");
            let duration_ms = timer.elapsed().as_millis();
            match result {
                Ok(message) => {
                    run.steps.push(
                        StepExecution::completed(name, kind, Some(message))
                            .timed(started_at, duration_ms),
                    );
                }
                Err(err) => {
                    warn!(step = number, error = %err, "step failed");
                    run.steps.push(
                        StepExecution::failed(name, kind, Some(err.to_string()))
                            .timed(started_at, duration_ms),
                    );
                    for (rest_idx, rest) in scenario.steps.iter().enumerate().skip(idx + 1) {
                        let kind = match rest {
                            Step::Apply(_) => StepKind::Apply,
                            Step::Import(_) => StepKind::Import,
                        };
                        run.steps.push(StepExecution::skipped(
                            format!("step {}", rest_idx + 1),
                            kind,
                            Some("skipped after an earlier failure".to_string()),
                        ));
                    }
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    fn process_apply(
        &self,
        number: usize,
        address: &str,
        step: &ApplyStep,
        run: &mut RunState,
    ) -> Result<String, HarnessError> {
        let diagnostics = validate_rule(&step.config);
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Err(crate::config::ConfigError::Invalid(diagnostics).into());
        }

        let current = self.refresh(address, run)?;
        let planned = plan(&step.config, current.as_ref());
        debug!(step = number, plan = ?planned, "planned apply");

        let remote = match (&planned, current) {
            (PlanAction::Create, _) | (_, None) => {
                let created = self.backend.create(&step.config)?;
                run.created.push(created.arn.clone());
                created
            }
            (PlanAction::Update(_), Some(existing)) => {
                self.backend.update(&existing.arn, &step.config)?
            }
            (PlanAction::NoOp, Some(existing)) => existing,
        };
        store(&mut run.state, address, &remote);
        run.enter(Phase::Applied(number));

        oracle::check_exists(self.backend.as_ref(), &run.state, address)?;
        let ctx = CheckContext {
            backend: self.backend.as_ref(),
            state: &run.state,
            address,
        };
        let passed = run_checks(&step.checks, &ctx)?;
        run.enter(Phase::Verified(number));

        let refreshed = self.refresh(address, run)?;
        let post_plan = plan(&step.config, refreshed.as_ref());
        match (post_plan == PlanAction::NoOp, step.expect_non_empty_plan) {
            (true, true) => return Err(HarnessError::ExpectedNonEmptyPlan),
            (false, false) => {
                return Err(HarnessError::UnexpectedPlan {
                    changes: post_plan.changes(),
                })
            }
            _ => {}
        }

        Ok(format!(
            "{} {}; {} check(s) passed",
            match planned {
                PlanAction::Create => "created",
                PlanAction::Update(_) => "updated",
                PlanAction::NoOp => "unchanged",
            },
            remote.arn,
            passed
        ))
    }

    fn process_import(
        &self,
        number: usize,
        address: &str,
        step: &ImportStep,
        run: &mut RunState,
    ) -> Result<String, HarnessError> {
        let resource = run
            .state
            .get(address)
            .ok_or_else(|| HarnessError::NotInState(address.to_string()))?;
        if resource.id.is_empty() {
            return Err(HarnessError::MissingId(address.to_string()));
        }

        // Only the identifier is carried over; everything else comes from the remote.
        let imported = self.backend.find_by_arn(&resource.id)?;
        let imported_attributes = flatten_rule(&imported);

        if step.verify {
            let differences =
                diff_attributes(&resource.attributes, &imported_attributes, &step.ignore);
            if !differences.is_empty() {
                return Err(HarnessError::ImportMismatch {
                    address: address.to_string(),
                    differences,
                });
            }
        }

        run.enter(Phase::Imported(number));
        Ok(format!(
            "imported {} ({} attribute(s){})",
            imported.arn,
            imported_attributes.len(),
            if step.verify { ", verified" } else { "" }
        ))
    }

    /// Re-reads the resource; a vanished resource drops out of state.
    fn refresh(&self, address: &str, run: &mut RunState) -> Result<Option<RemoteRule>, HarnessError> {
        let Some(resource) = run.state.get(address) else {
            return Ok(None);
        };

        match self.backend.find_by_arn(&resource.id) {
            Ok(remote) => {
                store(&mut run.state, address, &remote);
                Ok(Some(remote))
            }
            Err(err) if err.is_not_found() => {
                info!(address, arn = %resource.id, "resource gone, removing from state");
                run.state.remove(address);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn teardown(&self, run: &mut RunState) -> Vec<String> {
        let mut cleanup_errors = Vec::new();
        let snapshot = run.state.clone();

        for (address, resource) in &snapshot.resources {
            if resource.type_name != RESOURCE_TYPE {
                continue;
            }
            let started_at = timestamp();
            let timer = Instant::now();
            let execution = match self.backend.delete(&resource.id) {
                Ok(()) => StepExecution::completed(
                    format!("destroy {address}"),
                    StepKind::Teardown,
                    Some(format!("deleted {}", resource.id)),
                ),
                Err(err) if err.is_not_found() => StepExecution::completed(
                    format!("destroy {address}"),
                    StepKind::Teardown,
                    Some(format!("{} already absent", resource.id)),
                ),
                Err(err) => {
                    error!(address = %address, error = %err, "teardown delete failed");
                    cleanup_errors.push(format!("destroy {address}: {err}"));
                    StepExecution::failed(
                        format!("destroy {address}"),
                        StepKind::Teardown,
                        Some(err.to_string()),
                    )
                }
            };
            run.steps
                .push(execution.timed(started_at, timer.elapsed().as_millis()));
        }

        let started_at = timestamp();
        let timer = Instant::now();
        let execution = match oracle::check_destroyed(self.backend.as_ref(), &snapshot) {
            Ok(()) => {
                run.state = State::default();
                StepExecution::completed(
                    "check destroy".to_string(),
                    StepKind::DestroyCheck,
                    Some(format!("{} resource(s) confirmed absent", snapshot.resources.len())),
                )
            }
            Err(err) => {
                error!(error = %err, "destroy check failed");
                cleanup_errors.push(format!("check destroy: {err}"));
                StepExecution::failed(
                    "check destroy".to_string(),
                    StepKind::DestroyCheck,
                    Some(err.to_string()),
                )
            }
        };
        run.steps
            .push(execution.timed(started_at, timer.elapsed().as_millis()));
        run.enter(Phase::Destroyed);

        cleanup_errors
    }
}

fn plan(desired: &RuleConfig, current: Option<&RemoteRule>) -> PlanAction {
    let Some(current) = current else {
        return PlanAction::Create;
    };

    let wanted = flatten_config(desired);
    let have = flatten_config(&current.config);
    let changed: Vec<String> = diff_attributes(&have, &wanted, &[])
        .into_iter()
        .map(|diff| diff.key)
        .collect();

    if changed.is_empty() {
        PlanAction::NoOp
    } else {
        PlanAction::Update(changed)
    }
}

fn store(state: &mut State, address: &str, remote: &RemoteRule) {
    state.insert(
        address,
        ResourceState {
            type_name: RESOURCE_TYPE.to_string(),
            id: remote.arn.clone(),
            attributes: flatten_rule(remote),
        },
    );
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "phase", content = "step", rename_all = "snake_case")]
pub enum Phase {
    Init,
    Applied(usize),
    Verified(usize),
    Imported(usize),
    Destroyed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => write!(f, "init"),
            Phase::Applied(n) => write!(f, "applied({n})"),
            Phase::Verified(n) => write!(f, "verified({n})"),
            Phase::Imported(n) => write!(f, "imported({n})"),
            Phase::Destroyed => write!(f, "destroyed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub steps: Vec<StepExecution>,
    pub teardown: Vec<StepExecution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub scenario: String,
    pub status: ScenarioStatus,
    pub failure: Option<String>,
    pub cleanup_errors: Vec<String>,
    /// Every identifier the scenario created.
    pub created: Vec<String>,
    pub phases: Vec<Phase>,
    pub report: ExecutionReport,
}

impl ExecutionOutcome {
    fn panicked(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            status: ScenarioStatus::Failed,
            failure: Some("scenario thread panicked".to_string()),
            cleanup_errors: Vec::new(),
            created: Vec::new(),
            phases: Vec::new(),
            report: ExecutionReport {
                steps: Vec::new(),
                teardown: Vec::new(),
            },
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

impl ExecutionReport {
    pub fn has_failures(&self) -> bool {
        self.steps
            .iter()
            .chain(self.teardown.iter())
            .any(|step| step.status == ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            writeln!(f, "No steps to execute.")?;
        } else {
            writeln!(f, "Execution results:")?;
            write_steps(f, &self.steps)?;
        }
        if !self.teardown.is_empty() {
            writeln!(f, "Teardown:")?;
            write_steps(f, &self.teardown)?;
        }
        Ok(())
    }
}

fn write_steps(f: &mut fmt::Formatter<'_>, steps: &[StepExecution]) -> fmt::Result {
    for step in steps {
        let status = match step.status {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::Failed => "failed",
        };
        writeln!(f, "  - [{}] {} ({:?})", status, step.name, step.kind)?;
        if let Some(message) = &step.message {
            for line in message.lines() {
                writeln!(f, "      {}", line)?;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub name: String,
    pub kind: StepKind,
    pub status: ExecutionStatus,
    pub message: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepKind {
    Apply,
    Import,
    Teardown,
    DestroyCheck,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    Skipped,
    Failed,
}

impl StepExecution {
    pub fn completed(name: String, kind: StepKind, message: Option<String>) -> Self {
        Self {
            name,
            kind,
            status: ExecutionStatus::Completed,
            message,
            started_at: None,
            duration_ms: 0,
        }
    }

    pub fn failed(name: String, kind: StepKind, message: Option<String>) -> Self {
        Self {
            name,
            kind,
            status: ExecutionStatus::Failed,
            message,
            started_at: None,
            duration_ms: 0,
        }
    }

    pub fn skipped(name: String, kind: StepKind, message: Option<String>) -> Self {
        Self {
            name,
            kind,
            status: ExecutionStatus::Skipped,
            message,
            started_at: None,
            duration_ms: 0,
        }
    }

    fn timed(mut self, started_at: String, duration_ms: u128) -> Self {
        self.started_at = Some(started_at);
        self.duration_ms = duration_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, InMemoryBackend, Operation};
    use crate::check::Check;
    use crate::config::RuleConfigBuilder;
    use crate::model::{FindingFieldsUpdate, StringComparison, StringField};
    use crate::state::AttributeDiff;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports a drifted description once `after` reads have gone through.
    struct DriftingBackend {
        inner: InMemoryBackend,
        reads: AtomicUsize,
        after: usize,
    }

    impl RuleBackend for DriftingBackend {
        fn create(&self, config: &RuleConfig) -> Result<RemoteRule, BackendError> {
            self.inner.create(config)
        }

        fn find_by_arn(&self, arn: &str) -> Result<RemoteRule, BackendError> {
            let mut rule = self.inner.find_by_arn(arn)?;
            if self.reads.fetch_add(1, Ordering::SeqCst) >= self.after {
                rule.config.description = "changed remotely".to_string();
            }
            Ok(rule)
        }

        fn update(&self, arn: &str, config: &RuleConfig) -> Result<RemoteRule, BackendError> {
            self.inner.update(arn, config)
        }

        fn delete(&self, arn: &str) -> Result<(), BackendError> {
            self.inner.delete(arn)
        }
    }

    fn rule(name: &str, value: &str) -> RuleConfig {
        let mut update = FindingFieldsUpdate::default();
        update
            .user_defined_fields
            .insert("key".to_string(), "value".to_string());
        RuleConfigBuilder::new(name)
            .description("test description")
            .finding_fields_update(update)
            .string_filter(StringField::AwsAccountId, StringComparison::Equals, value)
            .build()
            .expect("valid rule")
    }

    fn executor() -> (Arc<InMemoryBackend>, Executor) {
        let settings = HarnessConfig::default();
        let backend = Arc::new(InMemoryBackend::new(&settings));
        let executor = Executor::new(backend.clone(), settings);
        (backend, executor)
    }

    #[test]
    fn runs_steps_in_order_and_tears_down() {
        let (backend, executor) = executor();
        let scenario = Scenario::new("update")
            .apply(
                rule("r", "1234567890"),
                vec![Check::attr("criteria.0.aws_account_id.0.value", "1234567890")],
            )
            .import_verify()
            .apply(
                rule("r", "0987654321"),
                vec![Check::attr("criteria.0.aws_account_id.0.value", "0987654321")],
            );

        let outcome = executor.execute(&scenario);
        assert!(outcome.passed(), "failure: {:?}", outcome.failure);
        assert_eq!(outcome.created.len(), 1, "second apply updates in place");
        assert_eq!(
            outcome.phases,
            vec![
                Phase::Init,
                Phase::Applied(1),
                Phase::Verified(1),
                Phase::Imported(2),
                Phase::Applied(3),
                Phase::Verified(3),
                Phase::Destroyed,
            ]
        );
        assert_eq!(outcome.report.steps.len(), 3);
        assert_eq!(outcome.report.teardown.len(), 2);
        assert!(backend.is_empty());
        for arn in &outcome.created {
            assert!(backend.find_by_arn(arn).unwrap_err().is_not_found());
        }
    }

    #[test]
    fn failed_assertion_skips_remaining_steps_but_tears_down() {
        let (backend, executor) = executor();
        let scenario = Scenario::new("mismatch")
            .apply(
                rule("r", "1234567890"),
                vec![Check::attr("criteria.0.aws_account_id.0.value", "nope")],
            )
            .import_verify();

        let outcome = executor.execute(&scenario);
        assert_eq!(outcome.status, ScenarioStatus::Failed);
        let failure = outcome.failure.as_deref().unwrap_or_default();
        assert!(failure.contains("criteria.0.aws_account_id.0.value"), "{failure}");
        assert_eq!(outcome.report.steps[0].status, ExecutionStatus::Failed);
        assert_eq!(outcome.report.steps[1].status, ExecutionStatus::Skipped);
        assert_eq!(outcome.phases.last(), Some(&Phase::Destroyed));
        assert!(!outcome.phases.contains(&Phase::Verified(1)));
        assert!(backend.is_empty());
    }

    #[test]
    fn cleanup_failure_does_not_mask_original_failure() {
        let (backend, executor) = executor();
        backend.inject_failure(
            Operation::Delete,
            BackendError::api("InternalException", "delete failed"),
        );
        let scenario = Scenario::new("masked").apply(
            rule("r", "1234567890"),
            vec![Check::attr("rule_order", "2")],
        );

        let outcome = executor.execute(&scenario);
        assert_eq!(outcome.status, ScenarioStatus::Failed);
        assert!(outcome
            .failure
            .as_deref()
            .unwrap_or_default()
            .contains("rule_order"));
        assert_eq!(outcome.cleanup_errors.len(), 2);
        assert!(outcome.cleanup_errors[0].contains("delete failed"));
        assert!(outcome.cleanup_errors[1].contains("still exists"));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn cleanup_failure_fails_an_otherwise_passing_scenario() {
        let (backend, executor) = executor();
        backend.inject_failure(
            Operation::Delete,
            BackendError::api("InternalException", "delete failed"),
        );
        let scenario = Scenario::new("leak").apply(rule("r", "1234567890"), vec![Check::Exists]);

        let outcome = executor.execute(&scenario);
        assert_eq!(outcome.status, ScenarioStatus::Failed);
        assert!(outcome
            .failure
            .as_deref()
            .unwrap_or_default()
            .contains("delete failed"));
        assert!(outcome.report.has_failures());
    }

    #[test]
    fn skippable_api_errors_skip_the_scenario() {
        let (backend, executor) = executor();
        backend.inject_failure(
            Operation::Create,
            BackendError::api("InvalidAccessException", "account not subscribed"),
        );
        let scenario = Scenario::new("skip").apply(rule("r", "1234567890"), vec![]);

        let outcome = executor.execute(&scenario);
        assert_eq!(outcome.status, ScenarioStatus::Skipped);
        assert!(outcome.created.is_empty());
        assert!(outcome.cleanup_errors.is_empty());
    }

    #[test]
    fn disappearing_resource_needs_expected_drift() {
        let (_, executor) = executor();
        let config = rule("r", "1234567890");

        let strict = Scenario::new("strict").apply(config.clone(), vec![Check::Disappears]);
        let outcome = executor.execute(&strict);
        assert_eq!(outcome.status, ScenarioStatus::Failed);
        assert!(outcome
            .failure
            .as_deref()
            .unwrap_or_default()
            .contains("plan was not empty"));

        let drift = Scenario::new("drift").apply_expecting_drift(config.clone(), vec![Check::Disappears]);
        assert!(executor.execute(&drift).passed());

        let no_drift = Scenario::new("no-drift").apply_expecting_drift(config, vec![Check::Exists]);
        let outcome = executor.execute(&no_drift);
        assert_eq!(outcome.status, ScenarioStatus::Failed);
        assert!(outcome
            .failure
            .as_deref()
            .unwrap_or_default()
            .contains("expected a non-empty plan"));
    }

    #[test]
    fn import_without_prior_apply_fails() {
        let (_, executor) = executor();
        let scenario = Scenario::new("import-first").import_verify();
        let outcome = executor.execute(&scenario);
        assert_eq!(outcome.status, ScenarioStatus::Failed);
        assert!(outcome
            .failure
            .as_deref()
            .unwrap_or_default()
            .contains("not found in state"));
    }

    #[test]
    fn invalid_config_fails_before_touching_backend() {
        let (backend, executor) = executor();
        let mut config = rule("r", "1234567890");
        config.rule_order = 0;
        let scenario = Scenario::new("invalid").apply(config, vec![]);

        let outcome = executor.execute(&scenario);
        assert_eq!(outcome.status, ScenarioStatus::Failed);
        assert!(outcome.created.is_empty());
        assert!(backend.is_empty());
    }

    #[test]
    fn concurrent_scenarios_use_their_own_resources() {
        let (backend, executor) = executor();
        let settings = executor.settings().clone();
        let scenarios: Vec<Scenario> = (0..4)
            .map(|idx| {
                let name = settings.random_name();
                Scenario::new(format!("parallel-{idx}")).apply(
                    rule(&name, "1234567890"),
                    vec![Check::attr("rule_name", name.clone())],
                )
            })
            .collect();

        let outcomes = executor.run_concurrently(&scenarios);
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(ExecutionOutcome::passed));
        let mut arns: Vec<&String> = outcomes.iter().flat_map(|o| o.created.iter()).collect();
        arns.sort();
        arns.dedup();
        assert_eq!(arns.len(), 4);
        assert!(backend.is_empty());
    }

    #[test]
    fn import_reports_each_differing_attribute() {
        let settings = HarnessConfig::default();
        // Apply reads twice (existence check and post-apply refresh); the import read drifts.
        let backend = Arc::new(DriftingBackend {
            inner: InMemoryBackend::new(&settings),
            reads: AtomicUsize::new(0),
            after: 2,
        });
        let executor = Executor::new(backend.clone(), settings);
        let scenario = Scenario::new("import-drift")
            .apply(rule("r", "1234567890"), vec![])
            .import_verify();

        let outcome = executor.execute(&scenario);
        assert_eq!(outcome.status, ScenarioStatus::Failed);
        assert_eq!(outcome.report.steps[0].status, ExecutionStatus::Completed);
        assert_eq!(outcome.report.steps[1].status, ExecutionStatus::Failed);
        let failure = outcome.failure.as_deref().unwrap_or_default();
        assert!(failure.contains("imported state differs"), "{failure}");
        let expected = AttributeDiff {
            key: "description".to_string(),
            expected: Some("test description".to_string()),
            actual: Some("changed remotely".to_string()),
        };
        assert!(failure.contains(&expected.to_string()), "{failure}");
        assert!(!outcome.phases.contains(&Phase::Imported(2)));
        assert!(backend.inner.is_empty());
    }

    #[test]
    fn import_ignores_listed_prefixes() {
        let settings = HarnessConfig::default();
        let backend = Arc::new(DriftingBackend {
            inner: InMemoryBackend::new(&settings),
            reads: AtomicUsize::new(0),
            after: 2,
        });
        let executor = Executor::new(backend, settings);
        let mut scenario = Scenario::new("import-ignore").apply(rule("r", "1234567890"), vec![]);
        scenario.steps.push(Step::Import(ImportStep {
            verify: true,
            ignore: vec!["description".to_string()],
        }));

        let outcome = executor.execute(&scenario);
        assert!(outcome.passed(), "failure: {:?}", outcome.failure);
        assert!(outcome.phases.contains(&Phase::Imported(2)));
    }

    #[test]
    fn leaked_resource_fails_even_when_error_is_skippable() {
        let (backend, executor) = executor();
        backend.inject_failure(
            Operation::Update,
            BackendError::api("InvalidAccessException", "account not subscribed"),
        );
        backend.inject_failure(
            Operation::Delete,
            BackendError::api("InternalException", "delete failed"),
        );
        let scenario = Scenario::new("leak-on-skip")
            .apply(rule("r", "1234567890"), vec![])
            .apply(rule("r", "0987654321"), vec![]);

        let outcome = executor.execute(&scenario);
        assert_eq!(outcome.status, ScenarioStatus::Failed);
        assert!(outcome
            .failure
            .as_deref()
            .unwrap_or_default()
            .contains("InvalidAccessException"));
        assert!(!outcome.cleanup_errors.is_empty());
        assert_eq!(backend.len(), 1);
    }
}
