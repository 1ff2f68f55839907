use crate::runtime::{ExecutionOutcome, ScenarioStatus};
use crate::state::Attributes;
use comfy_table::{presets::ASCII_FULL, Table};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

const SUITE_NAME: &str = "ruleharness";

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReportError {
    #[error("failed to write junit report: {0}")]
    Xml(String),
}

/// Flattened attributes as a two-column table.
pub fn render_attributes(attributes: &Attributes) -> String {
    let mut display = Table::new();
    display.load_preset(ASCII_FULL);
    display.set_header(vec!["attribute", "value"]);
    for (key, value) in attributes {
        display.add_row(vec![key.as_str(), value.as_str()]);
    }
    display.to_string()
}

pub fn render_summary(outcomes: &[ExecutionOutcome]) -> String {
    let mut display = Table::new();
    display.load_preset(ASCII_FULL);
    display.set_header(vec!["scenario", "status", "steps", "created", "failure"]);

    for outcome in outcomes {
        display.add_row(vec![
            outcome.scenario.clone(),
            status_label(outcome.status).to_string(),
            outcome.report.steps.len().to_string(),
            outcome.created.len().to_string(),
            outcome.failure.clone().unwrap_or_default(),
        ]);
    }

    display.to_string()
}

fn status_label(status: ScenarioStatus) -> &'static str {
    match status {
        ScenarioStatus::Passed => "passed",
        ScenarioStatus::Failed => "failed",
        ScenarioStatus::Skipped => "skipped",
    }
}

fn elapsed_seconds(outcome: &ExecutionOutcome) -> String {
    let millis: u128 = outcome
        .report
        .steps
        .iter()
        .chain(outcome.report.teardown.iter())
        .map(|step| step.duration_ms)
        .sum();
    format!("{:.3}", millis as f64 / 1000.0)
}

/// JUnit XML for CI systems; one testcase per scenario.
pub fn junit_xml(outcomes: &[ExecutionOutcome]) -> Result<String, ReportError> {
    let tests = outcomes.len().to_string();
    let failures = outcomes
        .iter()
        .filter(|o| o.status == ScenarioStatus::Failed)
        .count()
        .to_string();
    let skipped = outcomes
        .iter()
        .filter(|o| o.status == ScenarioStatus::Skipped)
        .count()
        .to_string();

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    let mut emit = |event: Event<'_>| {
        writer
            .write_event(event)
            .map_err(|err| ReportError::Xml(err.to_string()))
    };

    emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    emit(Event::Start(BytesStart::new("testsuites").with_attributes([
        ("name", SUITE_NAME),
        ("tests", tests.as_str()),
        ("failures", failures.as_str()),
        ("skipped", skipped.as_str()),
    ])))?;
    emit(Event::Start(BytesStart::new("testsuite").with_attributes([
        ("name", SUITE_NAME),
        ("tests", tests.as_str()),
        ("failures", failures.as_str()),
        ("errors", "0"),
        ("skipped", skipped.as_str()),
    ])))?;

    for outcome in outcomes {
        let time = elapsed_seconds(outcome);
        emit(Event::Start(BytesStart::new("testcase").with_attributes([
            ("name", outcome.scenario.as_str()),
            ("classname", SUITE_NAME),
            ("time", time.as_str()),
        ])))?;

        let message = outcome.failure.clone().unwrap_or_default();
        match outcome.status {
            ScenarioStatus::Passed => {}
            ScenarioStatus::Skipped => {
                emit(Event::Empty(
                    BytesStart::new("skipped").with_attributes([("message", message.as_str())]),
                ))?;
            }
            ScenarioStatus::Failed => {
                emit(Event::Start(
                    BytesStart::new("failure").with_attributes([("message", message.as_str())]),
                ))?;
                let mut detail = message.clone();
                for cleanup in &outcome.cleanup_errors {
                    detail.push_str("\ncleanup: ");
                    detail.push_str(cleanup);
                }
                emit(Event::Text(BytesText::new(&detail)))?;
                emit(Event::End(BytesEnd::new("failure")))?;
            }
        }

        let output = outcome.report.to_string();
        emit(Event::Start(BytesStart::new("system-out")))?;
        emit(Event::Text(BytesText::new(&output)))?;
        emit(Event::End(BytesEnd::new("system-out")))?;
        emit(Event::End(BytesEnd::new("testcase")))?;
    }

    emit(Event::End(BytesEnd::new("testsuite")))?;
    emit(Event::End(BytesEnd::new("testsuites")))?;

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|err| ReportError::Xml(err.to_string()))
}
