use std::fmt::Write as _;

use action_flow::RunReport;
use anyhow::Result;
use clap::ValueEnum;
use scenario_compiler::ValidationIssue;
use scenario_core_types::{step_number, StepStatus};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Passed => "PASSED",
        StepStatus::Failed => "FAILED",
    }
}

pub fn render_report(report: &RunReport, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(report)?);
    }

    let mut out = String::new();
    writeln!(
        out,
        "Run {} {} in {} ms ({} steps)",
        report.run_id,
        status_label(report.status),
        report.duration_ms,
        report.steps.len()
    )?;
    for entry in &report.steps {
        write!(
            out,
            "  #{} {:<18} {:<6} {:>7} ms",
            step_number(entry.index),
            entry.step_type,
            status_label(entry.status),
            entry.duration_ms
        )?;
        if let Some(shot) = &entry.screenshot_ref {
            write!(out, "  {shot}")?;
        }
        out.push('\n');
    }
    if let Some(failure) = &report.failure {
        writeln!(
            out,
            "Failure at step {} ({}): {}: {}",
            failure.index, failure.step_type, failure.error_code, failure.message
        )?;
        if let Some(url) = &failure.bundle.current_url {
            writeln!(out, "  url:        {url}")?;
        }
        if let Some(path) = &failure.bundle.screenshot_path {
            writeln!(out, "  screenshot: {path}")?;
        }
        if let Some(path) = &failure.bundle.html_dump_path {
            writeln!(out, "  html:       {path}")?;
        }
    }
    writeln!(out, "Artifacts: {}", report.work_dir.display())?;
    Ok(out)
}

pub fn render_issues(issues: &[ValidationIssue]) -> String {
    let mut out = String::new();
    for issue in issues {
        out.push_str(&format!("  {issue}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenario_compiler::IssueKind;
    use scenario_core_types::{RunId, StepLogEntry};
    use std::path::PathBuf;

    fn passing_report() -> RunReport {
        RunReport {
            run_id: RunId("run-1".into()),
            status: StepStatus::Passed,
            steps: vec![
                StepLogEntry::passed(1, "go", 40),
                StepLogEntry::passed(2, "click", 1200)
                    .with_screenshot(Some("step_002_click.png".into())),
            ],
            failure: None,
            work_dir: PathBuf::from("/tmp/run-1"),
            duration_ms: 1300,
        }
    }

    #[test]
    fn human_report_lists_steps() {
        let text = render_report(&passing_report(), OutputFormat::Human).unwrap();
        assert!(text.starts_with("Run run-1 PASSED in 1300 ms (2 steps)"));
        assert!(text.contains("#002 click"));
        assert!(text.contains("step_002_click.png"));
        assert!(text.contains("Artifacts: /tmp/run-1"));
    }

    #[test]
    fn json_report_uses_log_keys() {
        let text = render_report(&passing_report(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["status"], "PASSED");
        assert_eq!(value["steps"][1]["screenshotRef"], "step_002_click.png");
        assert!(value.get("failure").is_none());
    }

    #[test]
    fn issues_render_one_per_line() {
        let issues = vec![ValidationIssue {
            index: 2,
            kind: IssueKind::MissingField,
            message: "fill needs a value".into(),
        }];
        assert_eq!(render_issues(&issues), "  step 2: fill needs a value\n");
    }
}
