//! Structural checks run before a scenario is executed.

use std::fmt;

use scenario_core_types::{RawStep, ScenarioDocument, StepKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UnknownStepType,
    MissingField,
    InvalidValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// 1-based step index.
    pub index: usize,
    pub kind: IssueKind,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}: {}", self.index, self.message)
    }
}

fn present(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Read-only view over the fields validation cares about. Lets raw and
/// compiled steps share the rules.
pub trait StepShape {
    fn kind_tag(&self) -> &str;
    fn has_selector(&self) -> bool;
    fn fields(&self) -> &scenario_core_types::StepFields;
}

impl StepShape for RawStep {
    fn kind_tag(&self) -> &str {
        &self.kind
    }

    fn has_selector(&self) -> bool {
        self.selectors
            .as_ref()
            .is_some_and(|list| list.iter().any(|s| !s.trim().is_empty()))
            || present(self.fields.selector.as_deref())
    }

    fn fields(&self) -> &scenario_core_types::StepFields {
        &self.fields
    }
}

impl StepShape for scenario_core_types::CompiledStep {
    fn kind_tag(&self) -> &str {
        &self.kind
    }

    fn has_selector(&self) -> bool {
        !self.candidates().is_empty()
    }

    fn fields(&self) -> &scenario_core_types::StepFields {
        &self.fields
    }
}

fn check_step<S: StepShape>(index: usize, step: &S, issues: &mut Vec<ValidationIssue>) {
    let missing = |issues: &mut Vec<ValidationIssue>, what: &str| {
        issues.push(ValidationIssue {
            index,
            kind: IssueKind::MissingField,
            message: format!("{} requires {what}", step.kind_tag()),
        })
    };

    let fields = step.fields();
    let has_text = fields.effective_text().is_some();
    let has_url = present(fields.url.as_deref());

    match StepKind::parse(step.kind_tag()) {
        None => {
            issues.push(ValidationIssue {
                index,
                kind: IssueKind::UnknownStepType,
                message: format!("unknown step type '{}'", step.kind_tag()),
            });
        }
        Some(StepKind::Go | StepKind::PopupOpen | StepKind::ExpectUrl | StepKind::WaitUrl) => {
            if !has_url {
                missing(issues, "url");
            }
        }
        Some(StepKind::Click | StepKind::ClickPopup) => {
            if !step.has_selector() && !has_text {
                missing(issues, "selector, selectors or text");
            }
        }
        Some(StepKind::Fill) => {
            if !step.has_selector() {
                missing(issues, "a selector");
            }
            if fields.value.is_none() {
                missing(issues, "value");
            }
        }
        Some(StepKind::ExpectText) => {
            if !has_text {
                missing(issues, "text");
            }
        }
        Some(StepKind::ExpectVisible) => {
            if !step.has_selector() {
                missing(issues, "a selector");
            }
        }
        Some(StepKind::WaitVisible) => {
            if !step.has_selector() && !has_text && !present(fields.role.as_deref()) {
                missing(issues, "selector, selectors, text or role");
            }
        }
        Some(
            StepKind::ClosePage
            | StepKind::SwitchMain
            | StepKind::EnsureLoggedIn
            | StepKind::EnsureLoggedOut
            | StepKind::Screenshot,
        ) => {}
    }

    for (key, value) in [("delay_ms", fields.delay_ms), ("delay", fields.delay)] {
        if let Some(ms) = value.filter(|ms| *ms < 0) {
            issues.push(ValidationIssue {
                index,
                kind: IssueKind::InvalidValue,
                message: format!("{key} must be >= 0, got {ms}"),
            });
        }
    }
}

/// Returns every issue found. An empty list means the scenario is runnable.
pub fn validate<S: StepShape>(document: &ScenarioDocument<S>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (idx, step) in document.steps.iter().enumerate() {
        check_step(idx + 1, step, &mut issues);
    }
    issues
}
