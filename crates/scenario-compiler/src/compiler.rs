use std::fmt;

use scenario_core_types::{
    CompiledScenario, CompiledStep, CompilerMeta, RawScenario, RawStep, ScenarioDocument,
    StepKind, SuccessCondition,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::candidates::{generate_candidates, text_contains_selector, CandidateHints};
use crate::conditions::infer_conditions;

/// Soft problem noticed while compiling. The step is passed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileWarning {
    /// 1-based index of the raw step.
    pub index: usize,
    pub step_type: String,
    pub message: String,
}

impl fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({}): {}", self.index, self.step_type, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub document: CompiledScenario,
    pub warnings: Vec<CompileWarning>,
}

fn raw_selectors(step: &RawStep) -> Vec<&str> {
    match step.selectors.as_ref().filter(|list| !list.is_empty()) {
        Some(list) => list.iter().map(String::as_str).collect(),
        None => step.fields.selector.iter().map(String::as_str).collect(),
    }
}

/// Ranked candidates for an interaction step (click, fill, click_popup).
fn interaction_candidates(step: &RawStep, text: Option<&str>) -> Vec<String> {
    let hints = CandidateHints {
        role: step.fields.role.as_deref(),
        label: step.fields.label.as_deref(),
        aria_label: step.fields.aria_label.as_deref(),
        text,
        selectors: raw_selectors(step),
    };
    generate_candidates(&hints)
}

fn css_candidates(step: &RawStep) -> Vec<String> {
    generate_candidates(&CandidateHints::css_only(raw_selectors(step)))
}

fn merge_conditions(into: &mut Vec<SuccessCondition>, more: Vec<SuccessCondition>) {
    for condition in more {
        if !into.contains(&condition) {
            into.push(condition);
        }
    }
}

/// Compiles a raw scenario.
///
/// Pure and deterministic. Never fails: a step that cannot be enriched is
/// copied through and a warning is reported.
pub fn compile(raw: &RawScenario) -> Compiled {
    let mut steps: Vec<CompiledStep> = Vec::with_capacity(raw.steps.len());
    let mut warnings = Vec::new();
    let base_url = raw.base_url.as_deref();

    let mut idx = 0;
    while idx < raw.steps.len() {
        let step = &raw.steps[idx];
        let index = idx + 1;
        let mut warn_step = |message: String| {
            warnings.push(CompileWarning {
                index,
                step_type: step.kind.clone(),
                message,
            })
        };

        let mut compiled = CompiledStep::from(step.clone());
        let text = step.fields.effective_text();
        if compiled.fields.text.is_none() {
            compiled.fields.text = text.clone();
        }

        let Some(kind) = step.step_kind() else {
            warn_step(format!("unknown step type '{}'", step.kind));
            steps.push(compiled);
            idx += 1;
            continue;
        };

        let mut skip_next = false;
        match kind {
            StepKind::Click | StepKind::ClickPopup | StepKind::Fill => {
                // `text` on a fill is the value being typed, not a locator hint.
                let text_hint = match kind {
                    StepKind::Fill => None,
                    _ => text.as_deref(),
                };
                compiled.selector_candidates = interaction_candidates(step, text_hint);
                if compiled.selector_candidates.is_empty() {
                    warn_step("no selector or text to locate the target".to_string());
                }

                if kind == StepKind::Click {
                    let inference = infer_conditions(raw.steps.get(idx + 1), base_url);
                    if !inference.conditions.is_empty() {
                        debug!(
                            step_index = index,
                            conditions = inference.conditions.len(),
                            absorbed = inference.absorbs_next,
                            "inferred success conditions"
                        );
                    }
                    merge_conditions(&mut compiled.success_conditions, inference.conditions);
                    skip_next = inference.absorbs_next;
                }
            }
            StepKind::ExpectText => {
                if text.is_none() {
                    warn_step("expect_text without text".to_string());
                }
                compiled.selector_candidates = css_candidates(step);
            }
            StepKind::WaitVisible => {
                let has_role = step.fields.role.as_deref().is_some_and(|r| !r.is_empty());
                compiled.selector_candidates = css_candidates(step);
                if text.is_none() && !has_role && compiled.selector_candidates.is_empty() {
                    warn_step("wait_visible needs a selector, text or role".to_string());
                }
            }
            StepKind::ExpectVisible => {
                compiled.selector_candidates = css_candidates(step);
                if compiled.selector_candidates.is_empty() {
                    warn_step("expect_visible needs a selector".to_string());
                }
            }
            StepKind::Go
            | StepKind::ExpectUrl
            | StepKind::WaitUrl
            | StepKind::PopupOpen => {
                if step.fields.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    warn_step(format!("{kind} without url"));
                }
            }
            StepKind::EnsureLoggedIn
            | StepKind::EnsureLoggedOut
            | StepKind::ClosePage
            | StepKind::SwitchMain
            | StepKind::Screenshot => {}
        }

        steps.push(compiled);
        idx += if skip_next { 2 } else { 1 };
    }

    for warning in &warnings {
        warn!(
            step_index = warning.index,
            step_type = %warning.step_type,
            "{}",
            warning.message
        );
    }

    Compiled {
        document: ScenarioDocument {
            base_url: raw.base_url.clone(),
            requires_auth: raw.requires_auth,
            steps,
            meta: Some(CompilerMeta::current()),
            config: raw.config.clone(),
        },
        warnings,
    }
}

/// Substring `text=` locator for an `expect_text`/`wait_visible` step that
/// has no selector.
pub fn text_only_locator(step: &CompiledStep) -> Option<String> {
    step.fields.effective_text().map(|text| text_contains_selector(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenario_core_types::COMPILER_VERSION;

    fn scenario(steps: Vec<RawStep>) -> RawScenario {
        RawScenario::from_steps(Some("https://x.test/".into()), steps)
    }

    #[test]
    fn click_absorbs_following_text_assertion() {
        let raw = scenario(vec![
            RawStep::new("click").with_selector("#login"),
            RawStep::new("expect_text").with_text("Welcome"),
            RawStep::new("click").with_selector("#logout"),
        ]);
        let compiled = compile(&raw);
        let steps = &compiled.document.steps;

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].selector_candidates, vec!["#login"]);
        assert_eq!(
            steps[0].success_conditions,
            vec![SuccessCondition::ElementVisible {
                selector: None,
                text: Some("Welcome".into()),
                timeout: 15_000
            }]
        );
        assert_eq!(steps[1].kind, "click");
        assert!(steps[1].success_conditions.is_empty());
        assert!(compiled.warnings.is_empty());
    }

    #[test]
    fn click_before_go_keeps_the_navigation() {
        let raw = scenario(vec![
            RawStep::new("click").with_text("Next"),
            RawStep::new("go").with_url("/step2"),
        ]);
        let compiled = compile(&raw);
        let steps = &compiled.document.steps;
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].selector_candidates, vec!["text=\"Next\""]);
        assert_eq!(
            steps[0].success_conditions,
            vec![SuccessCondition::UrlChanged {
                url_prefix: "https://x.test/step2*".into(),
                timeout: 15_000
            }]
        );
    }

    #[test]
    fn authored_conditions_come_first_and_are_not_duplicated() {
        let mut click = RawStep::new("click").with_selector("#save");
        click.success_conditions = Some(vec![SuccessCondition::ElementVisible {
            selector: None,
            text: Some("Saved".into()),
            timeout: 15_000,
        }]);
        let raw = scenario(vec![click, RawStep::new("expect_text").with_text("Saved")]);
        let compiled = compile(&raw);
        assert_eq!(compiled.document.steps.len(), 1);
        assert_eq!(compiled.document.steps[0].success_conditions.len(), 1);
    }

    #[test]
    fn unknown_and_malformed_steps_pass_through_with_warnings() {
        let raw = scenario(vec![
            RawStep::new("hover").with_selector("#menu"),
            RawStep::new("wait_visible"),
        ]);
        let compiled = compile(&raw);
        assert_eq!(compiled.document.steps.len(), 2);
        assert_eq!(compiled.document.steps[0].kind, "hover");
        assert_eq!(
            compiled.document.steps[0].fields.selector.as_deref(),
            Some("#menu")
        );
        assert_eq!(compiled.warnings.len(), 2);
        assert_eq!(compiled.warnings[1].index, 2);
    }

    #[test]
    fn meta_is_stamped() {
        let compiled = compile(&scenario(vec![]));
        let meta = compiled.document.meta.unwrap();
        assert!(meta.compiled);
        assert_eq!(meta.compiler_version, COMPILER_VERSION);
    }

    #[test]
    fn fill_text_is_not_a_locator() {
        let mut fill = RawStep::new("fill")
            .with_selector("input[name=q]")
            .with_value("rust");
        fill.fields.text = Some("rust".into());
        let compiled = compile(&scenario(vec![fill]));
        assert_eq!(
            compiled.document.steps[0].selector_candidates,
            vec!["input[name=q]"]
        );
    }

    #[test]
    fn text_only_expect_has_no_candidates() {
        let compiled = compile(&scenario(vec![RawStep::new("expect_text").with_text("Hello")]));
        let step = &compiled.document.steps[0];
        assert!(step.selector_candidates.is_empty());
        assert_eq!(text_only_locator(step).as_deref(), Some("text=Hello"));
    }
}
