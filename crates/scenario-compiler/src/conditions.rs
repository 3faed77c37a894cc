//! Success-condition inference for clicks.
//!
//! Only the step right after a click is inspected. A text or visibility
//! assertion becomes `ElementVisible`, a URL assertion or navigation becomes
//! `UrlChanged`. Visibility checks and `wait_url` are folded into the click.
//! `expect_url` is an exact match that a prefix condition cannot express, and
//! a navigation still has to run, so both stay in the sequence.

use scenario_core_types::{
    resolve_url, RawStep, StepKind, SuccessCondition, DEFAULT_CONDITION_TIMEOUT_MS,
};

use crate::candidates::text_contains_selector;

/// Conditions inferred from the step following a click.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inference {
    pub conditions: Vec<SuccessCondition>,
    /// The following step is now represented by `conditions` and should be
    /// dropped from the compiled sequence.
    pub absorbs_next: bool,
}

/// Appends a `*` so the pattern reads as a prefix match.
fn prefix_pattern(url: &str) -> String {
    if url.ends_with('*') {
        url.to_string()
    } else {
        format!("{url}*")
    }
}

fn first_selector(step: &RawStep) -> Option<String> {
    step.selectors
        .as_ref()
        .and_then(|list| list.iter().find(|s| !s.trim().is_empty()).cloned())
        .or_else(|| {
            step.fields
                .selector
                .clone()
                .filter(|s| !s.trim().is_empty())
        })
}

/// Infers conditions for `click` from `next`.
pub fn infer_conditions(next: Option<&RawStep>, base_url: Option<&str>) -> Inference {
    let Some(next) = next else {
        return Inference::default();
    };
    let Some(kind) = next.step_kind() else {
        return Inference::default();
    };
    let timeout = next.fields.timeout.unwrap_or(DEFAULT_CONDITION_TIMEOUT_MS);

    if kind.is_visibility_assertion() {
        let condition = match (next.fields.effective_text(), first_selector(next)) {
            (Some(text), _) => SuccessCondition::ElementVisible {
                selector: None,
                text: Some(text),
                timeout,
            },
            (None, Some(selector)) => SuccessCondition::ElementVisible {
                selector: Some(selector),
                text: None,
                timeout,
            },
            (None, None) => match next.fields.role.as_deref().filter(|r| !r.is_empty()) {
                Some(role) => SuccessCondition::ElementVisible {
                    selector: Some(format!("role={role}")),
                    text: None,
                    timeout,
                },
                None => return Inference::default(),
            },
        };
        return Inference {
            conditions: vec![condition],
            absorbs_next: true,
        };
    }

    let url = next
        .fields
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());

    match (kind, url) {
        (StepKind::WaitUrl, Some(url)) => Inference {
            conditions: vec![SuccessCondition::UrlChanged {
                url_prefix: prefix_pattern(&resolve_url(base_url, url)),
                timeout,
            }],
            absorbs_next: true,
        },
        (StepKind::ExpectUrl, Some(url)) => Inference {
            conditions: vec![SuccessCondition::UrlChanged {
                url_prefix: prefix_pattern(&resolve_url(base_url, url)),
                timeout,
            }],
            absorbs_next: false,
        },
        (StepKind::Go, Some(url)) => Inference {
            conditions: vec![SuccessCondition::UrlChanged {
                url_prefix: prefix_pattern(&resolve_url(base_url, url)),
                timeout: DEFAULT_CONDITION_TIMEOUT_MS,
            }],
            absorbs_next: false,
        },
        _ => Inference::default(),
    }
}

/// Locator a text or visibility condition searches for. Text matches as a
/// case-insensitive substring.
pub fn condition_locator(condition: &SuccessCondition) -> Option<String> {
    match condition {
        SuccessCondition::ModalVisible { text, .. } => Some(text_contains_selector(text)),
        SuccessCondition::ElementVisible {
            text: Some(text), ..
        } => Some(text_contains_selector(text)),
        SuccessCondition::ElementVisible {
            selector: Some(selector),
            ..
        } => Some(selector.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_text_becomes_element_visible() {
        let next = RawStep::new("expect_text").with_text("Welcome");
        let inference = infer_conditions(Some(&next), None);
        assert!(inference.absorbs_next);
        assert_eq!(
            inference.conditions,
            vec![SuccessCondition::ElementVisible {
                selector: None,
                text: Some("Welcome".into()),
                timeout: 15_000
            }]
        );
    }

    #[test]
    fn wait_visible_by_selector_keeps_its_timeout() {
        let next = RawStep::new("wait_visible")
            .with_selector("#menu")
            .with_timeout(3_000);
        let inference = infer_conditions(Some(&next), None);
        assert_eq!(
            inference.conditions,
            vec![SuccessCondition::ElementVisible {
                selector: Some("#menu".into()),
                text: None,
                timeout: 3_000
            }]
        );
    }

    #[test]
    fn navigation_is_kept_but_still_observed() {
        let next = RawStep::new("go").with_url("/dashboard");
        let inference = infer_conditions(Some(&next), Some("https://x.test"));
        assert!(!inference.absorbs_next);
        assert_eq!(
            inference.conditions,
            vec![SuccessCondition::UrlChanged {
                url_prefix: "https://x.test/dashboard*".into(),
                timeout: 15_000
            }]
        );
    }

    #[test]
    fn url_wait_is_absorbed() {
        let next = RawStep::new("wait_url").with_url("https://x.test/done*");
        let inference = infer_conditions(Some(&next), None);
        assert!(inference.absorbs_next);
        assert_eq!(
            inference.conditions[0],
            SuccessCondition::UrlChanged {
                url_prefix: "https://x.test/done*".into(),
                timeout: 15_000
            }
        );
    }

    #[test]
    fn exact_url_assertion_is_observed_but_kept() {
        let next = RawStep::new("expect_url").with_url("https://x.test/done");
        let inference = infer_conditions(Some(&next), None);
        assert!(!inference.absorbs_next);
        assert_eq!(
            inference.conditions,
            vec![SuccessCondition::UrlChanged {
                url_prefix: "https://x.test/done*".into(),
                timeout: 15_000
            }]
        );
    }

    #[test]
    fn unrelated_or_empty_followers_infer_nothing() {
        assert_eq!(infer_conditions(None, None), Inference::default());
        let click = RawStep::new("click").with_selector("#x");
        assert_eq!(infer_conditions(Some(&click), None), Inference::default());
        let bare = RawStep::new("wait_visible");
        assert_eq!(infer_conditions(Some(&bare), None), Inference::default());
        let unknown = RawStep::new("hover").with_text("Menu");
        assert_eq!(infer_conditions(Some(&unknown), None), Inference::default());
    }

    #[test]
    fn condition_locators() {
        let cond = SuccessCondition::ModalVisible {
            text: "Saved".into(),
            timeout: 1,
        };
        assert_eq!(condition_locator(&cond).as_deref(), Some("text=Saved"));
        assert_eq!(
            condition_locator(&SuccessCondition::PopupOpened { timeout: 1 }),
            None
        );
    }
}
