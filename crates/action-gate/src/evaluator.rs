//! Success-condition gate.
//!
//! Conditions are OR-combined across every evaluation scope: the first
//! condition/scope pair that holds satisfies the step. The first pass checks
//! every condition; after that a condition stays eligible until its own
//! timeout elapses. Scopes are re-enumerated on every pass.

use std::sync::Arc;
use std::time::Duration;

use action_primitives::{poll_until, BrowserDriver, DEFAULT_POLL_INTERVAL};
use async_trait::async_trait;
use scenario_compiler::condition_locator;
use scenario_core_types::{url_prefix_of, PageId, SuccessCondition};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::scopes::{resolve_scopes, EvaluationScope};

/// The pair that satisfied a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionMatch {
    pub condition: String,
    pub scope: String,
}

/// Inputs of one evaluation.
#[derive(Debug, Clone)]
pub struct GateRequest<'a> {
    pub conditions: &'a [SuccessCondition],
    /// Page the step acted on; it is the top scope.
    pub active: &'a PageId,
    /// Pages open before the action, for `PopupOpened`.
    pub baseline: &'a [PageId],
}

#[async_trait]
pub trait ConditionGate: Send + Sync {
    /// Returns the first satisfied pair, or `None` once every condition's
    /// timeout has elapsed.
    async fn evaluate(&self, request: GateRequest<'_>) -> Option<ConditionMatch>;
}

pub struct DefaultConditionGate {
    driver: Arc<dyn BrowserDriver>,
    poll_interval: Duration,
}

impl DefaultConditionGate {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            driver,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn holds_in(&self, condition: &SuccessCondition, scope: &EvaluationScope) -> bool {
        let driver = self.driver.as_ref();
        match condition {
            SuccessCondition::UrlChanged { url_prefix, .. } => {
                if !scope.is_page() {
                    return false;
                }
                driver
                    .current_url(scope.context.page())
                    .await
                    .map(|url| url.starts_with(url_prefix_of(url_prefix)))
                    .unwrap_or(false)
            }
            // Scope independent; answered by the page list.
            SuccessCondition::PopupOpened { .. } => false,
            _ => {
                let Some(locator) = condition_locator(condition) else {
                    return false;
                };
                let element = driver.locate(&scope.context, &locator);
                match driver.is_visible(&element).await {
                    Ok(visible) => visible,
                    Err(err) => {
                        debug!(scope = %scope.name, error = %err, "visibility probe failed");
                        false
                    }
                }
            }
        }
    }

    async fn popup_opened(&self, baseline: &[PageId]) -> bool {
        match self.driver.pages().await {
            Ok(pages) => pages.iter().any(|p| !baseline.contains(&p.id)),
            Err(_) => false,
        }
    }

    /// One pass over every still-eligible condition. A zero timeout still
    /// gets the first pass.
    async fn check_once(
        &self,
        request: &GateRequest<'_>,
        started: Instant,
        first_pass: bool,
    ) -> Option<ConditionMatch> {
        let elapsed = started.elapsed();
        let eligible: Vec<&SuccessCondition> = request
            .conditions
            .iter()
            .filter(|c| first_pass || elapsed <= Duration::from_millis(c.timeout_ms()))
            .collect();

        if eligible
            .iter()
            .any(|c| matches!(c, SuccessCondition::PopupOpened { .. }))
            && self.popup_opened(request.baseline).await
        {
            return Some(ConditionMatch {
                condition: "popup_opened".to_string(),
                scope: "browser".to_string(),
            });
        }

        let scopes = match resolve_scopes(self.driver.as_ref(), request.active).await {
            Ok(scopes) => scopes,
            Err(err) => {
                debug!(error = %err, "scope resolution failed");
                return None;
            }
        };

        for condition in eligible {
            for scope in &scopes {
                if self.holds_in(condition, scope).await {
                    return Some(ConditionMatch {
                        condition: condition.describe(),
                        scope: scope.name.clone(),
                    });
                }
            }
        }
        None
    }
}

#[async_trait]
impl ConditionGate for DefaultConditionGate {
    async fn evaluate(&self, request: GateRequest<'_>) -> Option<ConditionMatch> {
        let longest = request
            .conditions
            .iter()
            .map(SuccessCondition::timeout_ms)
            .max()?;

        let started = Instant::now();
        let mut first_pass = true;
        let found = poll_until(Duration::from_millis(longest), self.poll_interval, || {
            let first = std::mem::replace(&mut first_pass, false);
            self.check_once(&request, started, first)
        })
        .await;

        match &found {
            Some(hit) => info!(
                condition = %hit.condition,
                scope = %hit.scope,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "success condition met"
            ),
            None => debug!(
                conditions = request.conditions.len(),
                "no success condition met"
            ),
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_primitives::fake::FakeDriver;

    fn gate(driver: &Arc<FakeDriver>) -> DefaultConditionGate {
        DefaultConditionGate::new(driver.clone()).with_poll_interval(Duration::from_millis(5))
    }

    fn visible_text(text: &str, timeout: u64) -> SuccessCondition {
        SuccessCondition::ElementVisible {
            selector: None,
            text: Some(text.into()),
            timeout,
        }
    }

    #[tokio::test]
    async fn text_in_a_frame_satisfies_the_step() {
        let driver = Arc::new(FakeDriver::new());
        let page = driver.main_page();
        let frame = driver.add_frame(&page, "modal", "https://x.test/modal");
        driver.add_text(&frame, "Saved");

        let conditions = vec![visible_text("Saved", 50)];
        let hit = gate(&driver)
            .evaluate(GateRequest {
                conditions: &conditions,
                active: &page,
                baseline: &[page.clone()],
            })
            .await
            .unwrap();
        assert_eq!(hit.scope, "frame_1_https://x.test/modal");
        assert_eq!(hit.condition, "element_visible(text=Saved)");
    }

    #[tokio::test]
    async fn url_prefix_ignores_frames_and_matches_pages() {
        let driver = Arc::new(FakeDriver::new());
        let page = driver.main_page();
        driver.set_url(&page, "https://x.test/done?id=1");
        let conditions = vec![SuccessCondition::UrlChanged {
            url_prefix: "https://x.test/done*".into(),
            timeout: 20,
        }];
        let hit = gate(&driver)
            .evaluate(GateRequest {
                conditions: &conditions,
                active: &page,
                baseline: &[],
            })
            .await
            .unwrap();
        assert_eq!(hit.scope, "top_page");
    }

    #[tokio::test]
    async fn popup_needs_a_page_outside_the_baseline() {
        let driver = Arc::new(FakeDriver::new());
        let page = driver.main_page();
        let conditions = vec![SuccessCondition::PopupOpened { timeout: 20 }];
        let request = || GateRequest {
            conditions: &conditions,
            active: &page,
            baseline: std::slice::from_ref(&page),
        };

        assert!(gate(&driver).evaluate(request()).await.is_none());
        driver.add_page("https://help.test/");
        assert!(gate(&driver).evaluate(request()).await.is_some());
    }

    #[tokio::test]
    async fn times_out_when_nothing_matches() {
        let driver = Arc::new(FakeDriver::new());
        let page = driver.main_page();
        let conditions = vec![visible_text("Never", 30), visible_text("Nope", 10)];
        let started = Instant::now();
        let result = gate(&driver)
            .evaluate(GateRequest {
                conditions: &conditions,
                active: &page,
                baseline: &[],
            })
            .await;
        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn zero_timeout_conditions_get_one_pass() {
        let driver = Arc::new(FakeDriver::new());
        let page = driver.main_page();
        driver.add_text(&driver.main_context(), "Saved");

        let conditions = vec![visible_text("Saved", 0)];
        let hit = gate(&driver)
            .evaluate(GateRequest {
                conditions: &conditions,
                active: &page,
                baseline: &[],
            })
            .await
            .unwrap();
        assert_eq!(hit.scope, "top_page");

        let missing = vec![visible_text("Gone", 0)];
        assert!(gate(&driver)
            .evaluate(GateRequest {
                conditions: &missing,
                active: &page,
                baseline: &[],
            })
            .await
            .is_none());
    }

    #[tokio::test]
    async fn zero_timeout_popup_is_seen_when_already_open() {
        let driver = Arc::new(FakeDriver::new());
        let page = driver.main_page();
        driver.add_page("https://help.test/");

        let conditions = vec![SuccessCondition::PopupOpened { timeout: 0 }];
        let hit = gate(&driver)
            .evaluate(GateRequest {
                conditions: &conditions,
                active: &page,
                baseline: std::slice::from_ref(&page),
            })
            .await
            .unwrap();
        assert_eq!(hit.condition, "popup_opened");
    }

    #[tokio::test]
    async fn empty_condition_list_is_never_satisfied() {
        let driver = Arc::new(FakeDriver::new());
        let page = driver.main_page();
        let result = gate(&driver)
            .evaluate(GateRequest {
                conditions: &[],
                active: &page,
                baseline: &[],
            })
            .await;
        assert!(result.is_none());
    }
}
