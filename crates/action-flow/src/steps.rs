//! Step dispatch.
//!
//! Every step kind maps to exactly one handler through the match in
//! [`StepExecutor::execute`]; tags outside [`StepKind`] fail with
//! `UnknownStepType`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use action_gate::{resolve_frame, FrameWait};
use action_primitives::{
    poll_until, scripts, BrowserDriver, ContextRef, DriverError, ElementState,
};
use scenario_compiler::{text_contains_selector, text_selector};
use scenario_core_types::{
    resolve_url, url_prefix_of, CompiledStep, PageId, StepKind, SuccessCondition,
};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::checkpoints::StepCheckpoints;
use crate::config::FlowConfig;
use crate::errors::StepError;
use crate::navigation::PageStack;
use crate::transaction::{ActionKind, ActionTransaction, TransactionOutcome, TransactionRequest};

/// What a passing step reports back to the run loop.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub detail: Option<String>,
    pub transaction: Option<TransactionOutcome>,
}

impl StepOutcome {
    fn note(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            transaction: None,
        }
    }

    fn from_transaction(outcome: TransactionOutcome) -> Self {
        Self {
            detail: Some(format!(
                "{} via {}",
                outcome.candidate,
                outcome.strategy.name()
            )),
            transaction: Some(outcome),
        }
    }
}

fn required<'s>(value: Option<&'s str>, kind: StepKind, field: &str) -> Result<&'s str, StepError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| StepError::InvalidStep(format!("{kind} requires {field}")))
}

fn timeout_to(err: DriverError, on_timeout: impl FnOnce(String) -> StepError) -> StepError {
    match err {
        DriverError::Timeout(detail) => on_timeout(detail),
        other => StepError::Driver(other),
    }
}

pub struct StepExecutor {
    driver: Arc<dyn BrowserDriver>,
    transaction: ActionTransaction,
    config: FlowConfig,
    base_url: Option<String>,
    work_dir: PathBuf,
}

impl StepExecutor {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        transaction: ActionTransaction,
        config: FlowConfig,
        base_url: Option<String>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            driver,
            transaction,
            config,
            base_url,
            work_dir,
        }
    }

    fn url(&self, target: &str) -> String {
        resolve_url(self.base_url.as_deref(), target)
    }

    async fn context_for(
        &self,
        step: &CompiledStep,
        stack: &PageStack,
    ) -> Result<ContextRef, StepError> {
        let timings = &self.config.timings;
        let wait = FrameWait {
            timeout: timings.frame_wait_timeout(),
            interval: timings.frame_poll_interval(),
        };
        Ok(resolve_frame(
            self.driver.as_ref(),
            stack.active(),
            step.fields.frame.as_ref(),
            Some(wait),
        )
        .await?)
    }

    /// Compiled candidates, or a text locator when only `text` was given.
    fn interaction_candidates(step: &CompiledStep, kind: StepKind) -> Result<Vec<String>, StepError> {
        let mut candidates = step.candidates();
        if candidates.is_empty() && kind != StepKind::Fill {
            if let Some(text) = step.fields.effective_text() {
                candidates.push(text_selector(&text));
            }
        }
        if candidates.is_empty() {
            return Err(StepError::InvalidStep(format!(
                "{kind} has no selector candidates"
            )));
        }
        Ok(candidates)
    }

    fn max_retries(&self, step: &CompiledStep) -> u32 {
        step.fields
            .max_retries
            .unwrap_or(self.config.timings.max_retries)
    }

    async fn page_ids(&self) -> Result<Vec<PageId>, StepError> {
        Ok(self
            .driver
            .pages()
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect())
    }

    /// Executes one step against the top of `stack`.
    #[instrument(skip_all, fields(step_index = index, step_type = %step.kind))]
    pub async fn execute(
        &self,
        index: usize,
        step: &CompiledStep,
        stack: &mut PageStack,
        checkpoints: &StepCheckpoints,
    ) -> Result<StepOutcome, StepError> {
        let Some(kind) = step.step_kind() else {
            return Err(StepError::UnknownStepType(step.kind.clone()));
        };
        debug!(candidates = step.selector_candidates.len(), "executing step");

        match kind {
            StepKind::Go => self.go(step, stack).await,
            StepKind::Click => self.click(step, stack, checkpoints).await,
            StepKind::Fill => self.fill(step, stack, checkpoints).await,
            StepKind::ClickPopup => self.click_popup(step, stack, checkpoints).await,
            StepKind::PopupOpen => self.popup_open(step, stack).await,
            StepKind::ClosePage => self.close_page(stack).await,
            StepKind::SwitchMain => Ok(self.switch_main(stack)),
            StepKind::EnsureLoggedIn => self.ensure_login_state(step, stack, true).await,
            StepKind::EnsureLoggedOut => self.ensure_login_state(step, stack, false).await,
            StepKind::ExpectText => self.expect_text(step, stack).await,
            StepKind::ExpectVisible => self.expect_visible(step, stack).await,
            StepKind::ExpectUrl => self.expect_url(step, stack).await,
            StepKind::WaitVisible => self.wait_visible(step, stack).await,
            StepKind::WaitUrl => self.wait_url(step, stack).await,
            StepKind::Screenshot => self.screenshot(step, stack).await,
        }
        .map_err(|err| {
            warn!(code = err.code(), error = %err, "step failed");
            err
        })
    }

    async fn go(&self, step: &CompiledStep, stack: &PageStack) -> Result<StepOutcome, StepError> {
        let url = self.url(required(step.fields.url.as_deref(), StepKind::Go, "url")?);
        let timeout = step
            .fields
            .timeout
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.timings.navigation_timeout());
        self.driver.navigate(stack.active(), &url, timeout).await?;
        info!(url = %url, "navigated");
        Ok(StepOutcome::note(url))
    }

    async fn click(
        &self,
        step: &CompiledStep,
        stack: &PageStack,
        checkpoints: &StepCheckpoints,
    ) -> Result<StepOutcome, StepError> {
        let context = self.context_for(step, stack).await?;
        let candidates = Self::interaction_candidates(step, StepKind::Click)?;
        let outcome = self
            .transaction
            .run(
                TransactionRequest {
                    context: &context,
                    candidates: &candidates,
                    action: ActionKind::Click,
                    conditions: &step.success_conditions,
                    max_retries: self.max_retries(step),
                    popup_baseline: None,
                },
                checkpoints,
            )
            .await?;
        Ok(StepOutcome::from_transaction(outcome))
    }

    async fn fill(
        &self,
        step: &CompiledStep,
        stack: &PageStack,
        checkpoints: &StepCheckpoints,
    ) -> Result<StepOutcome, StepError> {
        let value = step
            .fields
            .value
            .clone()
            .ok_or_else(|| StepError::InvalidStep("fill requires value".to_string()))?;
        let context = self.context_for(step, stack).await?;
        let candidates = Self::interaction_candidates(step, StepKind::Fill)?;
        let outcome = self
            .transaction
            .run(
                TransactionRequest {
                    context: &context,
                    candidates: &candidates,
                    action: ActionKind::Fill { value },
                    conditions: &step.success_conditions,
                    max_retries: self.max_retries(step),
                    popup_baseline: None,
                },
                checkpoints,
            )
            .await?;
        Ok(StepOutcome::from_transaction(outcome))
    }

    async fn click_popup(
        &self,
        step: &CompiledStep,
        stack: &mut PageStack,
        checkpoints: &StepCheckpoints,
    ) -> Result<StepOutcome, StepError> {
        let timings = &self.config.timings;
        let popup_timeout = step.fields.timeout.unwrap_or(timings.popup_timeout_ms);
        let context = self.context_for(step, stack).await?;
        let candidates = Self::interaction_candidates(step, StepKind::ClickPopup)?;
        let baseline = self.page_ids().await?;
        let conditions = [SuccessCondition::PopupOpened {
            timeout: popup_timeout,
        }];

        let outcome = self
            .transaction
            .run(
                TransactionRequest {
                    context: &context,
                    candidates: &candidates,
                    action: ActionKind::Click,
                    conditions: &conditions,
                    max_retries: self.max_retries(step),
                    popup_baseline: Some(baseline.as_slice()),
                },
                checkpoints,
            )
            .await
            .map_err(|err| match err {
                StepError::SuccessConditionTimeout(_) => StepError::PopupNotOpened(format!(
                    "no new page within {popup_timeout}ms after clicking {}",
                    candidates.join(" | ")
                )),
                other => other,
            })?;

        let popup = self
            .driver
            .wait_for_new_page(&baseline, Duration::from_millis(popup_timeout))
            .await
            .map_err(|err| timeout_to(err, StepError::PopupNotOpened))?;
        if let Err(err) = self
            .driver
            .wait_for_dom_ready(&ContextRef::Page(popup.clone()), timings.dom_ready_timeout())
            .await
        {
            debug!(error = %err, "popup dom ready wait skipped");
        }

        if let Some(expected) = step.fields.popup_url.as_deref().filter(|u| !u.is_empty()) {
            let expected = self.url(expected);
            let prefix = url_prefix_of(&expected);
            if let Err(err) = self
                .driver
                .wait_for_url_prefix(&popup, prefix, Duration::from_millis(popup_timeout))
                .await
            {
                let actual = self.driver.current_url(&popup).await.unwrap_or_default();
                return Err(match err {
                    DriverError::Timeout(_) => StepError::AssertionFailed(format!(
                        "popup url {actual} does not start with {prefix}"
                    )),
                    other => StepError::Driver(other),
                });
            }
        }

        info!(popup = %popup, depth = stack.depth() + 1, "popup opened");
        stack.push(popup.clone());
        let mut result = StepOutcome::from_transaction(outcome);
        result.detail = Some(format!("opened {popup}"));
        Ok(result)
    }

    async fn popup_open(
        &self,
        step: &CompiledStep,
        stack: &mut PageStack,
    ) -> Result<StepOutcome, StepError> {
        let url = self.url(required(step.fields.url.as_deref(), StepKind::PopupOpen, "url")?);
        let page = self.driver.new_page().await?;
        self.driver
            .navigate(&page, &url, self.config.timings.navigation_timeout())
            .await?;
        stack.push(page.clone());
        info!(page = %page, url = %url, "popup opened out of band");
        Ok(StepOutcome::note(format!("opened {url}")))
    }

    /// The top page leaves the stack only once the browser closed it.
    async fn close_page(&self, stack: &mut PageStack) -> Result<StepOutcome, StepError> {
        if stack.depth() < 2 {
            debug!("close_page on the main page ignored");
            return Ok(StepOutcome::note("only the main page is open"));
        }
        let page = stack.active().clone();
        self.driver.close_page(&page).await?;
        stack.pop();
        info!(page = %page, depth = stack.depth(), "closed page");
        Ok(StepOutcome::note(format!("closed {page}")))
    }

    fn switch_main(&self, stack: &mut PageStack) -> StepOutcome {
        let left = stack.switch_main();
        info!(left = left.len(), "switched to main page");
        StepOutcome::note(format!("main page active, {} page(s) left open", left.len()))
    }

    async fn ensure_login_state(
        &self,
        step: &CompiledStep,
        stack: &PageStack,
        want_logged_in: bool,
    ) -> Result<StepOutcome, StepError> {
        let auth = &self.config.auth;
        let context = self.context_for(step, stack).await?;
        let mut candidates = step.candidates();
        if candidates.is_empty() {
            candidates.push(auth.account_selector.clone());
        }
        let logged_out_text = step
            .fields
            .logged_out_text
            .clone()
            .unwrap_or_else(|| auth.logged_out_text.clone());

        for candidate in &candidates {
            let element = self.driver.locate(&context, candidate);
            if self
                .driver
                .wait_for_state(&element, ElementState::Attached, self.config.timings.assert_timeout())
                .await
                .is_err()
            {
                continue;
            }
            let text = self.driver.evaluate(&element, scripts::INNER_TEXT).await?;
            let text = text.as_str().unwrap_or_default();
            let logged_out = text.contains(&logged_out_text);
            debug!(candidate = %candidate, logged_out, "login indicator read");

            return if logged_out != want_logged_in {
                Ok(StepOutcome::note(if want_logged_in {
                    "logged in"
                } else {
                    "logged out"
                }))
            } else {
                Err(StepError::AssertionFailed(format!(
                    "expected to be logged {}, indicator {candidate} reads '{}'",
                    if want_logged_in { "in" } else { "out" },
                    text.trim()
                )))
            };
        }

        Err(StepError::ElementNotFound(format!(
            "login indicator ({})",
            candidates.join(" | ")
        )))
    }

    async fn expect_text(
        &self,
        step: &CompiledStep,
        stack: &PageStack,
    ) -> Result<StepOutcome, StepError> {
        let text = step
            .fields
            .effective_text()
            .ok_or_else(|| StepError::InvalidStep("expect_text requires text".to_string()))?;
        let context = self.context_for(step, stack).await?;
        let timeout = step
            .fields
            .timeout
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.timings.assert_timeout());
        let candidates = step.candidates();

        if candidates.is_empty() {
            let locator = text_contains_selector(&text);
            let element = self.driver.locate(&context, &locator);
            return match self
                .driver
                .wait_for_state(&element, ElementState::Visible, timeout)
                .await
            {
                Ok(()) => Ok(StepOutcome::note(format!("'{text}' visible"))),
                Err(err) => Err(timeout_to(err, |_| {
                    StepError::AssertionFailed(format!("text '{text}' not visible"))
                })),
            };
        }

        let mut seen = Vec::new();
        for candidate in &candidates {
            let element = self.driver.locate(&context, candidate);
            if self
                .driver
                .wait_for_state(&element, ElementState::Visible, timeout)
                .await
                .is_err()
            {
                continue;
            }
            let actual = self.driver.evaluate(&element, scripts::INNER_TEXT).await?;
            let actual = actual.as_str().unwrap_or_default().to_string();
            if actual.contains(&text) {
                return Ok(StepOutcome::note(format!("'{text}' in {candidate}")));
            }
            seen.push(format!("{candidate}='{}'", actual.trim()));
        }

        Err(StepError::AssertionFailed(if seen.is_empty() {
            format!("none of {} became visible", candidates.join(" | "))
        } else {
            format!("'{text}' not found; saw {}", seen.join(", "))
        }))
    }

    async fn expect_visible(
        &self,
        step: &CompiledStep,
        stack: &PageStack,
    ) -> Result<StepOutcome, StepError> {
        let candidates = step.candidates();
        if candidates.is_empty() {
            return Err(StepError::InvalidStep(
                "expect_visible requires a selector".to_string(),
            ));
        }
        let context = self.context_for(step, stack).await?;
        let timeout = self.config.timings.assert_timeout();

        for candidate in &candidates {
            let element = self.driver.locate(&context, candidate);
            if self
                .driver
                .wait_for_state(&element, ElementState::Attached, timeout)
                .await
                .is_err()
            {
                continue;
            }
            if let Err(err) = self.driver.evaluate(&element, scripts::SCROLL_INTO_VIEW).await {
                debug!(error = %err, "scroll into view failed");
            }
            let visible = self
                .driver
                .evaluate(&element, scripts::VISIBILITY_PROBE)
                .await?;
            if visible == Value::Bool(true) {
                return Ok(StepOutcome::note(format!("{candidate} visible")));
            }
        }
        Err(StepError::AssertionFailed(format!(
            "{} not visible",
            candidates.join(" | ")
        )))
    }

    async fn expect_url(
        &self,
        step: &CompiledStep,
        stack: &PageStack,
    ) -> Result<StepOutcome, StepError> {
        let expected = self.url(required(step.fields.url.as_deref(), StepKind::ExpectUrl, "url")?);
        let page = stack.active();
        let timings = &self.config.timings;
        let driver = self.driver.as_ref();
        let wanted = expected.as_str();
        let matched = poll_until(timings.assert_timeout(), timings.poll_interval(), || async move {
            match driver.current_url(page).await {
                Ok(url) if url == wanted => Some(url),
                _ => None,
            }
        })
        .await;

        match matched {
            Some(url) => Ok(StepOutcome::note(url)),
            None => {
                let actual = self.driver.current_url(page).await?;
                Err(StepError::AssertionFailed(format!(
                    "expected url {expected}, got {actual}"
                )))
            }
        }
    }

    async fn wait_visible(
        &self,
        step: &CompiledStep,
        stack: &PageStack,
    ) -> Result<StepOutcome, StepError> {
        let locators: Vec<String> = if let Some(text) = step.fields.effective_text() {
            vec![text_contains_selector(&text)]
        } else if let Some(role) = step.fields.role.as_deref().filter(|r| !r.is_empty()) {
            vec![format!("role={role}")]
        } else {
            step.candidates()
        };
        if locators.is_empty() {
            return Err(StepError::InvalidStep(
                "wait_visible requires selector, text or role".to_string(),
            ));
        }

        let context = self.context_for(step, stack).await?;
        let timeout = step
            .fields
            .timeout
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.timings.wait_timeout());

        for locator in &locators {
            let element = self.driver.locate(&context, locator);
            match self
                .driver
                .wait_for_state(&element, ElementState::Visible, timeout)
                .await
            {
                Ok(()) => return Ok(StepOutcome::note(format!("{locator} visible"))),
                Err(DriverError::Timeout(_)) | Err(DriverError::NotFound(_)) => continue,
                Err(other) => return Err(StepError::Driver(other)),
            }
        }
        Err(StepError::SuccessConditionTimeout(format!(
            "{} not visible within {}ms",
            locators.join(" | "),
            timeout.as_millis()
        )))
    }

    async fn wait_url(
        &self,
        step: &CompiledStep,
        stack: &PageStack,
    ) -> Result<StepOutcome, StepError> {
        let pattern = self.url(required(step.fields.url.as_deref(), StepKind::WaitUrl, "url")?);
        let prefix = url_prefix_of(&pattern);
        let timeout = step
            .fields
            .timeout
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.timings.wait_timeout());
        let page = stack.active();

        match self.driver.wait_for_url_prefix(page, prefix, timeout).await {
            Ok(()) => Ok(StepOutcome::note(format!("url starts with {prefix}"))),
            Err(DriverError::Timeout(_)) => {
                let actual = self.driver.current_url(page).await.unwrap_or_default();
                Err(StepError::SuccessConditionTimeout(format!(
                    "url {actual} does not start with {prefix}"
                )))
            }
            Err(other) => Err(StepError::Driver(other)),
        }
    }

    async fn screenshot(
        &self,
        step: &CompiledStep,
        stack: &PageStack,
    ) -> Result<StepOutcome, StepError> {
        let name = step
            .fields
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or("shot");
        let path = self.work_dir.join(format!("{name}.png"));
        self.driver.screenshot(stack.active(), &path, true).await?;
        Ok(StepOutcome::note(path.display().to_string()))
    }
}
