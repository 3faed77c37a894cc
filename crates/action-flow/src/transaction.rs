//! Action transaction.
//!
//! One click or fill is run as an explicit state machine per selector
//! candidate:
//!
//! ```text
//! PreStabilize -> Attempt(Hover) -> Attempt(Native) -> ... -> Settle -> Evaluate -> Terminal
//!       |                  (strategy fails: next strategy)        |
//!       +-------- fails -------> Retry / NextCandidate <--- fails -+
//! ```
//!
//! A candidate gets at most `max_retries + 1` attempts; only then does the
//! transaction move to the next candidate. With a popup baseline, a page that
//! opened after the gate gave up sends the run back to `Evaluate` instead of
//! clicking again.

use std::sync::Arc;
use std::time::Duration;

use action_gate::{ConditionGate, ConditionMatch, GateRequest};
use action_primitives::{
    scripts, Actionability, BrowserDriver, ClickMode, ContextRef, DriverError, ElementHandle,
    ElementState, EventSequence,
};
use scenario_core_types::{PageId, SuccessCondition};
use serde::Serialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::checkpoints::StepCheckpoints;
use crate::config::ExecutorTimings;
use crate::errors::StepError;

/// What the transaction does to the element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Click,
    Fill { value: String },
}

impl ActionKind {
    fn strategies(&self) -> &'static [Strategy] {
        match self {
            ActionKind::Click => &[
                Strategy::Hover,
                Strategy::Native,
                Strategy::Forced,
                Strategy::Coordinates,
                Strategy::Script,
            ],
            ActionKind::Fill { .. } => &[Strategy::Hover, Strategy::Native, Strategy::Script],
        }
    }

    fn checkpoint(&self) -> &'static str {
        match self {
            ActionKind::Click => "click_strategy",
            ActionKind::Fill { .. } => "fill_strategy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Best effort; failure does not stop the sequence
    Hover,
    Native,
    /// Pointer input without the interception check
    Forced,
    /// Click at the centre of the bounding box
    Coordinates,
    /// Events dispatched from page script
    Script,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Hover => "hover",
            Strategy::Native => "native",
            Strategy::Forced => "forced",
            Strategy::Coordinates => "coordinates",
            Strategy::Script => "script",
        }
    }
}

/// Named states of the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TxState {
    PreStabilize,
    Attempt(Strategy),
    Settle,
    Evaluate,
    Retry,
    NextCandidate,
    Terminal,
}

/// Where a failed attempt leads. `attempt` is 1-based.
pub fn after_failure(attempt: u32, max_retries: u32) -> TxState {
    if attempt <= max_retries {
        TxState::Retry
    } else {
        TxState::NextCandidate
    }
}

/// Where a finished strategy leads. Hover always hands over to the next
/// strategy; any other success ends the attempt phase.
pub fn after_strategy(
    strategies: &[Strategy],
    current: Strategy,
    succeeded: bool,
) -> Option<TxState> {
    if succeeded && current != Strategy::Hover {
        return Some(TxState::Settle);
    }
    let position = strategies.iter().position(|s| *s == current)?;
    strategies
        .get(position + 1)
        .copied()
        .map(TxState::Attempt)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionAttemptResult {
    pub strategy_used: Strategy,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One transaction as requested by a step.
#[derive(Debug, Clone)]
pub struct TransactionRequest<'a> {
    pub context: &'a ContextRef,
    pub candidates: &'a [String],
    pub action: ActionKind,
    pub conditions: &'a [SuccessCondition],
    pub max_retries: u32,
    /// Pages open before the step started. When set, `PopupOpened` is judged
    /// against it instead of the per-attempt snapshot, and a page outside it
    /// stops any further click.
    pub popup_baseline: Option<&'a [PageId]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    pub candidate: String,
    pub strategy: Strategy,
    /// Attempts made across every candidate, including failed ones.
    pub attempts: u32,
    pub matched: Option<ConditionMatch>,
    pub results: Vec<ActionAttemptResult>,
    pub trace: Vec<TxState>,
}

pub struct ActionTransaction {
    driver: Arc<dyn BrowserDriver>,
    gate: Arc<dyn ConditionGate>,
    timings: ExecutorTimings,
}

/// Per-candidate bookkeeping while the machine runs.
struct CandidateRun<'a> {
    element: ElementHandle,
    candidate: &'a str,
    attempt: u32,
    strategy_used: Option<Strategy>,
    strategy_error: Option<String>,
    baseline: Vec<PageId>,
    pause: Duration,
    /// Set once a late popup sent the run back to evaluation.
    popup_rechecked: bool,
}

impl ActionTransaction {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        gate: Arc<dyn ConditionGate>,
        timings: ExecutorTimings,
    ) -> Self {
        Self {
            driver,
            gate,
            timings,
        }
    }

    pub fn timings(&self) -> &ExecutorTimings {
        &self.timings
    }

    /// DOM ready (best effort), attached, visible and scrolled into view
    /// (both best effort), then actionable. A blocked element is checked once
    /// more after a short pause.
    async fn pre_stabilize(&self, element: &ElementHandle) -> Result<(), StepError> {
        let driver = self.driver.as_ref();
        if let Err(err) = driver
            .wait_for_dom_ready(&element.context, self.timings.dom_ready_timeout())
            .await
        {
            debug!(error = %err, "dom ready wait skipped");
        }

        driver
            .wait_for_state(element, ElementState::Attached, self.timings.stabilize_timeout())
            .await
            .map_err(|err| match err {
                DriverError::Closed(_) | DriverError::Io(_) => StepError::Driver(err),
                _ => StepError::ElementNotFound(element.selector.clone()),
            })?;

        if let Err(err) = driver
            .wait_for_state(element, ElementState::Visible, self.timings.stabilize_timeout())
            .await
        {
            debug!(selector = %element.selector, error = %err, "visible wait skipped");
        }
        if let Err(err) = driver.evaluate(element, scripts::SCROLL_INTO_VIEW).await {
            debug!(selector = %element.selector, error = %err, "scroll into view skipped");
        }

        if self.blocker(element).await?.is_none() {
            return Ok(());
        }
        sleep(self.timings.poll_interval()).await;
        match self.blocker(element).await? {
            None => Ok(()),
            Some(reason) => Err(StepError::ElementNotActionable {
                selector: element.selector.clone(),
                reason,
            }),
        }
    }

    async fn blocker(&self, element: &ElementHandle) -> Result<Option<String>, StepError> {
        let state = self
            .driver
            .evaluate(element, scripts::ACTIONABILITY_PROBE)
            .await?;
        Ok(Actionability::from_value(&state)
            .blocker()
            .map(|reason| reason.to_string()))
    }

    /// A page outside the step's baseline means an earlier click already
    /// opened the popup.
    async fn popup_already_open(&self, request: &TransactionRequest<'_>) -> bool {
        match request.popup_baseline {
            Some(baseline) => self
                .page_ids()
                .await
                .iter()
                .any(|id| !baseline.contains(id)),
            None => false,
        }
    }

    async fn run_strategy(
        &self,
        element: &ElementHandle,
        action: &ActionKind,
        strategy: Strategy,
    ) -> Result<(), DriverError> {
        let driver = self.driver.as_ref();
        let timeout = self.timings.strategy_timeout();
        match (strategy, action) {
            (Strategy::Hover, _) => {
                driver.hover(element, self.timings.hover_timeout()).await?;
                sleep(self.timings.hover_settle()).await;
                Ok(())
            }
            (Strategy::Native, ActionKind::Click) => {
                driver.click(element, ClickMode::Native, timeout).await
            }
            (Strategy::Native, ActionKind::Fill { value }) => {
                driver.fill(element, value, timeout).await
            }
            (Strategy::Forced, _) => driver.click(element, ClickMode::Forced, timeout).await,
            (Strategy::Coordinates, _) => {
                let bbox = driver
                    .bounding_box(element)
                    .await?
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| DriverError::NotActionable(format!("{} has no box", element.selector)))?;
                let (x, y) = bbox.center();
                driver.click_at(element.context.page(), x, y).await
            }
            (Strategy::Script, ActionKind::Click) => {
                driver.dispatch_events(element, &EventSequence::Click).await
            }
            (Strategy::Script, ActionKind::Fill { value }) => {
                driver
                    .dispatch_events(
                        element,
                        &EventSequence::Input {
                            value: value.clone(),
                        },
                    )
                    .await
            }
        }
    }

    fn settle_time(&self, action: &ActionKind, has_conditions: bool) -> Duration {
        let ms = match (has_conditions, action) {
            (false, _) => self.timings.settle_without_conditions_ms,
            (true, ActionKind::Click) => self.timings.settle_after_click_ms,
            (true, ActionKind::Fill { .. }) => self.timings.settle_after_fill_ms,
        };
        Duration::from_millis(ms)
    }

    async fn page_ids(&self) -> Vec<PageId> {
        match self.driver.pages().await {
            Ok(pages) => pages.into_iter().map(|p| p.id).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Runs the transaction. Candidate-level failures are recovered here;
    /// only exhaustion of every candidate is returned as an error.
    #[instrument(skip_all, fields(candidates = request.candidates.len(), max_retries = request.max_retries))]
    pub async fn run(
        &self,
        request: TransactionRequest<'_>,
        checkpoints: &StepCheckpoints,
    ) -> Result<TransactionOutcome, StepError> {
        let strategies = request.action.strategies();
        let has_conditions = !request.conditions.is_empty();
        let mut trace = Vec::new();
        let mut results = Vec::new();
        let mut total_attempts = 0u32;
        let mut last_error: Option<StepError> = None;

        for candidate in request.candidates {
            let mut run = CandidateRun {
                element: self.driver.locate(request.context, candidate),
                candidate: candidate.as_str(),
                attempt: 0,
                strategy_used: None,
                strategy_error: None,
                baseline: Vec::new(),
                pause: Duration::ZERO,
                popup_rechecked: false,
            };
            let mut state = TxState::PreStabilize;

            loop {
                trace.push(state);
                state = match state {
                    TxState::PreStabilize => {
                        run.attempt += 1;
                        total_attempts += 1;
                        run.strategy_used = None;
                        run.strategy_error = None;
                        match self.pre_stabilize(&run.element).await {
                            Ok(()) => {
                                run.baseline = self.page_ids().await;
                                TxState::Attempt(strategies[0])
                            }
                            Err(err) => {
                                warn!(candidate = run.candidate, attempt = run.attempt, error = %err, "pre-stabilize failed");
                                checkpoints.emit(
                                    "pre_stabilize_failed",
                                    json!({"candidate": run.candidate, "attempt": run.attempt, "error": err.to_string()}),
                                );
                                if !err.is_retryable() {
                                    checkpoints.emit(
                                        "transaction_failed",
                                        json!({"candidate": run.candidate, "error": err.to_string()}),
                                    );
                                    return Err(err);
                                }
                                last_error = Some(err);
                                run.pause = Duration::from_millis(self.timings.error_retry_pause_ms);
                                after_failure(run.attempt, request.max_retries)
                            }
                        }
                    }
                    TxState::Attempt(strategy) => {
                        let outcome = self.run_strategy(&run.element, &request.action, strategy).await;
                        let ok = outcome.is_ok();
                        let error = outcome.err().map(|e| e.to_string());
                        debug!(candidate = run.candidate, strategy = strategy.name(), ok, "strategy attempted");
                        checkpoints.emit(
                            request.action.checkpoint(),
                            json!({
                                "candidate": run.candidate,
                                "attempt": run.attempt,
                                "strategy": strategy.name(),
                                "ok": ok,
                                "error": error,
                            }),
                        );
                        results.push(ActionAttemptResult {
                            strategy_used: strategy,
                            success: ok,
                            error: error.clone(),
                        });
                        if ok && strategy != Strategy::Hover {
                            run.strategy_used = Some(strategy);
                        } else if let Some(error) = error.filter(|_| strategy != Strategy::Hover) {
                            run.strategy_error = Some(error);
                        }

                        match after_strategy(strategies, strategy, ok) {
                            Some(next) => next,
                            None => {
                                let err = StepError::AllStrategiesFailed {
                                    selector: run.candidate.to_string(),
                                    last_error: run
                                        .strategy_error
                                        .clone()
                                        .unwrap_or_else(|| "no strategy succeeded".to_string()),
                                };
                                checkpoints.emit(
                                    "transaction_exception_retry",
                                    json!({"candidate": run.candidate, "attempt": run.attempt, "error": err.to_string()}),
                                );
                                last_error = Some(err);
                                run.pause = Duration::from_millis(self.timings.error_retry_pause_ms);
                                after_failure(run.attempt, request.max_retries)
                            }
                        }
                    }
                    TxState::Settle => {
                        sleep(self.settle_time(&request.action, has_conditions)).await;
                        if has_conditions {
                            TxState::Evaluate
                        } else {
                            TxState::Terminal
                        }
                    }
                    TxState::Evaluate => {
                        let matched = self
                            .gate
                            .evaluate(GateRequest {
                                conditions: request.conditions,
                                active: request.context.page(),
                                baseline: request.popup_baseline.unwrap_or(&run.baseline),
                            })
                            .await;
                        match matched {
                            Some(hit) => {
                                checkpoints.emit(
                                    "success_condition_met",
                                    json!({"candidate": run.candidate, "condition": hit.condition, "scope": hit.scope}),
                                );
                                trace.push(TxState::Terminal);
                                return Ok(self.succeed(
                                    &run,
                                    total_attempts,
                                    Some(hit),
                                    results,
                                    trace,
                                    checkpoints,
                                ));
                            }
                            None => {
                                let described: Vec<String> =
                                    request.conditions.iter().map(|c| c.describe()).collect();
                                checkpoints.emit(
                                    "success_conditions_failed",
                                    json!({"candidate": run.candidate, "attempt": run.attempt, "conditions": described}),
                                );
                                last_error = Some(StepError::SuccessConditionTimeout(described.join(" | ")));
                                run.pause = Duration::from_millis(self.timings.retry_pause_ms);
                                after_failure(run.attempt, request.max_retries)
                            }
                        }
                    }
                    TxState::Retry => {
                        checkpoints.emit(
                            "transaction_retry",
                            json!({"candidate": run.candidate, "attempt": run.attempt, "pause_ms": run.pause.as_millis() as u64}),
                        );
                        sleep(run.pause).await;
                        if run.strategy_used.is_some()
                            && !run.popup_rechecked
                            && self.popup_already_open(&request).await
                        {
                            run.popup_rechecked = true;
                            info!(candidate = run.candidate, "late popup found; not clicking again");
                            checkpoints.emit("late_popup_detected", json!({"candidate": run.candidate}));
                            TxState::Evaluate
                        } else {
                            TxState::PreStabilize
                        }
                    }
                    TxState::NextCandidate => {
                        if run.strategy_used.is_some()
                            && !run.popup_rechecked
                            && self.popup_already_open(&request).await
                        {
                            run.popup_rechecked = true;
                            info!(candidate = run.candidate, "late popup found; not trying further candidates");
                            checkpoints.emit("late_popup_detected", json!({"candidate": run.candidate}));
                            TxState::Evaluate
                        } else {
                            info!(candidate = run.candidate, attempts = run.attempt, "candidate exhausted");
                            checkpoints.emit(
                                "candidate_exhausted",
                                json!({"candidate": run.candidate, "attempts": run.attempt}),
                            );
                            break;
                        }
                    }
                    TxState::Terminal => {
                        return Ok(self.succeed(&run, total_attempts, None, results, trace, checkpoints));
                    }
                };
            }
        }

        let err = last_error
            .unwrap_or_else(|| StepError::ElementNotFound("no selector candidates".to_string()));
        checkpoints.emit(
            "transaction_failed",
            json!({"candidates": request.candidates, "attempts": total_attempts, "error": err.to_string()}),
        );
        warn!(attempts = total_attempts, error = %err, "transaction failed");
        Err(err)
    }

    fn succeed(
        &self,
        run: &CandidateRun<'_>,
        attempts: u32,
        matched: Option<ConditionMatch>,
        results: Vec<ActionAttemptResult>,
        trace: Vec<TxState>,
        checkpoints: &StepCheckpoints,
    ) -> TransactionOutcome {
        let strategy = run.strategy_used.unwrap_or(Strategy::Native);
        info!(candidate = run.candidate, strategy = strategy.name(), attempts, "transaction succeeded");
        checkpoints.emit(
            "transaction_success",
            json!({"candidate": run.candidate, "strategy": strategy.name(), "attempt": run.attempt}),
        );
        TransactionOutcome {
            candidate: run.candidate.to_string(),
            strategy,
            attempts,
            matched,
            results,
            trace,
        }
    }
}
