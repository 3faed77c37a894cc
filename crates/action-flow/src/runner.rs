//! Scenario run loop.
//!
//! Runs compiled steps one at a time on a single browsing session, appends
//! a log entry per step and stops at the first failure. The session is
//! closed on every exit path, including a panic inside a step.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use action_gate::{ConditionGate, DefaultConditionGate};
use action_primitives::BrowserDriver;
use async_trait::async_trait;
use futures::FutureExt;
use scenario_core_types::{
    step_number, CompiledScenario, CompiledStep, FailureArtifactBundle, PageId, RunId,
    StepKind, StepLogEntry, StepStatus,
};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::artifacts::{FailureCollector, FailureSite};
use crate::checkpoints::{
    CheckpointSink, JsonlCheckpointSink, NullCheckpointSink, StepCheckpoints,
};
use crate::config::FlowConfig;
use crate::errors::{FlowError, StepError};
use crate::navigation::PageStack;
use crate::steps::StepExecutor;
use crate::transaction::ActionTransaction;

pub const STEP_LOG_FILE: &str = "step_log.jsonl";
pub const FAIL_SCREENSHOT: &str = "FAIL.png";

/// The first failing step of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub index: usize,
    pub step_type: String,
    pub error_code: String,
    pub message: String,
    pub bundle: FailureArtifactBundle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: StepStatus,
    pub steps: Vec<StepLogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    pub work_dir: PathBuf,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.status == StepStatus::Passed
    }
}

/// Runs a compiled scenario to a terminal status.
#[async_trait]
pub trait ScenarioRunner: Send + Sync {
    async fn run(&self, scenario: &CompiledScenario) -> Result<RunReport, FlowError>;
}

/// Append-only `step_log.jsonl` writer.
struct StepLog {
    file: File,
}

impl StepLog {
    async fn create(path: &Path) -> Result<Self, FlowError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self { file })
    }

    async fn append(&mut self, entry: &StepLogEntry) -> Result<(), FlowError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await?;
        Ok(())
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub struct DefaultScenarioRunner {
    driver: Arc<dyn BrowserDriver>,
    gate: Arc<dyn ConditionGate>,
    config: FlowConfig,
    work_dir: PathBuf,
    sink: Option<Arc<dyn CheckpointSink>>,
}

impl DefaultScenarioRunner {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: FlowConfig, work_dir: impl Into<PathBuf>) -> Self {
        let gate = Arc::new(
            DefaultConditionGate::new(driver.clone())
                .with_poll_interval(config.timings.poll_interval()),
        );
        Self {
            driver,
            gate,
            config,
            work_dir: work_dir.into(),
            sink: None,
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn ConditionGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Overrides where checkpoints go. By default they are written to
    /// `debug_checkpoints.jsonl` when enabled in the config.
    pub fn with_checkpoint_sink(mut self, sink: Arc<dyn CheckpointSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn checkpoint_sink(&self) -> Arc<dyn CheckpointSink> {
        match &self.sink {
            Some(sink) => sink.clone(),
            None if self.config.artifacts.debug_checkpoints => {
                Arc::new(JsonlCheckpointSink::in_dir(&self.work_dir))
            }
            None => Arc::new(NullCheckpointSink),
        }
    }

    async fn main_page(&self) -> Result<PageId, FlowError> {
        match self.driver.pages().await?.into_iter().next() {
            Some(page) => Ok(page.id),
            None => Ok(self.driver.new_page().await?),
        }
    }

    async fn capture(&self, page: &PageId, name: String) -> Option<String> {
        let path = self.work_dir.join(&name);
        match self
            .driver
            .screenshot(page, &path, self.config.artifacts.full_page_screenshots)
            .await
        {
            Ok(()) => Some(name),
            Err(err) => {
                warn!(file = %name, error = %err, "screenshot failed");
                None
            }
        }
    }

    async fn step_screenshot(&self, index: usize, step: &CompiledStep, page: &PageId) -> Option<String> {
        if !self.config.artifacts.step_screenshots || step.step_kind() == Some(StepKind::Screenshot) {
            return None;
        }
        self.capture(page, format!("step_{}_{}.png", step_number(index), step.kind))
            .await
    }

    async fn failure_screenshots(&self, index: usize, step: &CompiledStep, page: &PageId) -> Option<String> {
        self.capture(page, FAIL_SCREENSHOT.to_string()).await;
        self.capture(page, format!("step_{}_{}_FAIL.png", step_number(index), step.kind))
            .await
    }

    async fn run_steps(&self, scenario: &CompiledScenario) -> Result<RunReport, FlowError> {
        let run_id = RunId::new();
        let started = Instant::now();
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let sink = self.checkpoint_sink();
        let main = self.main_page().await?;
        let mut stack = PageStack::new(main);
        let transaction = ActionTransaction::new(
            self.driver.clone(),
            self.gate.clone(),
            self.config.timings.clone(),
        );
        let executor = StepExecutor::new(
            self.driver.clone(),
            transaction,
            self.config.clone(),
            scenario.base_url.clone(),
            self.work_dir.clone(),
        );
        let collector = FailureCollector::new(self.driver.clone(), self.work_dir.clone())
            .with_full_page(self.config.artifacts.full_page_screenshots);
        let mut log = StepLog::create(&self.work_dir.join(STEP_LOG_FILE)).await?;
        let mut steps = Vec::with_capacity(scenario.steps.len());

        info!(run_id = %run_id, steps = scenario.steps.len(), "run started");

        for (offset, step) in scenario.steps.iter().enumerate() {
            let index = offset + 1;
            let checkpoints = StepCheckpoints::new(sink.clone(), index, step.kind.clone());
            let step_started = Instant::now();
            let result = executor.execute(index, step, &mut stack, &checkpoints).await;
            let duration_ms = elapsed_ms(step_started);

            match result {
                Ok(outcome) => {
                    let shot = self.step_screenshot(index, step, stack.active()).await;
                    let entry = StepLogEntry::passed(index, step.kind.clone(), duration_ms)
                        .with_screenshot(shot);
                    log.append(&entry).await?;
                    steps.push(entry);
                    info!(
                        step_index = index,
                        step_type = %step.kind,
                        duration_ms,
                        detail = outcome.detail.as_deref().unwrap_or(""),
                        "step passed"
                    );

                    if let Some(delay) = step.fields.post_delay_ms() {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
                Err(err) => {
                    let (entry, failure) = self
                        .fail(index, step, err, &stack, &collector, &mut log, duration_ms)
                        .await?;
                    steps.push(entry);
                    error!(
                        run_id = %run_id,
                        step_index = index,
                        step_type = %step.kind,
                        code = %failure.error_code,
                        "run failed"
                    );
                    return Ok(RunReport {
                        run_id,
                        status: StepStatus::Failed,
                        steps,
                        failure: Some(failure),
                        work_dir: self.work_dir.clone(),
                        duration_ms: elapsed_ms(started),
                    });
                }
            }
        }

        info!(run_id = %run_id, steps = steps.len(), "run passed");
        Ok(RunReport {
            run_id,
            status: StepStatus::Passed,
            steps,
            failure: None,
            work_dir: self.work_dir.clone(),
            duration_ms: elapsed_ms(started),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail(
        &self,
        index: usize,
        step: &CompiledStep,
        err: StepError,
        stack: &PageStack,
        collector: &FailureCollector,
        log: &mut StepLog,
        duration_ms: u64,
    ) -> Result<(StepLogEntry, FailureReport), FlowError> {
        let shot = self.failure_screenshots(index, step, stack.active()).await;
        let bundle = collector
            .collect(FailureSite {
                step_index: index,
                step_type: &step.kind,
                error: &err,
                active: stack.active(),
                main: stack.main(),
            })
            .await;
        let entry = StepLogEntry::failed(index, step.kind.clone(), duration_ms).with_screenshot(shot);
        log.append(&entry).await?;

        Ok((
            entry,
            FailureReport {
                index,
                step_type: step.kind.clone(),
                error_code: err.code().to_string(),
                message: err.to_string(),
                bundle,
            },
        ))
    }
}

#[async_trait]
impl ScenarioRunner for DefaultScenarioRunner {
    async fn run(&self, scenario: &CompiledScenario) -> Result<RunReport, FlowError> {
        let outcome = AssertUnwindSafe(self.run_steps(scenario))
            .catch_unwind()
            .await;

        if let Err(err) = self.driver.close().await {
            warn!(error = %err, "failed to close browser session");
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
