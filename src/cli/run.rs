use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use action_flow::{DefaultScenarioRunner, ScenarioRunner};
use action_primitives::BrowserDriver;
use anyhow::{bail, Context, Result};
use cdp_adapter::{CdpDriver, StorageState};
use clap::Args;
use scenario_compiler::validate;
use tracing::{info, warn};

use super::context::CliContext;
use super::output::{render_issues, render_report, OutputFormat};
use crate::scenario::{load_scenario, log_warnings, prepare};

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Scenario file (JSON or YAML)
    pub scenario: PathBuf,

    /// Directory for the step log, screenshots and failure artifacts
    #[arg(long, value_name = "DIR")]
    pub work_dir: PathBuf,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Treat the steps as already compiled
    #[arg(long)]
    pub no_compile: bool,

    /// Report format
    #[arg(short, long, value_enum, default_value = "human")]
    pub output: OutputFormat,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<ExitCode> {
    let raw = load_scenario(&args.scenario).await?;
    let issues = validate(&raw);
    if !issues.is_empty() {
        eprint!("{}", render_issues(&issues));
        bail!(
            "{} has {} validation issue(s); not running",
            args.scenario.display(),
            issues.len()
        );
    }

    let prepared = prepare(raw, args.no_compile);
    log_warnings(&prepared.warnings);
    let scenario = prepared.document;

    let mut config = ctx.config().clone();
    if args.headed {
        config.browser.headless = false;
    }

    let storage = match config.flow.auth.storage_state_path.as_deref() {
        Some(path) => Some(
            StorageState::load(Path::new(path))
                .await
                .with_context(|| format!("loading storage state {path}"))?,
        ),
        None => None,
    };
    if scenario.requires_auth && storage.is_none() {
        bail!(
            "scenario requires authentication but no storage state is configured \
             (auth.storage_state_path or SCENARIO_STORAGE_STATE)"
        );
    }

    let driver = Arc::new(
        CdpDriver::launch(config.browser.clone())
            .await
            .context("launching Chromium")?,
    );
    if let Some(state) = &storage {
        match driver.apply_storage_state(state).await {
            Ok(count) => info!(cookies = count, "applied storage state"),
            Err(err) => {
                if let Err(close_err) = driver.close().await {
                    warn!(error = %close_err, "closing browser after storage state failure");
                }
                return Err(err).context("applying storage state");
            }
        }
    }

    info!(
        scenario = %args.scenario.display(),
        steps = scenario.steps.len(),
        work_dir = %args.work_dir.display(),
        "starting run"
    );
    let runner = DefaultScenarioRunner::new(driver, config.flow.clone(), &args.work_dir);
    let report = runner.run(&scenario).await.context("running scenario")?;

    print!("{}", render_report(&report, args.output)?);
    if args.output == OutputFormat::Json {
        println!();
    }
    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
