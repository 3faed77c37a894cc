use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use scenario_compiler::validate;

use super::output::render_issues;
use crate::scenario::load_scenario;

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Scenario file (JSON or YAML)
    pub scenario: PathBuf,
}

pub async fn cmd_validate(args: ValidateArgs) -> Result<ExitCode> {
    let raw = load_scenario(&args.scenario).await?;
    let issues = validate(&raw);
    if issues.is_empty() {
        println!(
            "{} is valid ({} steps)",
            args.scenario.display(),
            raw.steps.len()
        );
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{} has {} issue(s):",
        args.scenario.display(),
        issues.len()
    );
    print!("{}", render_issues(&issues));
    Ok(ExitCode::FAILURE)
}
