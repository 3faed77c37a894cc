use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use tokio::fs;
use tracing::info;

use crate::scenario::{load_scenario, log_warnings, prepare};

#[derive(Args, Clone, Debug)]
pub struct CompileArgs {
    /// Scenario file (JSON or YAML)
    pub scenario: PathBuf,

    /// Write the compiled document here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

pub async fn cmd_compile(args: CompileArgs) -> Result<ExitCode> {
    let raw = load_scenario(&args.scenario).await?;
    let prepared = prepare(raw, false);
    if !prepared.compiled_now {
        info!(
            path = %args.scenario.display(),
            "scenario is already compiled; writing it unchanged"
        );
    }
    log_warnings(&prepared.warnings);

    let json = prepared
        .document
        .to_json_pretty()
        .context("serialising compiled scenario")?;
    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            fs::write(path, format!("{json}\n"))
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(
                steps = prepared.document.steps.len(),
                warnings = prepared.warnings.len(),
                "wrote compiled scenario to {}",
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(ExitCode::SUCCESS)
}
