use std::process::ExitCode;

use super::compile::cmd_compile;
use super::config::cmd_config;
use super::env::CliArgs;
use super::run::cmd_run;
use super::validate::cmd_validate;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<ExitCode> {
    match cli.command.clone() {
        Commands::Compile(args) => cmd_compile(args).await,
        Commands::Validate(args) => cmd_validate(args).await,
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx).await,
    }
}
