use clap::Subcommand;

use super::compile::CompileArgs;
use super::config::ConfigArgs;
use super::run::RunArgs;
use super::validate::ValidateArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Compile a recorded scenario into executable steps
    Compile(CompileArgs),

    /// Check a scenario for structural problems
    Validate(ValidateArgs),

    /// Run a scenario in Chromium
    Run(RunArgs),

    /// Configuration management
    Config(ConfigArgs),
}
