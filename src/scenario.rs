//! Loading scenario documents from disk and getting them into executable form.

use std::path::Path;

use anyhow::{Context, Result};
use scenario_compiler::{compile, CompileWarning, Compiled};
use scenario_core_types::{parse_scenario, CompiledScenario, DocumentFormat, RawScenario};
use tokio::fs;
use tracing::{debug, warn};

/// Reads a JSON or YAML scenario. The extension picks the format; anything
/// else is sniffed from the content.
pub async fn load_scenario(path: &Path) -> Result<RawScenario> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let scenario = parse_scenario(&raw, DocumentFormat::from_path(path))
        .with_context(|| format!("parsing {}", path.display()))?;
    debug!(path = %path.display(), steps = scenario.steps.len(), "loaded scenario");
    Ok(scenario)
}

#[derive(Debug)]
pub struct Prepared {
    pub document: CompiledScenario,
    pub warnings: Vec<CompileWarning>,
    /// False when the document was taken as already compiled.
    pub compiled_now: bool,
}

/// Compiles `raw` unless it already carries `_meta.compiled` or the caller
/// asked to skip compilation.
pub fn prepare(raw: RawScenario, skip_compile: bool) -> Prepared {
    if raw.is_compiled() || skip_compile {
        return Prepared {
            document: raw.into_precompiled(),
            warnings: Vec::new(),
            compiled_now: false,
        };
    }
    let Compiled { document, warnings } = compile(&raw);
    Prepared {
        document,
        warnings,
        compiled_now: true,
    }
}

pub fn log_warnings(warnings: &[CompileWarning]) {
    for warning in warnings {
        warn!(
            index = warning.index,
            step_type = %warning.step_type,
            "compile warning: {}",
            warning.message
        );
    }
}
