use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::errors::ScenarioError;
use crate::step::{CompiledStep, RawStep};

/// Version stamped into `_meta.compiler_version` of compiled documents.
pub const COMPILER_VERSION: &str = "1.0.0";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerMeta {
    #[serde(default)]
    pub compiled: bool,
    #[serde(default, alias = "compilerVersion")]
    pub compiler_version: String,
}

impl CompilerMeta {
    pub fn current() -> Self {
        Self {
            compiled: true,
            compiler_version: COMPILER_VERSION.to_string(),
        }
    }
}

/// A scenario: base URL, ordered steps and free-form configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDocument<S> {
    #[serde(default, alias = "baseUrl", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_auth: bool,
    #[serde(default)]
    pub steps: Vec<S>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<CompilerMeta>,
    #[serde(flatten)]
    pub config: BTreeMap<String, Value>,
}

impl<S> Default for ScenarioDocument<S> {
    fn default() -> Self {
        Self {
            base_url: None,
            requires_auth: false,
            steps: Vec::new(),
            meta: None,
            config: BTreeMap::new(),
        }
    }
}

impl<S> ScenarioDocument<S> {
    pub fn is_compiled(&self) -> bool {
        self.meta.as_ref().map(|meta| meta.compiled).unwrap_or(false)
    }

    /// Resolves a possibly relative step URL against `base_url`.
    pub fn resolve_url(&self, target: &str) -> String {
        resolve_url(self.base_url.as_deref(), target)
    }
}

/// Absolute URLs are returned unchanged; relative ones are joined onto
/// `base` when it parses, and returned verbatim otherwise.
pub fn resolve_url(base: Option<&str>, target: &str) -> String {
    if Url::parse(target).is_ok() {
        return target.to_string();
    }
    base.and_then(|base| Url::parse(base).ok())
        .and_then(|base| base.join(target).ok())
        .map(|joined| joined.to_string())
        .unwrap_or_else(|| target.to_string())
}

pub type RawScenario = ScenarioDocument<RawStep>;
pub type CompiledScenario = ScenarioDocument<CompiledStep>;

impl RawScenario {
    pub fn from_steps(base_url: Option<String>, steps: Vec<RawStep>) -> Self {
        Self {
            base_url,
            steps,
            ..Default::default()
        }
    }

    /// Reinterprets a document that already carries `_meta.compiled`.
    pub fn into_precompiled(self) -> CompiledScenario {
        ScenarioDocument {
            base_url: self.base_url,
            requires_auth: self.requires_auth,
            steps: self.steps.into_iter().map(CompiledStep::from).collect(),
            meta: self.meta,
            config: self.config,
        }
    }
}

impl CompiledScenario {
    /// Deterministic pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String, ScenarioError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => Some(DocumentFormat::Json),
            Some("yaml") | Some("yml") => Some(DocumentFormat::Yaml),
            _ => None,
        }
    }

    fn sniff(raw: &str) -> Self {
        match raw.trim_start().chars().next() {
            Some('{') | Some('[') => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }
}

/// Parses a scenario document. A bare step array is accepted as well.
pub fn parse_scenario(
    raw: &str,
    format: Option<DocumentFormat>,
) -> Result<RawScenario, ScenarioError> {
    if raw.trim().is_empty() {
        return Err(ScenarioError::Empty);
    }

    let value: Value = match format.unwrap_or_else(|| DocumentFormat::sniff(raw)) {
        DocumentFormat::Json => serde_json::from_str(raw)?,
        DocumentFormat::Yaml => serde_yaml::from_str(raw)?,
    };

    match value {
        Value::Array(_) => Ok(RawScenario::from_steps(
            None,
            serde_json::from_value(value)?,
        )),
        other => Ok(serde_json::from_value(other)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepKind;

    #[test]
    fn parses_json_with_camel_case_base_url() {
        let doc = parse_scenario(
            r#"{"baseUrl": "https://x.test", "steps": [{"type": "go", "url": "/"}], "viewport": "wide"}"#,
            None,
        )
        .unwrap();
        assert_eq!(doc.base_url.as_deref(), Some("https://x.test"));
        assert_eq!(doc.steps[0].step_kind(), Some(StepKind::Go));
        assert_eq!(doc.config.get("viewport"), Some(&Value::from("wide")));
        assert!(!doc.is_compiled());
    }

    #[test]
    fn parses_yaml_documents() {
        let yaml = "base_url: https://x.test\nrequires_auth: true\nsteps:\n  - type: click\n    selector: '#login'\n";
        let doc = parse_scenario(yaml, Some(DocumentFormat::Yaml)).unwrap();
        assert!(doc.requires_auth);
        assert_eq!(doc.steps[0].fields.selector.as_deref(), Some("#login"));
    }

    #[test]
    fn bare_step_arrays_are_scenarios() {
        let doc = parse_scenario(r#"[{"type": "switch_main"}]"#, None).unwrap();
        assert_eq!(doc.steps.len(), 1);
        assert!(doc.base_url.is_none());
    }

    #[test]
    fn compiled_documents_are_recognised() {
        let doc = parse_scenario(
            r##"{"steps": [{"type": "click", "selectors": ["#a", "#b"]}], "_meta": {"compiled": true, "compilerVersion": "1.0.0"}}"##,
            None,
        )
        .unwrap();
        assert!(doc.is_compiled());
        let compiled = doc.into_precompiled();
        assert_eq!(compiled.steps[0].selector_candidates, vec!["#a", "#b"]);
    }

    #[test]
    fn relative_urls_join_the_base() {
        assert_eq!(
            resolve_url(Some("https://x.test/app/"), "done?id=1"),
            "https://x.test/app/done?id=1"
        );
        assert_eq!(
            resolve_url(Some("https://x.test/app/"), "/login"),
            "https://x.test/login"
        );
        assert_eq!(resolve_url(Some("https://x.test"), "https://y.test/"), "https://y.test/");
        assert_eq!(resolve_url(None, "/login"), "/login");
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(parse_scenario("  ", None), Err(ScenarioError::Empty)));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/b.YML")),
            Some(DocumentFormat::Yaml)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("a/b.txt")), None);
    }
}
