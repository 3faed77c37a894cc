use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::condition::SuccessCondition;

/// Closed set of step kinds the executor knows how to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Go,
    Click,
    Fill,
    ClickPopup,
    #[serde(alias = "popup_go")]
    PopupOpen,
    ClosePage,
    SwitchMain,
    EnsureLoggedIn,
    EnsureLoggedOut,
    ExpectText,
    ExpectVisible,
    ExpectUrl,
    WaitVisible,
    WaitUrl,
    Screenshot,
}

impl StepKind {
    pub const ALL: [StepKind; 15] = [
        StepKind::Go,
        StepKind::Click,
        StepKind::Fill,
        StepKind::ClickPopup,
        StepKind::PopupOpen,
        StepKind::ClosePage,
        StepKind::SwitchMain,
        StepKind::EnsureLoggedIn,
        StepKind::EnsureLoggedOut,
        StepKind::ExpectText,
        StepKind::ExpectVisible,
        StepKind::ExpectUrl,
        StepKind::WaitVisible,
        StepKind::WaitUrl,
        StepKind::Screenshot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Go => "go",
            StepKind::Click => "click",
            StepKind::Fill => "fill",
            StepKind::ClickPopup => "click_popup",
            StepKind::PopupOpen => "popup_open",
            StepKind::ClosePage => "close_page",
            StepKind::SwitchMain => "switch_main",
            StepKind::EnsureLoggedIn => "ensure_logged_in",
            StepKind::EnsureLoggedOut => "ensure_logged_out",
            StepKind::ExpectText => "expect_text",
            StepKind::ExpectVisible => "expect_visible",
            StepKind::ExpectUrl => "expect_url",
            StepKind::WaitVisible => "wait_visible",
            StepKind::WaitUrl => "wait_url",
            StepKind::Screenshot => "screenshot",
        }
    }

    /// Looks a kind up by its wire tag. `popup_go` is an accepted alias.
    pub fn parse(tag: &str) -> Option<Self> {
        if tag == "popup_go" {
            return Some(StepKind::PopupOpen);
        }
        Self::ALL.iter().copied().find(|kind| kind.as_str() == tag)
    }

    /// Steps that only assert text or visibility and can be folded into a
    /// preceding click as a success condition.
    pub fn is_visibility_assertion(&self) -> bool {
        matches!(
            self,
            StepKind::ExpectText | StepKind::ExpectVisible | StepKind::WaitVisible
        )
    }

    /// Steps that only assert the page URL.
    pub fn is_url_assertion(&self) -> bool {
        matches!(self, StepKind::ExpectUrl | StepKind::WaitUrl)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown step type '{s}'"))
    }
}

/// Frame targeting recorded alongside a step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameHint {
    #[serde(default, alias = "is_top")]
    pub is_top: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl FrameHint {
    /// True when the hint names something other than the top document.
    pub fn targets_subframe(&self) -> bool {
        !self.is_top && (self.href.is_some() || self.name.is_some())
    }
}

/// Fields shared by raw and compiled steps.
///
/// Unknown keys land in `extra` and are written back unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(
        default,
        alias = "ariaLabel",
        alias = "aria-label",
        skip_serializing_if = "Option::is_none"
    )]
    pub aria_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<FrameHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popup_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_out_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StepFields {
    /// Delay applied after the step passes. `delay_ms` wins over `delay`.
    pub fn post_delay_ms(&self) -> Option<u64> {
        self.delay_ms
            .or(self.delay)
            .and_then(|ms| u64::try_from(ms).ok())
            .filter(|ms| *ms > 0)
    }

    /// `text`, falling back to `params.text` as older recordings store it.
    pub fn effective_text(&self) -> Option<String> {
        if let Some(text) = self.text.as_ref().filter(|t| !t.is_empty()) {
            return Some(text.clone());
        }
        self.params
            .as_ref()
            .and_then(|params| params.get("text"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

/// A step exactly as recorded or authored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStep {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub selectors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_conditions: Option<Vec<SuccessCondition>>,
    #[serde(flatten)]
    pub fields: StepFields,
}

impl RawStep {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn step_kind(&self) -> Option<StepKind> {
        StepKind::parse(&self.kind)
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.fields.selector = Some(selector.into());
        self
    }

    pub fn with_selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selectors = Some(selectors.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.fields.text = Some(text.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.fields.url = Some(url.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.fields.value = Some(value.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.fields.role = Some(role.into());
        self
    }

    pub fn with_frame(mut self, frame: FrameHint) -> Self {
        self.fields.frame = Some(frame);
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.fields.timeout = Some(timeout_ms);
        self
    }
}

/// A step enriched with ranked selector candidates and OR-combined success
/// conditions. Serialises with the same keys as a raw step, so a compiled
/// document can be loaded back as-is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledStep {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(
        rename = "selectors",
        default,
        deserialize_with = "many_or_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub selector_candidates: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_conditions: Vec<SuccessCondition>,
    #[serde(flatten)]
    pub fields: StepFields,
}

impl CompiledStep {
    pub fn step_kind(&self) -> Option<StepKind> {
        StepKind::parse(&self.kind)
    }

    /// Candidates to try in order: the compiled list, or the lone selector.
    pub fn candidates(&self) -> Vec<String> {
        if !self.selector_candidates.is_empty() {
            return self.selector_candidates.clone();
        }
        self.fields
            .selector
            .iter()
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .collect()
    }
}

impl From<RawStep> for CompiledStep {
    /// Pass-through conversion: no candidates are generated and no
    /// conditions inferred.
    fn from(raw: RawStep) -> Self {
        Self {
            kind: raw.kind,
            selector_candidates: raw.selectors.unwrap_or_default(),
            success_conditions: raw.success_conditions.unwrap_or_default(),
            fields: raw.fields,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<OneOrMany>::deserialize(deserializer)?;
    Ok(value.map(|v| match v {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(list) => list,
    }))
}

fn many_or_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(one_or_many(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_kind_parses_from_its_tag() {
        for kind in StepKind::ALL {
            assert_eq!(StepKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(StepKind::parse("popup_go"), Some(StepKind::PopupOpen));
        assert_eq!(StepKind::parse("hover"), None);
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = json!({
            "type": "click",
            "selector": "#go",
            "recorder_ts": 1712,
            "meta": {"source": "ext"}
        });
        let step: RawStep = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(step.fields.extra.get("recorder_ts"), Some(&json!(1712)));
        assert_eq!(serde_json::to_value(&step).unwrap(), raw);
    }

    #[test]
    fn selectors_accepts_a_single_string() {
        let step: RawStep =
            serde_json::from_value(json!({"type": "click", "selectors": "#only"})).unwrap();
        assert_eq!(step.selectors, Some(vec!["#only".to_string()]));
    }

    #[test]
    fn params_text_is_used_when_text_is_missing() {
        let step: RawStep = serde_json::from_value(
            json!({"type": "expect_text", "params": {"text": "Hello"}}),
        )
        .unwrap();
        assert_eq!(step.fields.effective_text().as_deref(), Some("Hello"));
    }

    #[test]
    fn frame_hint_reads_recorder_shape() {
        let step: RawStep = serde_json::from_value(json!({
            "type": "click",
            "selector": "#pay",
            "frame": {"isTop": false, "name": "checkout", "href": "https://pay.test/frame"}
        }))
        .unwrap();
        let frame = step.fields.frame.unwrap();
        assert!(frame.targets_subframe());
        assert_eq!(frame.name.as_deref(), Some("checkout"));
    }

    #[test]
    fn post_delay_ignores_negative_values() {
        let mut fields = StepFields {
            delay: Some(250),
            ..Default::default()
        };
        assert_eq!(fields.post_delay_ms(), Some(250));
        fields.delay_ms = Some(-5);
        assert_eq!(fields.post_delay_ms(), None);
    }

    #[test]
    fn compiled_candidates_fall_back_to_selector() {
        let compiled = CompiledStep::from(RawStep::new("click").with_selector("#a"));
        assert_eq!(compiled.candidates(), vec!["#a".to_string()]);
    }
}
