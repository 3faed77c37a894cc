//! Selector candidate generation.
//!
//! Candidates are ranked by how likely they are to survive markup drift:
//! accessible-name locators first, then exact text, stable attributes,
//! the recorded CSS with positional qualifiers removed, and finally the
//! recorded CSS verbatim.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Priority tier of a candidate, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CandidateTier {
    /// role / label / aria-label
    Accessible,
    /// `text="..."`
    ExactText,
    /// `#id`, short `.class`, `[data-*]`
    StableAttribute,
    /// recorded selector without `:nth-of-type(n)`
    SimplifiedCss,
    /// recorded selector verbatim
    OriginalCss,
}

impl CandidateTier {
    pub fn name(&self) -> &'static str {
        match self {
            CandidateTier::Accessible => "accessible",
            CandidateTier::ExactText => "exact-text",
            CandidateTier::StableAttribute => "stable-attribute",
            CandidateTier::SimplifiedCss => "simplified-css",
            CandidateTier::OriginalCss => "original-css",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub tier: CandidateTier,
    pub selector: String,
}

/// Locator hints pulled from one step.
#[derive(Debug, Clone, Default)]
pub struct CandidateHints<'a> {
    pub role: Option<&'a str>,
    pub label: Option<&'a str>,
    pub aria_label: Option<&'a str>,
    pub text: Option<&'a str>,
    pub selectors: Vec<&'a str>,
}

impl<'a> CandidateHints<'a> {
    /// Only the recorded CSS selectors, no accessibility or text hints.
    pub fn css_only(selectors: Vec<&'a str>) -> Self {
        Self {
            selectors,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        non_blank(self.role).is_none()
            && non_blank(self.label).is_none()
            && non_blank(self.aria_label).is_none()
            && non_blank(self.text).is_none()
            && self.selectors.iter().all(|s| s.trim().is_empty())
    }
}

static STABLE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#[A-Za-z_][\w-]*$").expect("valid regex"));
static SHORT_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.[A-Za-z_][\w-]{0,31}$").expect("valid regex"));
static DATA_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\[data-[\w-]+(?:[~|^$*]?=(?:"[^"]*"|'[^']*'|[^\]]*))?\]$"#).expect("valid regex"));
static EMBEDDED_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"#([A-Za-z_][\w-]*)").expect("valid regex"));
static EMBEDDED_DATA_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\[data-[\w-]+(?:[~|^$*]?=(?:"[^"]*"|'[^']*'|[^\]]*))?\]"#).expect("valid regex"));
static NTH_OF_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":nth-of-type\(\s*\d+\s*\)").expect("valid regex"));
static ATTRIBUTE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]").expect("valid regex"));
static GENERATED_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4,}").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Quotes a locator argument, escaping backslashes and double quotes.
pub fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `text="..."` with whitespace collapsed. Matches the whole element text.
pub fn text_selector(text: &str) -> String {
    format!("text={}", quote(&normalize_space(text)))
}

/// Unquoted `text=...`: case-insensitive substring match. Used by
/// assertions, waits and success conditions, which look for text anywhere
/// in an element rather than an element that is exactly that text.
pub fn text_contains_selector(text: &str) -> String {
    format!("text={}", normalize_space(text))
}

fn normalize_space(value: &str) -> String {
    WHITESPACE.replace_all(value.trim(), " ").into_owned()
}

/// True for selectors that name an element by an attribute authors rarely
/// change. Ids with long digit runs look generated and do not qualify.
pub fn is_stable_selector(selector: &str) -> bool {
    let selector = selector.trim();
    if STABLE_ID.is_match(selector) {
        return !GENERATED_DIGITS.is_match(selector);
    }
    SHORT_CLASS.is_match(selector) || DATA_ATTR.is_match(selector)
}

/// Stable fragments hidden in the last compound of a complex selector
/// (`div.card > button#save` yields `#save`).
fn embedded_stable_fragments(selector: &str) -> Vec<String> {
    let last = selector
        .rsplit(|c: char| c == '>' || c == '+' || c == '~' || c.is_whitespace())
        .find(|part| !part.is_empty())
        .unwrap_or(selector);

    let mut found = Vec::new();
    for cap in EMBEDDED_DATA_ATTR.find_iter(last) {
        found.push(cap.as_str().to_string());
    }
    let without_attributes = ATTRIBUTE_BLOCK.replace_all(last, "");
    for cap in EMBEDDED_ID.captures_iter(&without_attributes) {
        let id = format!("#{}", &cap[1]);
        if !GENERATED_DIGITS.is_match(&id) {
            found.push(id);
        }
    }
    found
}

/// Recorded selector with `:nth-of-type(n)` removed and whitespace collapsed.
pub fn simplify_selector(selector: &str) -> String {
    normalize_space(&NTH_OF_TYPE.replace_all(selector, ""))
}

/// Generates ranked candidates, de-duplicated in first-seen order.
pub fn generate_ranked(hints: &CandidateHints<'_>) -> Vec<RankedCandidate> {
    let mut out: Vec<RankedCandidate> = Vec::new();
    let mut push = |tier: CandidateTier, selector: String| {
        if selector.trim().is_empty() || out.iter().any(|c| c.selector == selector) {
            return;
        }
        out.push(RankedCandidate { tier, selector });
    };

    let role = non_blank(hints.role);
    let label = non_blank(hints.label);
    let aria_label = non_blank(hints.aria_label);
    let text = non_blank(hints.text);

    if let Some(role) = role {
        match aria_label.or(label) {
            Some(name) => push(
                CandidateTier::Accessible,
                format!("role={role}[name={}]", quote(&normalize_space(name))),
            ),
            None => push(CandidateTier::Accessible, format!("role={role}")),
        }
    }
    if let Some(label) = label {
        push(CandidateTier::Accessible, format!("label={}", quote(&normalize_space(label))));
    }
    if let Some(aria_label) = aria_label {
        push(
            CandidateTier::Accessible,
            format!("[aria-label={}]", quote(aria_label)),
        );
    }

    if let Some(text) = text {
        push(CandidateTier::ExactText, text_selector(text));
    }

    let originals: Vec<&str> = hints
        .selectors
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    for selector in &originals {
        if is_stable_selector(selector) {
            push(CandidateTier::StableAttribute, selector.to_string());
        } else {
            for fragment in embedded_stable_fragments(selector) {
                push(CandidateTier::StableAttribute, fragment);
            }
        }
    }

    for selector in &originals {
        let simplified = simplify_selector(selector);
        if simplified != *selector {
            push(CandidateTier::SimplifiedCss, simplified);
        }
    }

    for selector in &originals {
        push(CandidateTier::OriginalCss, selector.to_string());
    }

    out
}

/// Candidate selectors in priority order.
pub fn generate_candidates(hints: &CandidateHints<'_>) -> Vec<String> {
    generate_ranked(hints)
        .into_iter()
        .map(|candidate| candidate.selector)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers(hints: &CandidateHints<'_>) -> Vec<(CandidateTier, String)> {
        generate_ranked(hints)
            .into_iter()
            .map(|c| (c.tier, c.selector))
            .collect()
    }

    #[test]
    fn follows_priority_order() {
        let hints = CandidateHints {
            role: Some("button"),
            aria_label: Some("Save draft"),
            text: Some("Save"),
            selectors: vec!["div.toolbar > button:nth-of-type(2)#save"],
            ..Default::default()
        };
        assert_eq!(
            tiers(&hints),
            vec![
                (
                    CandidateTier::Accessible,
                    "role=button[name=\"Save draft\"]".to_string()
                ),
                (
                    CandidateTier::Accessible,
                    "[aria-label=\"Save draft\"]".to_string()
                ),
                (CandidateTier::ExactText, "text=\"Save\"".to_string()),
                (CandidateTier::StableAttribute, "#save".to_string()),
                (
                    CandidateTier::SimplifiedCss,
                    "div.toolbar > button#save".to_string()
                ),
                (
                    CandidateTier::OriginalCss,
                    "div.toolbar > button:nth-of-type(2)#save".to_string()
                ),
            ]
        );
    }

    #[test]
    fn stable_selector_is_not_repeated_as_original() {
        let hints = CandidateHints::css_only(vec!["#login"]);
        assert_eq!(generate_candidates(&hints), vec!["#login".to_string()]);
    }

    #[test]
    fn generated_ids_are_not_promoted() {
        assert!(!is_stable_selector("#ember12345"));
        assert!(is_stable_selector("#submit-btn"));
        assert!(is_stable_selector(".primary"));
        assert!(is_stable_selector("[data-testid=\"pay\"]"));
        assert!(!is_stable_selector(".a .b"));
        assert!(!is_stable_selector(".this-class-name-is-much-too-long-to-be-stable"));
    }

    #[test]
    fn data_attributes_are_extracted_from_compounds() {
        let hints = CandidateHints::css_only(vec!["ul > li:nth-of-type(3) a[data-qa=\"menu-item\"]"]);
        let candidates = generate_candidates(&hints);
        assert_eq!(candidates[0], "[data-qa=\"menu-item\"]");
        assert_eq!(candidates[1], "ul > li a[data-qa=\"menu-item\"]");
        assert_eq!(candidates[2], "ul > li:nth-of-type(3) a[data-qa=\"menu-item\"]");
    }

    #[test]
    fn quotes_are_escaped_in_text_locators() {
        assert_eq!(text_selector("Say \"hi\"\n now"), r#"text="Say \"hi\" now""#);
        assert_eq!(text_contains_selector("  Hello,\n  world "), "text=Hello, world");
    }

    #[test]
    fn label_without_role_is_accessible_tier() {
        let hints = CandidateHints {
            label: Some("Email"),
            selectors: vec!["input[name=email]"],
            ..Default::default()
        };
        assert_eq!(
            generate_candidates(&hints),
            vec!["label=\"Email\"".to_string(), "input[name=email]".to_string()]
        );
    }

    #[test]
    fn blank_hints_produce_nothing() {
        let hints = CandidateHints {
            text: Some("   "),
            selectors: vec![" "],
            ..Default::default()
        };
        assert!(hints.is_empty());
        assert!(generate_candidates(&hints).is_empty());
    }
}
