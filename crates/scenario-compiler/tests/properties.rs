use proptest::prelude::*;
use scenario_compiler::{compile, generate_ranked, CandidateHints};
use scenario_core_types::{RawScenario, RawStep};

const KINDS: &[&str] = &[
    "go",
    "click",
    "fill",
    "click_popup",
    "expect_text",
    "expect_visible",
    "expect_url",
    "wait_visible",
    "wait_url",
    "switch_main",
    "screenshot",
    "hover",
];

fn selector() -> impl Strategy<Value = String> {
    prop_oneof![
        "#[a-z]{1,8}",
        "#[a-z]{1,3}[0-9]{4,6}",
        "\\.[a-z]{1,10}",
        "div > li:nth-of-type\\([1-9]\\) a",
        "\\[data-qa=\"[a-z]{1,6}\"\\]",
        "form button\\.[a-z]{3,40}",
    ]
}

fn step() -> impl Strategy<Value = RawStep> {
    (
        prop::sample::select(KINDS),
        prop::option::of(selector()),
        prop::option::of("[A-Za-z ]{0,12}"),
        prop::option::of(prop_oneof!["/[a-z]{1,6}", "https://x\\.test/[a-z]{0,6}\\*?"]),
        prop::option::of(prop::sample::select(&["button", "link", "dialog"][..])),
    )
        .prop_map(|(kind, selector, text, url, role)| {
            let mut step = RawStep::new(kind);
            step.fields.selector = selector;
            step.fields.text = text;
            step.fields.url = url;
            step.fields.role = role.map(str::to_string);
            step
        })
}

fn scenario() -> impl Strategy<Value = RawScenario> {
    prop::collection::vec(step(), 0..12)
        .prop_map(|steps| RawScenario::from_steps(Some("https://x.test/".into()), steps))
}

proptest! {
    #[test]
    fn compile_is_deterministic(raw in scenario()) {
        let first = compile(&raw).document.to_json_pretty().unwrap();
        let second = compile(&raw).document.to_json_pretty().unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn compiled_never_grows(raw in scenario()) {
        let compiled = compile(&raw);
        prop_assert!(compiled.document.steps.len() <= raw.steps.len());
    }

    #[test]
    fn clicks_with_hints_have_candidates(raw in scenario()) {
        let compiled = compile(&raw);
        for step in compiled.document.steps.iter().filter(|s| s.kind == "click") {
            let has_selector = step.fields.selector.as_deref().is_some_and(|s| !s.trim().is_empty());
            let has_text = step.fields.text.as_deref().is_some_and(|t| !t.trim().is_empty());
            let has_role = step.fields.role.is_some();
            if has_selector || has_text || has_role {
                prop_assert!(!step.selector_candidates.is_empty());
            }
        }
    }

    #[test]
    fn candidates_follow_tier_order(
        role in prop::option::of("[a-z]{3,8}"),
        label in prop::option::of("[A-Za-z]{1,10}"),
        text in prop::option::of("[A-Za-z ]{1,12}"),
        selectors in prop::collection::vec(selector(), 0..4),
    ) {
        let hints = CandidateHints {
            role: role.as_deref(),
            label: label.as_deref(),
            text: text.as_deref(),
            selectors: selectors.iter().map(String::as_str).collect(),
            ..Default::default()
        };
        let ranked = generate_ranked(&hints);
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].tier <= pair[1].tier);
        }
        let mut seen = std::collections::HashSet::new();
        for candidate in &ranked {
            prop_assert!(seen.insert(candidate.selector.clone()));
        }
    }
}
