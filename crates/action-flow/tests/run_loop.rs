use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use action_flow::{
    DefaultScenarioRunner, ExecutorTimings, FlowConfig, RunReport, ScenarioRunner,
    CHECKPOINT_FILE, FAILURE_CONTEXT_FILE, FAIL_SCREENSHOT, STEP_LOG_FILE,
};
use action_gate::{ConditionGate, ConditionMatch, GateRequest};
use action_primitives::fake::{FakeDriver, FakeEffect, FakeElement};
use async_trait::async_trait;
use futures::FutureExt;
use scenario_compiler::compile;
use scenario_core_types::{
    FailureArtifactBundle, FrameHint, RawScenario, RawStep, StepLogEntry, StepStatus,
};

fn config() -> FlowConfig {
    FlowConfig {
        timings: ExecutorTimings::instant(),
        ..FlowConfig::default()
    }
}

async fn run(driver: &Arc<FakeDriver>, dir: &Path, raw: RawScenario) -> RunReport {
    let compiled = compile(&raw).document;
    DefaultScenarioRunner::new(driver.clone(), config(), dir)
        .run(&compiled)
        .await
        .unwrap()
}

fn step_log(dir: &Path) -> Vec<StepLogEntry> {
    std::fs::read_to_string(dir.join(STEP_LOG_FILE))
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn shop(steps: Vec<RawStep>) -> RawScenario {
    RawScenario::from_steps(Some("https://shop.test/".into()), steps)
}

#[tokio::test]
async fn go_then_wait_url_passes() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());

    let report = run(
        &driver,
        dir.path(),
        shop(vec![
            RawStep::new("go").with_url("/login"),
            RawStep::new("wait_url").with_url("/login*"),
        ]),
    )
    .await;

    assert!(report.passed());
    assert!(report.failure.is_none());
    assert_eq!(driver.url_of(&driver.main_page()).as_deref(), Some("https://shop.test/login"));

    let log = step_log(dir.path());
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].index, 1);
    assert_eq!(log[0].step_type, "go");
    assert_eq!(log[1].status, StepStatus::Passed);
    assert_eq!(log[0].screenshot_ref.as_deref(), Some("step_001_go.png"));
    assert!(dir.path().join("step_002_wait_url.png").exists());
    assert!(!dir.path().join(FAILURE_CONTEXT_FILE).exists());
    assert!(driver.is_closed());
}

#[tokio::test]
async fn redirected_login_fails_wait_url() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.redirect("https://shop.test/login", "https://shop.test/blocked");

    let report = run(
        &driver,
        dir.path(),
        shop(vec![
            RawStep::new("go").with_url("/login"),
            RawStep::new("wait_url").with_url("/login*"),
            RawStep::new("screenshot"),
        ]),
    )
    .await;

    assert_eq!(report.status, StepStatus::Failed);
    let failure = report.failure.unwrap();
    assert_eq!(failure.index, 2);
    assert_eq!(failure.step_type, "wait_url");
    assert_eq!(failure.error_code, "SUCCESS_CONDITION_TIMEOUT");
    assert_eq!(
        failure.bundle.current_url.as_deref(),
        Some("https://shop.test/blocked")
    );

    let log = step_log(dir.path());
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].status, StepStatus::Failed);
    assert_eq!(log[1].screenshot_ref.as_deref(), Some("step_002_wait_url_FAIL.png"));
    assert!(dir.path().join(FAIL_SCREENSHOT).exists());
    assert!(dir.path().join("failure_step_002.png").exists());
    assert!(dir.path().join("failure_step_002.html").exists());

    let written: FailureArtifactBundle = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join(FAILURE_CONTEXT_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(written.step_index, 2);
    assert_eq!(driver.count_calls("screenshot shot.png"), 0);
    assert!(driver.is_closed());
}

#[tokio::test]
async fn text_only_expect_text_matches_page_text() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.add_text(&driver.main_context(), "Welcome back");

    let report = run(
        &driver,
        dir.path(),
        shop(vec![RawStep::new("expect_text").with_text("Welcome back")]),
    )
    .await;
    assert!(report.passed());

    let dir = tempfile::tempdir().unwrap();
    let report = run(
        &driver,
        dir.path(),
        shop(vec![RawStep::new("expect_text").with_text("Goodbye")]),
    )
    .await;
    assert_eq!(report.failure.unwrap().error_code, "ASSERTION_FAILED");
}

#[tokio::test]
async fn absorbed_assertion_confirms_the_click() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.add_element(
        &driver.main_context(),
        "#save",
        FakeElement::new().on_click(FakeEffect::ShowText("Saved".into())),
    );

    let report = run(
        &driver,
        dir.path(),
        shop(vec![
            RawStep::new("click").with_selector("#save"),
            RawStep::new("expect_text").with_text("Saved"),
        ]),
    )
    .await;

    assert!(report.passed());
    assert_eq!(report.steps.len(), 1);
    assert_eq!(driver.count_calls("click native #save"), 1);
    assert!(dir.path().join(CHECKPOINT_FILE).exists());
}

#[tokio::test]
async fn click_popup_without_a_new_page_fails() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.add_element(&driver.main_context(), "#open", FakeElement::new());

    let report = run(
        &driver,
        dir.path(),
        shop(vec![RawStep::new("click_popup").with_selector("#open")]),
    )
    .await;

    let failure = report.failure.unwrap();
    assert_eq!(failure.error_code, "POPUP_NOT_OPENED");
    assert_eq!(failure.bundle.popup_page_list.len(), 1);
    assert!(failure.bundle.popup_page_list[0].is_main);
}

#[tokio::test]
async fn popup_steps_follow_the_page_stack() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.add_element(
        &driver.main_context(),
        "#pay",
        FakeElement::new().on_click(FakeEffect::OpenPopup {
            url: "https://pay.test/checkout".into(),
            texts: vec!["Pay now".into()],
        }),
    );
    let mut click_popup = RawStep::new("click_popup").with_selector("#pay");
    click_popup.fields.popup_url = Some("https://pay.test/*".into());

    let report = run(
        &driver,
        dir.path(),
        shop(vec![
            click_popup,
            RawStep::new("expect_text").with_text("Pay now"),
            RawStep::new("close_page"),
            RawStep::new("close_page"),
        ]),
    )
    .await;

    assert!(report.passed(), "{:?}", report.failure);
    assert_eq!(report.steps.len(), 4);
    assert_eq!(driver.open_page_ids(), vec![driver.main_page()]);
    assert_eq!(driver.count_calls("close_page"), 1);
}

#[tokio::test]
async fn popup_url_mismatch_is_an_assertion_failure() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.add_element(
        &driver.main_context(),
        "#help",
        FakeElement::new().on_click(FakeEffect::OpenPopup {
            url: "https://ads.test/".into(),
            texts: Vec::new(),
        }),
    );
    let mut click_popup = RawStep::new("click_popup").with_selector("#help");
    click_popup.fields.popup_url = Some("https://help.shop.test".into());

    let report = run(&driver, dir.path(), shop(vec![click_popup])).await;
    assert_eq!(report.failure.unwrap().error_code, "ASSERTION_FAILED");
}

#[tokio::test]
async fn failed_close_keeps_the_popup_active() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.add_element(
        &driver.main_context(),
        "#pay",
        FakeElement::new().on_click(FakeEffect::OpenPopup {
            url: "https://pay.test/checkout".into(),
            texts: Vec::new(),
        }),
    );
    driver.fail_close(true);

    let report = run(
        &driver,
        dir.path(),
        shop(vec![
            RawStep::new("click_popup").with_selector("#pay"),
            RawStep::new("close_page"),
        ]),
    )
    .await;

    let failure = report.failure.unwrap();
    assert_eq!(failure.index, 2);
    assert_eq!(failure.error_code, "DRIVER_ERROR");
    assert_eq!(
        failure.bundle.current_url.as_deref(),
        Some("https://pay.test/checkout")
    );
    assert_eq!(driver.open_page_ids().len(), 2);
}

#[tokio::test]
async fn exact_expect_url_still_runs_after_a_prefix_match() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.add_element(
        &driver.main_context(),
        "#next",
        FakeElement::new().on_click(FakeEffect::Navigate("https://shop.test/done/extra".into())),
    );

    let report = run(
        &driver,
        dir.path(),
        shop(vec![
            RawStep::new("click").with_selector("#next"),
            RawStep::new("expect_url").with_url("https://shop.test/done"),
        ]),
    )
    .await;

    let failure = report.failure.unwrap();
    assert_eq!(failure.index, 2);
    assert_eq!(failure.step_type, "expect_url");
    assert_eq!(failure.error_code, "ASSERTION_FAILED");
    assert_eq!(driver.count_calls("click native #next"), 1);
}

#[tokio::test]
async fn expect_text_matches_part_of_the_page_text() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.add_text(&driver.main_context(), "Hello, world");

    let report = run(
        &driver,
        dir.path(),
        shop(vec![RawStep::new("expect_text").with_text("Hello")]),
    )
    .await;
    assert!(report.passed(), "{:?}", report.failure);

    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.add_element(
        &driver.main_context(),
        "#save",
        FakeElement::new().on_click(FakeEffect::ShowText("Saved successfully".into())),
    );
    let report = run(
        &driver,
        dir.path(),
        shop(vec![
            RawStep::new("click").with_selector("#save"),
            RawStep::new("expect_text").with_text("Saved"),
        ]),
    )
    .await;
    assert!(report.passed(), "{:?}", report.failure);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(driver.count_calls("click native #save"), 1);
}

#[tokio::test]
async fn switch_main_returns_to_the_first_page() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.set_url(&driver.main_page(), "https://shop.test/");

    let report = run(
        &driver,
        dir.path(),
        shop(vec![
            RawStep::new("popup_open").with_url("/terms"),
            RawStep::new("expect_url").with_url("https://shop.test/terms"),
            RawStep::new("switch_main"),
            RawStep::new("expect_url").with_url("https://shop.test/"),
        ]),
    )
    .await;

    assert!(report.passed(), "{:?}", report.failure);
    assert_eq!(driver.open_page_ids().len(), 2);
}

#[tokio::test]
async fn missing_frame_is_not_redirected_to_the_page() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.add_element(&driver.main_context(), "#card", FakeElement::new());
    let frame = FrameHint {
        is_top: false,
        name: None,
        href: Some("https://pay.test/frame".into()),
    };

    let report = run(
        &driver,
        dir.path(),
        shop(vec![RawStep::new("click")
            .with_selector("#card")
            .with_frame(frame.clone())]),
    )
    .await;
    assert_eq!(report.failure.unwrap().error_code, "FRAME_RESOLUTION_FAILED");
    assert_eq!(driver.count_calls("click native"), 0);

    let frame_ctx = driver.add_frame(&driver.main_page(), "pay", "https://pay.test/frame?id=7");
    driver.add_element(&frame_ctx, "#card", FakeElement::new());
    let dir = tempfile::tempdir().unwrap();
    let report = run(
        &driver,
        dir.path(),
        shop(vec![RawStep::new("click").with_selector("#card").with_frame(frame)]),
    )
    .await;
    assert!(report.passed(), "{:?}", report.failure);
}

#[tokio::test]
async fn login_state_reads_the_account_indicator() {
    let driver = Arc::new(FakeDriver::new());
    driver.add_element(
        &driver.main_context(),
        "#btnUser",
        FakeElement::new().with_text("Kim 님"),
    );

    let dir = tempfile::tempdir().unwrap();
    let report = run(&driver, dir.path(), shop(vec![RawStep::new("ensure_logged_in")])).await;
    assert!(report.passed(), "{:?}", report.failure);

    let dir = tempfile::tempdir().unwrap();
    let report = run(&driver, dir.path(), shop(vec![RawStep::new("ensure_logged_out")])).await;
    assert_eq!(report.failure.unwrap().error_code, "ASSERTION_FAILED");
}

#[tokio::test]
async fn unknown_step_type_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());

    let report = run(
        &driver,
        dir.path(),
        shop(vec![
            RawStep::new("hover").with_selector("#menu"),
            RawStep::new("go").with_url("/"),
        ]),
    )
    .await;

    let failure = report.failure.unwrap();
    assert_eq!(failure.index, 1);
    assert_eq!(failure.error_code, "UNKNOWN_STEP_TYPE");
    assert_eq!(report.steps.len(), 1);
    assert_eq!(driver.count_calls("navigate"), 0);
    assert!(driver.is_closed());
}

struct ExplodingGate;

#[async_trait]
impl ConditionGate for ExplodingGate {
    async fn evaluate(&self, _request: GateRequest<'_>) -> Option<ConditionMatch> {
        panic!("gate exploded");
    }
}

#[tokio::test]
async fn session_is_closed_when_a_step_panics() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.add_element(&driver.main_context(), "#save", FakeElement::new());
    let compiled = compile(&shop(vec![
        RawStep::new("click").with_selector("#save"),
        RawStep::new("expect_text").with_text("Saved"),
    ]))
    .document;
    let runner = DefaultScenarioRunner::new(driver.clone(), config(), dir.path())
        .with_gate(Arc::new(ExplodingGate));

    let outcome = AssertUnwindSafe(runner.run(&compiled)).catch_unwind().await;

    assert!(outcome.is_err());
    assert!(driver.is_closed());
}
