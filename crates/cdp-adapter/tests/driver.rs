use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use action_primitives::{BrowserDriver, ClickMode, ContextRef, DriverError, ElementHandle};
use async_trait::async_trait;
use cdp_adapter::{
    AdapterError, AdapterErrorKind, CdpConfig, CdpDriver, CdpTransport, CommandTarget,
    StorageState,
};
use scenario_core_types::{FrameId, PageId};
use serde_json::{json, Value};

/// Records every command and answers from per-method queues. The last
/// queued answer for a method repeats; unscripted methods answer `{}`.
#[derive(Default)]
struct MockTransport {
    commands: Mutex<Vec<(CommandTarget, String, Value)>>,
    responses: Mutex<HashMap<String, VecDeque<Result<Value, AdapterError>>>>,
    shut_down: AtomicBool,
}

impl MockTransport {
    fn respond(&self, method: &str, value: Value) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(value));
    }

    fn calls(&self, method: &str) -> Vec<(CommandTarget, Value)> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, m, _)| m == method)
            .map(|(target, _, params)| (target.clone(), params.clone()))
            .collect()
    }
}

#[async_trait]
impl CdpTransport for MockTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.commands
            .lock()
            .unwrap()
            .push((target, method.to_string(), params));
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(method) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => Ok(json!({})),
        }
    }

    async fn shutdown(&self) -> Result<(), AdapterError> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn targets(ids: &[&str]) -> Value {
    let infos: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "targetId": id, "type": "page", "url": format!("https://{id}.test/"), "title": id }))
        .collect();
    json!({ "targetInfos": infos })
}

fn driver_with(mock: &Arc<MockTransport>) -> CdpDriver {
    CdpDriver::new(mock.clone(), CdpConfig::default()).with_poll_interval(Duration::from_millis(1))
}

/// One open page `P1` attached as session `S1`.
fn single_page() -> (Arc<MockTransport>, CdpDriver, PageId) {
    let mock = Arc::new(MockTransport::default());
    mock.respond("Target.getTargets", targets(&["P1"]));
    mock.respond("Target.attachToTarget", json!({ "sessionId": "S1" }));
    let driver = driver_with(&mock);
    (mock, driver, PageId("P1".into()))
}

fn element(page: &PageId, selector: &str) -> ElementHandle {
    ElementHandle::new(ContextRef::Page(page.clone()), selector)
}

fn found_element(mock: &MockTransport) {
    mock.respond(
        "Runtime.evaluate",
        json!({ "result": { "type": "object", "subtype": "node", "objectId": "obj-1" } }),
    );
}

#[tokio::test]
async fn new_page_is_attached_and_emulated() {
    let mock = Arc::new(MockTransport::default());
    mock.respond("Target.createTarget", json!({ "targetId": "T1" }));
    mock.respond("Target.attachToTarget", json!({ "sessionId": "S1" }));
    let driver = driver_with(&mock);

    let page = driver.new_page().await.unwrap();

    assert_eq!(page, PageId("T1".into()));
    let metrics = mock.calls("Emulation.setDeviceMetricsOverride");
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].0, CommandTarget::Session("S1".into()));
    assert_eq!(metrics[0].1["width"], 1440);
    assert_eq!(
        mock.calls("Emulation.setTimezoneOverride")[0].1["timezoneId"],
        "Asia/Seoul"
    );
}

#[tokio::test]
async fn pages_keep_first_seen_order() {
    let mock = Arc::new(MockTransport::default());
    mock.respond("Target.getTargets", targets(&["A", "B"]));
    mock.respond(
        "Target.getTargets",
        json!({ "targetInfos": [
            { "targetId": "C", "type": "page", "url": "https://c.test/", "title": "C" },
            { "targetId": "W", "type": "service_worker", "url": "https://c.test/sw.js", "title": "" },
            { "targetId": "B", "type": "page", "url": "https://b.test/", "title": "B" },
            { "targetId": "A", "type": "page", "url": "https://a.test/", "title": "A" }
        ]}),
    );
    let driver = driver_with(&mock);

    let first: Vec<String> = driver.pages().await.unwrap().into_iter().map(|p| p.id.0).collect();
    let second: Vec<String> = driver.pages().await.unwrap().into_iter().map(|p| p.id.0).collect();

    assert_eq!(first, vec!["A", "B"]);
    assert_eq!(second, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn navigate_waits_until_the_document_is_parsed() {
    let (mock, driver, page) = single_page();
    mock.respond("Page.navigate", json!({ "frameId": "F0", "loaderId": "L1" }));
    mock.respond("Runtime.evaluate", json!({ "result": { "type": "string", "value": "loading" } }));
    mock.respond("Runtime.evaluate", json!({ "result": { "type": "string", "value": "interactive" } }));

    driver
        .navigate(&page, "https://shop.test/cart", Duration::from_secs(1))
        .await
        .unwrap();

    let navigations = mock.calls("Page.navigate");
    assert_eq!(navigations[0].0, CommandTarget::Session("S1".into()));
    assert_eq!(navigations[0].1["url"], "https://shop.test/cart");
    assert_eq!(mock.calls("Runtime.evaluate").len(), 2);
}

#[tokio::test]
async fn navigation_error_text_fails_the_navigation() {
    let (mock, driver, page) = single_page();
    mock.respond(
        "Page.navigate",
        json!({ "frameId": "F0", "errorText": "net::ERR_NAME_NOT_RESOLVED" }),
    );

    let err = driver
        .navigate(&page, "https://nowhere.test/", Duration::from_secs(1))
        .await
        .unwrap_err();

    match err {
        DriverError::Io(message) => assert!(message.contains("ERR_NAME_NOT_RESOLVED")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_element_is_not_found_and_not_visible() {
    let (mock, driver, page) = single_page();
    mock.respond(
        "Runtime.evaluate",
        json!({ "result": { "type": "object", "subtype": "null", "value": null } }),
    );
    let handle = element(&page, "#ghost");

    assert!(!driver.is_visible(&handle).await.unwrap());
    let err = driver.evaluate(&handle, "(el) => el.id").await.unwrap_err();
    assert_eq!(err, DriverError::NotFound("#ghost".into()));
}

#[tokio::test]
async fn wait_times_out_when_the_element_never_appears() {
    let (mock, driver, page) = single_page();
    mock.respond(
        "Runtime.evaluate",
        json!({ "result": { "type": "object", "subtype": "null", "value": null } }),
    );

    let err = driver
        .wait_for_state(
            &element(&page, "text=\"Saved\""),
            action_primitives::ElementState::Attached,
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout());
}

#[tokio::test]
async fn native_click_reports_interception() {
    let (mock, driver, page) = single_page();
    found_element(&mock);
    mock.respond("Runtime.callFunctionOn", json!({ "result": { "type": "boolean", "value": true } }));
    mock.respond("Runtime.callFunctionOn", json!({ "result": { "type": "boolean", "value": true } }));
    mock.respond("Runtime.callFunctionOn", json!({ "result": { "type": "boolean", "value": false } }));

    let err = driver
        .click(&element(&page, "#buy"), ClickMode::Native, Duration::from_secs(1))
        .await
        .unwrap_err();

    assert_eq!(err, DriverError::Intercepted("#buy".into()));
    assert!(mock.calls("Input.dispatchMouseEvent").is_empty());
}

#[tokio::test]
async fn forced_click_presses_at_the_box_centre() {
    let (mock, driver, page) = single_page();
    found_element(&mock);
    mock.respond("Runtime.callFunctionOn", json!({ "result": { "type": "boolean", "value": true } }));
    mock.respond(
        "DOM.getContentQuads",
        json!({ "quads": [[10.0, 20.0, 110.0, 20.0, 110.0, 60.0, 10.0, 60.0]] }),
    );

    driver
        .click(&element(&page, "#buy"), ClickMode::Forced, Duration::from_secs(1))
        .await
        .unwrap();

    let events = mock.calls("Input.dispatchMouseEvent");
    let kinds: Vec<&str> = events.iter().map(|(_, p)| p["type"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["mouseMoved", "mousePressed", "mouseReleased"]);
    assert_eq!(events[1].1["x"], 60.0);
    assert_eq!(events[1].1["y"], 40.0);
    assert_eq!(events[1].1["button"], "left");
}

#[tokio::test]
async fn frame_lookups_run_in_an_isolated_world() {
    let (mock, driver, page) = single_page();
    mock.respond("Page.createIsolatedWorld", json!({ "executionContextId": 42 }));
    found_element(&mock);
    mock.respond("Runtime.callFunctionOn", json!({ "result": { "type": "boolean", "value": true } }));
    let handle = ElementHandle::new(
        ContextRef::Frame {
            page: page.clone(),
            frame: FrameId("F1".into()),
        },
        "#card-number",
    );

    assert!(driver.is_visible(&handle).await.unwrap());

    assert_eq!(mock.calls("Page.createIsolatedWorld")[0].1["frameId"], "F1");
    let evaluation = &mock.calls("Runtime.evaluate")[0].1;
    assert_eq!(evaluation["contextId"], 42);
    assert!(evaluation["expression"]
        .as_str()
        .unwrap()
        .ends_with("(document, \"#card-number\")"));
}

#[tokio::test]
async fn full_page_screenshot_is_written_to_disk() {
    let (mock, driver, page) = single_page();
    mock.respond(
        "Page.getLayoutMetrics",
        json!({ "cssContentSize": { "x": 0, "y": 0, "width": 800.0, "height": 2000.0 } }),
    );
    mock.respond("Page.captureScreenshot", json!({ "data": "cG5nLWJ5dGVz" }));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shot.png");

    driver.screenshot(&page, &path, true).await.unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), b"png-bytes");
    let params = &mock.calls("Page.captureScreenshot")[0].1;
    assert_eq!(params["captureBeyondViewport"], true);
    assert_eq!(params["clip"]["height"], 2000.0);
}

#[tokio::test]
async fn unknown_page_is_reported_closed() {
    let mock = Arc::new(MockTransport::default());
    mock.respond("Target.getTargets", targets(&[]));
    let driver = driver_with(&mock);

    let err = driver.current_url(&PageId("gone".into())).await.unwrap_err();

    assert!(matches!(err, DriverError::Closed(_)));
    assert!(mock.calls("Target.attachToTarget").is_empty());
}

#[tokio::test]
async fn new_page_is_found_once_it_appears() {
    let mock = Arc::new(MockTransport::default());
    mock.respond("Target.getTargets", targets(&["A"]));
    mock.respond("Target.getTargets", targets(&["A"]));
    mock.respond("Target.getTargets", targets(&["A", "POP"]));
    mock.respond("Target.attachToTarget", json!({ "sessionId": "S-pop" }));
    let driver = driver_with(&mock);
    let known = vec![PageId("A".into())];

    let popup = driver
        .wait_for_new_page(&known, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(popup, PageId("POP".into()));
    assert_eq!(mock.calls("Target.attachToTarget")[0].1["targetId"], "POP");
}

#[tokio::test]
async fn transport_failures_surface_as_driver_errors() {
    let (mock, driver, page) = single_page();
    mock.responses
        .lock()
        .unwrap()
        .entry("Page.getFrameTree".into())
        .or_default()
        .push_back(Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint("socket reset")));

    let err = driver.frames(&page).await.unwrap_err();

    assert_eq!(err, DriverError::Io("cdp i/o failure: socket reset".into()));
}

#[tokio::test]
async fn storage_cookies_go_to_the_first_page() {
    let (mock, driver, _page) = single_page();
    let state: StorageState = serde_json::from_value(json!({
        "cookies": [{ "name": "SID", "value": "abc", "domain": ".shop.test", "path": "/" }]
    }))
    .unwrap();

    let applied = driver.apply_storage_state(&state).await.unwrap();

    assert_eq!(applied, 1);
    let calls = mock.calls("Network.setCookies");
    assert_eq!(calls[0].0, CommandTarget::Session("S1".into()));
    assert_eq!(calls[0].1["cookies"][0]["name"], "SID");
}

#[tokio::test]
async fn close_shuts_the_transport_down() {
    let (mock, driver, _page) = single_page();
    driver.close().await.unwrap();
    assert!(mock.shut_down.load(Ordering::SeqCst));
}
