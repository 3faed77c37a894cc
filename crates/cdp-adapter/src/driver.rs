//! [`BrowserDriver`] over raw DevTools commands.
//!
//! Pages are CDP targets attached in flat-session mode; a [`PageId`] is the
//! target id. Elements are resolved afresh for every operation by running
//! the in-page selector engine, either in the page's main world or in an
//! isolated world created for the requested frame.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use action_primitives::{
    poll_until, scripts, BoundingBox, BrowserDriver, ClickMode, ContextRef, DriverError,
    ElementHandle, ElementState, EventSequence, FrameInfo, PageInfo, DEFAULT_POLL_INTERVAL,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dashmap::DashMap;
use scenario_core_types::{FrameId, PageId};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::CdpConfig;
use crate::selectors::{self, COMMIT_FILL, DISPATCH_CLICK, DISPATCH_INPUT, HIT_TEST, PREPARE_FILL};
use crate::storage::StorageState;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget};

const WORLD_NAME: &str = "scenario-runner";
const OBJECT_GROUP: &str = "scenario-runner";

/// Element resolved to a remote object in one session.
struct RemoteElement {
    session: String,
    object_id: String,
}

#[derive(Clone, Debug)]
struct TargetSummary {
    target_id: String,
    url: String,
    title: String,
}

pub struct CdpDriver {
    transport: Arc<dyn CdpTransport>,
    cfg: CdpConfig,
    /// target id -> flat session id
    sessions: DashMap<String, String>,
    /// target ids in first-seen order
    order: Mutex<Vec<String>>,
    poll_interval: Duration,
}

impl CdpDriver {
    pub fn new(transport: Arc<dyn CdpTransport>, cfg: CdpConfig) -> Self {
        Self {
            transport,
            cfg,
            sessions: DashMap::new(),
            order: Mutex::new(Vec::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Launches (or attaches to) Chromium as configured.
    pub async fn launch(cfg: CdpConfig) -> Result<Self, DriverError> {
        let transport = Arc::new(ChromiumTransport::new(cfg.clone()));
        transport.start().await?;
        info!(target: "cdp-driver", headless = cfg.headless, "browser ready");
        Ok(Self::new(transport, cfg))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Installs saved cookies into the browser. Returns how many were sent.
    pub async fn apply_storage_state(&self, state: &StorageState) -> Result<usize, DriverError> {
        let cookies = state.cookie_params();
        if cookies.is_empty() {
            return Ok(0);
        }
        let page = match self.refresh().await?.first() {
            Some(target) => PageId(target.target_id.clone()),
            None => self.new_page().await?,
        };
        let count = cookies.len();
        self.page_call(&page, "Network.setCookies", json!({ "cookies": cookies }))
            .await?;
        info!(target: "cdp-driver", count, "storage state applied");
        Ok(count)
    }

    async fn call(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, DriverError> {
        debug!(target: "cdp-driver", method, "command");
        Ok(self.transport.send_command(target, method, params).await?)
    }

    async fn page_call(&self, page: &PageId, method: &str, params: Value) -> Result<Value, DriverError> {
        let session = self.session_for(page).await?;
        self.call(CommandTarget::Session(session), method, params).await
    }

    /// Live page targets in first-seen order. Targets that went away are
    /// forgotten, new ones are appended.
    async fn refresh(&self) -> Result<Vec<TargetSummary>, DriverError> {
        let reply = self
            .call(CommandTarget::Browser, "Target.getTargets", json!({}))
            .await?;
        let live: Vec<TargetSummary> = reply["targetInfos"]
            .as_array()
            .map(|infos| {
                infos
                    .iter()
                    .filter(|info| info["type"] == "page")
                    .filter_map(|info| {
                        Some(TargetSummary {
                            target_id: info["targetId"].as_str()?.to_string(),
                            url: info["url"].as_str().unwrap_or_default().to_string(),
                            title: info["title"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let is_live = |id: &str| live.iter().any(|t| t.target_id == id);
        let mut order = self.order.lock().await;
        order.retain(|id| is_live(id));
        self.sessions.retain(|id, _| is_live(id));
        for target in &live {
            if !order.contains(&target.target_id) {
                order.push(target.target_id.clone());
            }
        }

        Ok(order
            .iter()
            .filter_map(|id| live.iter().find(|t| &t.target_id == id).cloned())
            .collect())
    }

    async fn session_for(&self, page: &PageId) -> Result<String, DriverError> {
        if let Some(session) = self.sessions.get(&page.0) {
            return Ok(session.value().clone());
        }
        let known = self.order.lock().await.contains(&page.0);
        if !known && !self.refresh().await?.iter().any(|t| t.target_id == page.0) {
            return Err(DriverError::Closed(format!("page {page}")));
        }
        self.attach(&page.0).await
    }

    async fn attach(&self, target_id: &str) -> Result<String, DriverError> {
        let reply = self
            .call(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session = reply["sessionId"]
            .as_str()
            .ok_or_else(|| DriverError::Io(format!("no session returned for target {target_id}")))?
            .to_string();

        self.prepare_session(&session).await;
        self.sessions.insert(target_id.to_string(), session.clone());
        let mut order = self.order.lock().await;
        if !order.iter().any(|id| id == target_id) {
            order.push(target_id.to_string());
        }
        debug!(target: "cdp-driver", target_id, session = %session, "attached");
        Ok(session)
    }

    async fn prepare_session(&self, session: &str) {
        let target = CommandTarget::Session(session.to_string());
        let setup = [
            (
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": self.cfg.viewport.width,
                    "height": self.cfg.viewport.height,
                    "deviceScaleFactor": 1,
                    "mobile": false,
                }),
            ),
            ("Emulation.setLocaleOverride", json!({ "locale": self.cfg.locale })),
            (
                "Emulation.setTimezoneOverride",
                json!({ "timezoneId": self.cfg.timezone }),
            ),
        ];
        for (method, params) in setup {
            if let Err(err) = self.call(target.clone(), method, params).await {
                warn!(target: "cdp-driver", method, %err, "session setup command failed");
            }
        }
    }

    async fn frame_world(&self, session: &str, frame: &FrameId) -> Result<i64, DriverError> {
        let reply = self
            .call(
                CommandTarget::Session(session.to_string()),
                "Page.createIsolatedWorld",
                json!({ "frameId": frame.0, "worldName": WORLD_NAME }),
            )
            .await
            .map_err(|err| match err {
                DriverError::Io(message) => DriverError::NotFound(format!("frame {frame}: {message}")),
                other => other,
            })?;
        reply["executionContextId"]
            .as_i64()
            .ok_or_else(|| DriverError::Io(format!("no execution context for frame {frame}")))
    }

    /// Evaluates `expression` in the context and returns the session used
    /// and the `RemoteObject` produced.
    async fn evaluate_in(
        &self,
        context: &ContextRef,
        expression: &str,
        by_value: bool,
    ) -> Result<(String, Value), DriverError> {
        let session = self.session_for(context.page()).await?;
        let mut params = json!({
            "expression": expression,
            "returnByValue": by_value,
            "awaitPromise": true,
            "objectGroup": OBJECT_GROUP,
        });
        if let Some(frame) = context.frame() {
            params["contextId"] = json!(self.frame_world(&session, frame).await?);
        }
        let mut reply = self
            .call(CommandTarget::Session(session.clone()), "Runtime.evaluate", params)
            .await?;
        check_exception(&reply)?;
        Ok((session, reply["result"].take()))
    }

    async fn page_value(&self, page: &PageId, expression: &str) -> Result<Value, DriverError> {
        let (_, result) = self
            .evaluate_in(&ContextRef::Page(page.clone()), expression, true)
            .await?;
        Ok(result["value"].clone())
    }

    async fn page_string(&self, page: &PageId, expression: &str) -> Result<String, DriverError> {
        Ok(self
            .page_value(page, expression)
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn resolve(&self, element: &ElementHandle) -> Result<Option<RemoteElement>, DriverError> {
        let expression = selectors::locate_expression(&element.selector);
        let (session, result) = self.evaluate_in(&element.context, &expression, false).await?;
        Ok(result["objectId"].as_str().map(|id| RemoteElement {
            session,
            object_id: id.to_string(),
        }))
    }

    async fn require(&self, element: &ElementHandle) -> Result<RemoteElement, DriverError> {
        self.resolve(element)
            .await?
            .ok_or_else(|| DriverError::NotFound(element.selector.clone()))
    }

    async fn call_on(
        &self,
        remote: &RemoteElement,
        function: &str,
        args: &[Value],
    ) -> Result<Value, DriverError> {
        let mut arguments = vec![json!({ "objectId": remote.object_id })];
        arguments.extend(args.iter().map(|value| json!({ "value": value })));
        let reply = self
            .call(
                CommandTarget::Session(remote.session.clone()),
                "Runtime.callFunctionOn",
                json!({
                    "functionDeclaration": function,
                    "objectId": remote.object_id,
                    "arguments": arguments,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        check_exception(&reply)?;
        Ok(reply["result"]["value"].clone())
    }

    async fn box_of(&self, remote: &RemoteElement) -> Result<Option<BoundingBox>, DriverError> {
        let reply = self
            .call(
                CommandTarget::Session(remote.session.clone()),
                "DOM.getContentQuads",
                json!({ "objectId": remote.object_id }),
            )
            .await?;
        Ok(reply["quads"]
            .as_array()
            .and_then(|quads| quads.first())
            .and_then(quad_box))
    }

    async fn clickable_point(
        &self,
        element: &ElementHandle,
        remote: &RemoteElement,
    ) -> Result<(f64, f64), DriverError> {
        self.box_of(remote)
            .await?
            .filter(|bbox| !bbox.is_empty())
            .map(|bbox| bbox.center())
            .ok_or_else(|| DriverError::NotActionable(format!("{}: no layout box", element.selector)))
    }

    async fn mouse(&self, session: &str, kind: &str, x: f64, y: f64) -> Result<(), DriverError> {
        let mut params = json!({ "type": kind, "x": x, "y": y });
        if kind != "mouseMoved" {
            params["button"] = json!("left");
            params["clickCount"] = json!(1);
        }
        self.call(
            CommandTarget::Session(session.to_string()),
            "Input.dispatchMouseEvent",
            params,
        )
        .await?;
        Ok(())
    }

    async fn mouse_click(&self, session: &str, x: f64, y: f64) -> Result<(), DriverError> {
        self.mouse(session, "mouseMoved", x, y).await?;
        self.mouse(session, "mousePressed", x, y).await?;
        self.mouse(session, "mouseReleased", x, y).await
    }

    async fn probe_state(&self, element: &ElementHandle, state: ElementState) -> Result<bool, DriverError> {
        let Some(remote) = self.resolve(element).await? else {
            return Ok(false);
        };
        match state {
            ElementState::Attached => Ok(true),
            ElementState::Visible => Ok(self
                .call_on(&remote, scripts::VISIBILITY_PROBE, &[])
                .await?
                .as_bool()
                .unwrap_or(false)),
        }
    }
}

/// Polls a fallible probe. `Ok(Some)` finishes, `Ok(None)` and errors the
/// `keep_going` filter accepts poll again, other errors abort.
async fn poll_fallible<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    keep_going: fn(&DriverError) -> bool,
    mut probe: F,
) -> Option<Result<T, DriverError>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, DriverError>>,
{
    poll_until(timeout, interval, || {
        let attempt = probe();
        async move {
            match attempt.await {
                Ok(Some(value)) => Some(Ok(value)),
                Ok(None) => None,
                Err(err) if keep_going(&err) => None,
                Err(err) => Some(Err(err)),
            }
        }
    })
    .await
}

fn retryable(err: &DriverError) -> bool {
    err.is_retryable()
}

/// Navigation tears down execution contexts, so only a closed page is final.
fn unless_closed(err: &DriverError) -> bool {
    !matches!(err, DriverError::Closed(_))
}

fn check_exception(reply: &Value) -> Result<(), DriverError> {
    let Some(details) = reply.get("exceptionDetails") else {
        return Ok(());
    };
    let message = details["exception"]["description"]
        .as_str()
        .or_else(|| details["text"].as_str())
        .unwrap_or("uncaught exception");
    Err(DriverError::Script(message.to_string()))
}

fn quad_box(quad: &Value) -> Option<BoundingBox> {
    let points: Vec<f64> = quad.as_array()?.iter().filter_map(Value::as_f64).collect();
    if points.len() != 8 {
        return None;
    }
    let xs = points.iter().step_by(2).copied();
    let ys = points.iter().skip(1).step_by(2).copied();
    let (min_x, max_x) = xs.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let (min_y, max_y) = ys.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    Some(BoundingBox {
        x: min_x,
        y: min_y,
        width: max_x - min_x,
        height: max_y - min_y,
    })
}

fn collect_frames(node: &Value, is_main: bool, out: &mut Vec<FrameInfo>) {
    let frame = &node["frame"];
    if let Some(id) = frame["id"].as_str() {
        out.push(FrameInfo {
            id: FrameId(id.to_string()),
            name: frame["name"].as_str().unwrap_or_default().to_string(),
            url: format!(
                "{}{}",
                frame["url"].as_str().unwrap_or_default(),
                frame["urlFragment"].as_str().unwrap_or_default()
            ),
            is_main,
        });
    }
    if let Some(children) = node["childFrames"].as_array() {
        for child in children {
            collect_frames(child, false, out);
        }
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn new_page(&self) -> Result<PageId, DriverError> {
        let reply = self
            .call(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
            )
            .await?;
        let target_id = reply["targetId"]
            .as_str()
            .ok_or_else(|| DriverError::Io("Target.createTarget returned no targetId".into()))?
            .to_string();
        self.attach(&target_id).await?;
        Ok(PageId(target_id))
    }

    async fn pages(&self) -> Result<Vec<PageInfo>, DriverError> {
        Ok(self
            .refresh()
            .await?
            .into_iter()
            .map(|target| PageInfo {
                id: PageId(target.target_id),
                url: target.url,
                title: target.title,
            })
            .collect())
    }

    async fn close_page(&self, page: &PageId) -> Result<(), DriverError> {
        self.call(
            CommandTarget::Browser,
            "Target.closeTarget",
            json!({ "targetId": page.0 }),
        )
        .await?;
        self.sessions.remove(&page.0);
        self.order.lock().await.retain(|id| id != &page.0);
        Ok(())
    }

    #[instrument(skip_all, fields(page = %page, url = %url))]
    async fn navigate(&self, page: &PageId, url: &str, timeout: Duration) -> Result<(), DriverError> {
        let reply = self
            .page_call(page, "Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error) = reply["errorText"].as_str().filter(|e| !e.is_empty()) {
            return Err(DriverError::Io(format!("navigation to {url} failed: {error}")));
        }
        self.wait_for_dom_ready(&ContextRef::Page(page.clone()), timeout)
            .await
    }

    async fn wait_for_dom_ready(&self, context: &ContextRef, timeout: Duration) -> Result<(), DriverError> {
        let ready = poll_fallible(timeout, self.poll_interval, unless_closed, || async move {
            let (_, result) = self.evaluate_in(context, "document.readyState", true).await?;
            Ok::<_, DriverError>((result["value"] != "loading").then_some(()))
        })
        .await;
        ready.unwrap_or_else(|| Err(DriverError::Timeout(format!("{context} still loading"))))
    }

    async fn frames(&self, page: &PageId) -> Result<Vec<FrameInfo>, DriverError> {
        let reply = self.page_call(page, "Page.getFrameTree", json!({})).await?;
        let mut frames = Vec::new();
        collect_frames(&reply["frameTree"], true, &mut frames);
        Ok(frames)
    }

    async fn wait_for_state(
        &self,
        element: &ElementHandle,
        state: ElementState,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let reached = poll_fallible(timeout, self.poll_interval, retryable, || async move {
            Ok::<_, DriverError>(self.probe_state(element, state).await?.then_some(()))
        })
        .await;
        reached.unwrap_or_else(|| {
            Err(DriverError::Timeout(format!(
                "{} not {:?} within {}ms",
                element.selector,
                state,
                timeout.as_millis()
            )))
        })
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool, DriverError> {
        self.probe_state(element, ElementState::Visible).await
    }

    async fn evaluate(&self, element: &ElementHandle, script: &str) -> Result<Value, DriverError> {
        let remote = self.require(element).await?;
        self.call_on(&remote, script, &[]).await
    }

    async fn bounding_box(&self, element: &ElementHandle) -> Result<Option<BoundingBox>, DriverError> {
        match self.resolve(element).await? {
            Some(remote) => self.box_of(&remote).await,
            None => Ok(None),
        }
    }

    async fn hover(&self, element: &ElementHandle, timeout: Duration) -> Result<(), DriverError> {
        self.wait_for_state(element, ElementState::Visible, timeout)
            .await?;
        let remote = self.require(element).await?;
        let (x, y) = self.clickable_point(element, &remote).await?;
        self.mouse(&remote.session, "mouseMoved", x, y).await
    }

    #[instrument(skip_all, fields(selector = %element.selector, mode = ?mode))]
    async fn click(
        &self,
        element: &ElementHandle,
        mode: ClickMode,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        self.wait_for_state(element, ElementState::Visible, timeout)
            .await?;
        let remote = self.require(element).await?;
        self.call_on(&remote, scripts::SCROLL_INTO_VIEW, &[]).await?;
        if mode == ClickMode::Native
            && self.call_on(&remote, HIT_TEST, &[]).await?.as_bool() != Some(true)
        {
            return Err(DriverError::Intercepted(element.selector.clone()));
        }
        let (x, y) = self.clickable_point(element, &remote).await?;
        self.mouse_click(&remote.session, x, y).await
    }

    async fn click_at(&self, page: &PageId, x: f64, y: f64) -> Result<(), DriverError> {
        let session = self.session_for(page).await?;
        self.mouse_click(&session, x, y).await
    }

    async fn dispatch_events(
        &self,
        element: &ElementHandle,
        sequence: &EventSequence,
    ) -> Result<(), DriverError> {
        let remote = self.require(element).await?;
        match sequence {
            EventSequence::Click => self.call_on(&remote, DISPATCH_CLICK, &[]).await?,
            EventSequence::Input { value } => {
                self.call_on(&remote, DISPATCH_INPUT, &[json!(value)]).await?
            }
        };
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, value: &str, timeout: Duration) -> Result<(), DriverError> {
        self.wait_for_state(element, ElementState::Visible, timeout)
            .await?;
        let remote = self.require(element).await?;
        if self.call_on(&remote, PREPARE_FILL, &[]).await?.as_bool() != Some(true) {
            return Err(DriverError::NotActionable(format!(
                "{}: not an editable element",
                element.selector
            )));
        }
        if !value.is_empty() {
            self.call(
                CommandTarget::Session(remote.session.clone()),
                "Input.insertText",
                json!({ "text": value }),
            )
            .await?;
        }
        self.call_on(&remote, COMMIT_FILL, &[]).await?;
        Ok(())
    }

    async fn screenshot(&self, page: &PageId, path: &Path, full_page: bool) -> Result<(), DriverError> {
        let mut params = json!({ "format": "png" });
        if full_page {
            let metrics = self.page_call(page, "Page.getLayoutMetrics", json!({})).await?;
            let size = if metrics["cssContentSize"].is_object() {
                &metrics["cssContentSize"]
            } else {
                &metrics["contentSize"]
            };
            if let (Some(width), Some(height)) = (size["width"].as_f64(), size["height"].as_f64()) {
                params["captureBeyondViewport"] = json!(true);
                params["clip"] = json!({
                    "x": 0, "y": 0, "width": width, "height": height, "scale": 1
                });
            }
        }

        let reply = self.page_call(page, "Page.captureScreenshot", params).await?;
        let data = reply["data"]
            .as_str()
            .ok_or_else(|| DriverError::Io("Page.captureScreenshot returned no data".into()))?;
        let bytes = STANDARD
            .decode(data)
            .map_err(|err| DriverError::Io(format!("screenshot decode: {err}")))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|err| DriverError::Io(format!("{}: {err}", path.display())))
    }

    async fn content(&self, page: &PageId) -> Result<String, DriverError> {
        self.page_string(
            page,
            "document.documentElement ? document.documentElement.outerHTML : ''",
        )
        .await
    }

    async fn current_url(&self, page: &PageId) -> Result<String, DriverError> {
        self.page_string(page, "location.href").await
    }

    async fn title(&self, page: &PageId) -> Result<String, DriverError> {
        self.page_string(page, "document.title").await
    }

    async fn wait_for_new_page(&self, known: &[PageId], timeout: Duration) -> Result<PageId, DriverError> {
        let found = poll_fallible(timeout, self.poll_interval, retryable, || async move {
            Ok::<_, DriverError>(self
                .refresh()
                .await?
                .into_iter()
                .find(|target| !known.iter().any(|page| page.0 == target.target_id))
                .map(|target| PageId(target.target_id)))
        })
        .await;
        let page = found.unwrap_or_else(|| {
            Err(DriverError::Timeout(format!(
                "no new page within {}ms",
                timeout.as_millis()
            )))
        })?;
        self.session_for(&page).await?;
        Ok(page)
    }

    async fn wait_for_url_prefix(
        &self,
        page: &PageId,
        prefix: &str,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let matched = poll_fallible(timeout, self.poll_interval, unless_closed, || async move {
            Ok::<_, DriverError>(self
                .current_url(page)
                .await?
                .starts_with(prefix)
                .then_some(()))
        })
        .await;
        matched.unwrap_or_else(|| {
            Err(DriverError::Timeout(format!(
                "url did not reach {prefix} within {}ms",
                timeout.as_millis()
            )))
        })
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.sessions.clear();
        self.order.lock().await.clear();
        self.transport.shutdown().await?;
        Ok(())
    }
}
