//! Scripted in-memory driver.
//!
//! Pages, frames and elements are registered up front; clicks can trigger
//! effects (text appears, URL changes, a popup opens). Waits never sleep:
//! they check the current state once and report a timeout otherwise, so
//! tests stay fast and deterministic. Every driver call is logged.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use scenario_core_types::{FrameId, PageId};
use serde_json::{json, Value};

use crate::driver::BrowserDriver;
use crate::errors::DriverError;
use crate::scripts;
use crate::types::{
    BoundingBox, ClickMode, ContextRef, ElementHandle, ElementState, EventSequence, FrameInfo,
    PageInfo,
};

/// Side effect of a successful click.
#[derive(Clone, Debug)]
pub enum FakeEffect {
    /// Text becomes visible in the clicked element's context.
    ShowText(String),
    /// The clicked element's page moves to this URL.
    Navigate(String),
    /// A new page opens at `url` showing `texts`.
    OpenPopup { url: String, texts: Vec<String> },
}

#[derive(Clone, Debug)]
pub struct FakeElement {
    pub text: String,
    pub visible: bool,
    pub enabled: bool,
    pub width: f64,
    pub height: f64,
    pub pointer_events_none: bool,
    pub reject_hover: bool,
    pub reject_native: bool,
    pub reject_forced: bool,
    pub reject_coordinates: bool,
    pub reject_script: bool,
    pub reject_fill: bool,
    pub on_click: Vec<FakeEffect>,
}

impl Default for FakeElement {
    fn default() -> Self {
        Self {
            text: String::new(),
            visible: true,
            enabled: true,
            width: 120.0,
            height: 32.0,
            pointer_events_none: false,
            reject_hover: false,
            reject_native: false,
            reject_forced: false,
            reject_coordinates: false,
            reject_script: false,
            reject_fill: false,
            on_click: Vec::new(),
        }
    }
}

impl FakeElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn zero_sized(mut self) -> Self {
        self.width = 0.0;
        self.height = 0.0;
        self
    }

    pub fn pointer_events_none(mut self) -> Self {
        self.pointer_events_none = true;
        self
    }

    pub fn rejecting_hover(mut self) -> Self {
        self.reject_hover = true;
        self
    }

    pub fn rejecting_native(mut self) -> Self {
        self.reject_native = true;
        self
    }

    pub fn rejecting_forced(mut self) -> Self {
        self.reject_forced = true;
        self
    }

    pub fn rejecting_coordinates(mut self) -> Self {
        self.reject_coordinates = true;
        self
    }

    pub fn rejecting_script(mut self) -> Self {
        self.reject_script = true;
        self
    }

    pub fn rejecting_fill(mut self) -> Self {
        self.reject_fill = true;
        self
    }

    /// Every click path fails.
    pub fn rejecting_all_clicks(self) -> Self {
        self.rejecting_native()
            .rejecting_forced()
            .rejecting_coordinates()
            .rejecting_script()
    }

    pub fn on_click(mut self, effect: FakeEffect) -> Self {
        self.on_click.push(effect);
        self
    }
}

#[derive(Clone, Debug, Default)]
struct FakeDocument {
    elements: Vec<(String, FakeElement)>,
    texts: Vec<String>,
}

impl FakeDocument {
    /// Exact selector match first, then the text engines.
    fn resolve(&self, selector: &str) -> Option<(usize, FakeElement)> {
        if let Some(found) = self
            .elements
            .iter()
            .enumerate()
            .find(|(_, (key, _))| key == selector)
        {
            return Some((found.0, (found.1).1.clone()));
        }

        let (needle, exact) = parse_text_selector(selector)?;
        let matches = |candidate: &str| {
            if exact {
                candidate.trim() == needle
            } else {
                candidate.to_lowercase().contains(&needle.to_lowercase())
            }
        };

        if let Some((idx, (_, element))) = self
            .elements
            .iter()
            .enumerate()
            .find(|(_, (_, el))| matches(&el.text))
        {
            return Some((idx, element.clone()));
        }

        self.texts
            .iter()
            .enumerate()
            .find(|(_, text)| matches(text))
            .map(|(idx, text)| (1000 + idx, FakeElement::new().with_text(text.clone())))
    }
}

fn parse_text_selector(selector: &str) -> Option<(String, bool)> {
    let body = selector.strip_prefix("text=")?;
    if body.len() >= 2 && body.starts_with('"') && body.ends_with('"') {
        Some((body[1..body.len() - 1].to_string(), true))
    } else {
        Some((body.to_string(), false))
    }
}

#[derive(Clone, Debug)]
struct FakeFrame {
    id: FrameId,
    name: String,
    url: String,
    doc: FakeDocument,
}

#[derive(Clone, Debug)]
struct FakePage {
    id: PageId,
    url: String,
    title: String,
    doc: FakeDocument,
    frames: Vec<FakeFrame>,
    closed: bool,
}

impl FakePage {
    fn new(id: PageId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: String::new(),
            doc: FakeDocument::default(),
            frames: Vec::new(),
            closed: false,
        }
    }

    /// Document slot 0 is the top document, slot i+1 is frame i.
    fn slots(&self) -> impl Iterator<Item = (usize, &FakeDocument)> {
        std::iter::once((0, &self.doc)).chain(
            self.frames
                .iter()
                .enumerate()
                .map(|(idx, frame)| (idx + 1, &frame.doc)),
        )
    }
}

#[derive(Debug, Default)]
struct FakeState {
    pages: Vec<FakePage>,
    redirects: HashMap<String, String>,
    filled: HashMap<String, String>,
    calls: Vec<String>,
    closed: bool,
    fail_screenshots: bool,
    fail_content: bool,
    fail_close: bool,
    next_frame: usize,
}

impl FakeState {
    fn page(&self, id: &PageId) -> Result<&FakePage, DriverError> {
        self.pages
            .iter()
            .find(|p| &p.id == id && !p.closed)
            .ok_or_else(|| DriverError::Closed(format!("page {id}")))
    }

    fn page_mut(&mut self, id: &PageId) -> Result<&mut FakePage, DriverError> {
        self.pages
            .iter_mut()
            .find(|p| &p.id == id && !p.closed)
            .ok_or_else(|| DriverError::Closed(format!("page {id}")))
    }

    fn doc(&self, context: &ContextRef) -> Result<(usize, &FakeDocument), DriverError> {
        let page = self.page(context.page())?;
        match context.frame() {
            None => Ok((0, &page.doc)),
            Some(frame_id) => page
                .frames
                .iter()
                .enumerate()
                .find(|(_, f)| &f.id == frame_id)
                .map(|(idx, f)| (idx + 1, &f.doc))
                .ok_or_else(|| DriverError::Closed(format!("frame {frame_id}"))),
        }
    }

    fn doc_mut(&mut self, context: &ContextRef) -> Result<&mut FakeDocument, DriverError> {
        let page = self.page_mut(context.page())?;
        match context.frame() {
            None => Ok(&mut page.doc),
            Some(frame_id) => page
                .frames
                .iter_mut()
                .find(|f| &f.id == frame_id)
                .map(|f| &mut f.doc)
                .ok_or_else(|| DriverError::Closed(format!("frame {frame_id}"))),
        }
    }

    fn resolve(&self, element: &ElementHandle) -> Result<Option<(usize, usize, FakeElement)>, DriverError> {
        let (slot, doc) = self.doc(&element.context)?;
        Ok(doc
            .resolve(&element.selector)
            .map(|(idx, el)| (slot, idx, el)))
    }

    fn require(&self, element: &ElementHandle) -> Result<(usize, usize, FakeElement), DriverError> {
        self.resolve(element)?
            .ok_or_else(|| DriverError::NotFound(element.selector.clone()))
    }

    fn open_page(&mut self, url: &str) -> PageId {
        let id = PageId(format!("page-{}", self.pages.len() + 1));
        self.pages.push(FakePage::new(id.clone(), url));
        id
    }

    fn apply_effects(&mut self, context: &ContextRef, effects: &[FakeEffect]) -> Result<(), DriverError> {
        for effect in effects {
            match effect {
                FakeEffect::ShowText(text) => self.doc_mut(context)?.texts.push(text.clone()),
                FakeEffect::Navigate(url) => {
                    let target = self.redirects.get(url).cloned().unwrap_or_else(|| url.clone());
                    self.page_mut(context.page())?.url = target;
                }
                FakeEffect::OpenPopup { url, texts } => {
                    let id = self.open_page(url);
                    self.page_mut(&id)?.doc.texts.extend(texts.iter().cloned());
                }
            }
        }
        Ok(())
    }
}

fn fake_box(slot: usize, idx: usize, element: &FakeElement) -> BoundingBox {
    BoundingBox {
        x: 10.0 + 1000.0 * slot as f64,
        y: 10.0 + 50.0 * idx as f64,
        width: element.width,
        height: element.height,
    }
}

pub struct FakeDriver {
    state: Mutex<FakeState>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    /// One open page, `page-1`, at `about:blank`.
    pub fn new() -> Self {
        let mut state = FakeState::default();
        state.open_page("about:blank");
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log(&self, call: String) {
        self.lock().calls.push(call);
    }

    pub fn main_page(&self) -> PageId {
        PageId("page-1".to_string())
    }

    pub fn main_context(&self) -> ContextRef {
        ContextRef::Page(self.main_page())
    }

    pub fn add_element(&self, context: &ContextRef, selector: &str, element: FakeElement) {
        if let Ok(doc) = self.lock().doc_mut(context) {
            doc.elements.push((selector.to_string(), element));
        }
    }

    pub fn add_text(&self, context: &ContextRef, text: &str) {
        if let Ok(doc) = self.lock().doc_mut(context) {
            doc.texts.push(text.to_string());
        }
    }

    /// Adds a subframe and returns its context.
    pub fn add_frame(&self, page: &PageId, name: &str, url: &str) -> ContextRef {
        let mut state = self.lock();
        state.next_frame += 1;
        let id = FrameId(format!("frame-{}", state.next_frame));
        if let Ok(target) = state.page_mut(page) {
            target.frames.push(FakeFrame {
                id: id.clone(),
                name: name.to_string(),
                url: url.to_string(),
                doc: FakeDocument::default(),
            });
        }
        ContextRef::Frame {
            page: page.clone(),
            frame: id,
        }
    }

    /// Opens an extra page as if a popup already existed.
    pub fn add_page(&self, url: &str) -> PageId {
        self.lock().open_page(url)
    }

    pub fn set_url(&self, page: &PageId, url: &str) {
        if let Ok(target) = self.lock().page_mut(page) {
            target.url = url.to_string();
        }
    }

    pub fn set_title(&self, page: &PageId, title: &str) {
        if let Ok(target) = self.lock().page_mut(page) {
            target.title = title.to_string();
        }
    }

    /// Navigating to `from` lands on `to`.
    pub fn redirect(&self, from: &str, to: &str) {
        self.lock()
            .redirects
            .insert(from.to_string(), to.to_string());
    }

    pub fn fail_screenshots(&self, fail: bool) {
        self.lock().fail_screenshots = fail;
    }

    pub fn fail_content(&self, fail: bool) {
        self.lock().fail_content = fail;
    }

    /// Makes `close_page` fail without closing anything.
    pub fn fail_close(&self, fail: bool) {
        self.lock().fail_close = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of logged calls starting with `prefix`.
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn filled_value(&self, selector: &str) -> Option<String> {
        self.lock().filled.get(selector).cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn open_page_ids(&self) -> Vec<PageId> {
        self.lock()
            .pages
            .iter()
            .filter(|p| !p.closed)
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn url_of(&self, page: &PageId) -> Option<String> {
        self.lock().page(page).ok().map(|p| p.url.clone())
    }

    fn click_effects(&self, element: &ElementHandle, found: &FakeElement) -> Result<(), DriverError> {
        self.lock().apply_effects(&element.context, &found.on_click)
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn new_page(&self) -> Result<PageId, DriverError> {
        let mut state = self.lock();
        state.calls.push("new_page".to_string());
        Ok(state.open_page("about:blank"))
    }

    async fn pages(&self) -> Result<Vec<PageInfo>, DriverError> {
        Ok(self
            .lock()
            .pages
            .iter()
            .filter(|p| !p.closed)
            .map(|p| PageInfo {
                id: p.id.clone(),
                url: p.url.clone(),
                title: p.title.clone(),
            })
            .collect())
    }

    async fn close_page(&self, page: &PageId) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.calls.push(format!("close_page {page}"));
        if state.fail_close {
            return Err(DriverError::Io(format!("closing {page} failed")));
        }
        state.page_mut(page)?.closed = true;
        Ok(())
    }

    async fn navigate(&self, page: &PageId, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.calls.push(format!("navigate {url}"));
        let target = state
            .redirects
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string());
        state.page_mut(page)?.url = target;
        Ok(())
    }

    async fn wait_for_dom_ready(&self, context: &ContextRef, _timeout: Duration) -> Result<(), DriverError> {
        self.lock().doc(context).map(|_| ())
    }

    async fn frames(&self, page: &PageId) -> Result<Vec<FrameInfo>, DriverError> {
        let state = self.lock();
        let target = state.page(page)?;
        let mut frames = vec![FrameInfo {
            id: FrameId(format!("{}-main", target.id)),
            name: String::new(),
            url: target.url.clone(),
            is_main: true,
        }];
        frames.extend(target.frames.iter().map(|f| FrameInfo {
            id: f.id.clone(),
            name: f.name.clone(),
            url: f.url.clone(),
            is_main: false,
        }));
        Ok(frames)
    }

    async fn wait_for_state(
        &self,
        element: &ElementHandle,
        state: ElementState,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        self.log(format!("wait_for_state {state:?} {}", element.selector));
        let found = self.lock().resolve(element)?;
        let reached = match (state, found) {
            (_, None) => false,
            (ElementState::Attached, Some(_)) => true,
            (ElementState::Visible, Some((_, _, el))) => el.visible,
        };
        if reached {
            Ok(())
        } else {
            Err(DriverError::Timeout(format!(
                "{} not {:?}",
                element.selector, state
            )))
        }
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool, DriverError> {
        Ok(self
            .lock()
            .resolve(element)?
            .map(|(_, _, el)| el.visible)
            .unwrap_or(false))
    }

    async fn evaluate(&self, element: &ElementHandle, script: &str) -> Result<Value, DriverError> {
        if script == scripts::SCROLL_INTO_VIEW {
            self.log(format!("scroll_into_view {}", element.selector));
        }
        let (_, _, el) = self.lock().require(element)?;
        let value = match script {
            scripts::ACTIONABILITY_PROBE => json!({
                "attached": true,
                "visible": el.visible,
                "enabled": el.enabled,
                "width": el.width,
                "height": el.height,
                "pointerEventsNone": el.pointer_events_none,
            }),
            scripts::INNER_TEXT => Value::String(el.text.clone()),
            scripts::VISIBILITY_PROBE => {
                Value::Bool(el.visible && el.width > 0.0 && el.height > 0.0)
            }
            scripts::SCROLL_INTO_VIEW => Value::Bool(true),
            _ => Value::Null,
        };
        Ok(value)
    }

    async fn bounding_box(&self, element: &ElementHandle) -> Result<Option<BoundingBox>, DriverError> {
        Ok(self
            .lock()
            .resolve(element)?
            .filter(|(_, _, el)| el.visible)
            .map(|(slot, idx, el)| fake_box(slot, idx, &el)))
    }

    async fn hover(&self, element: &ElementHandle, _timeout: Duration) -> Result<(), DriverError> {
        self.log(format!("hover {}", element.selector));
        let (_, _, el) = self.lock().require(element)?;
        if el.reject_hover {
            return Err(DriverError::Timeout(format!("hover {}", element.selector)));
        }
        Ok(())
    }

    async fn click(
        &self,
        element: &ElementHandle,
        mode: ClickMode,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        let label = match mode {
            ClickMode::Native => "native",
            ClickMode::Forced => "forced",
        };
        self.log(format!("click {label} {}", element.selector));
        let (_, _, el) = self.lock().require(element)?;
        match mode {
            ClickMode::Native if el.reject_native => {
                return Err(DriverError::Intercepted(element.selector.clone()))
            }
            ClickMode::Native if !el.visible || !el.enabled => {
                return Err(DriverError::NotActionable(element.selector.clone()))
            }
            ClickMode::Forced if el.reject_forced => {
                return Err(DriverError::Timeout(format!("forced click {}", element.selector)))
            }
            _ => {}
        }
        self.click_effects(element, &el)
    }

    async fn click_at(&self, page: &PageId, x: f64, y: f64) -> Result<(), DriverError> {
        let hit = {
            let mut state = self.lock();
            state.calls.push(format!("click_at {x:.0},{y:.0}"));
            let target = state.page(page)?;
            let mut hit = None;
            for (slot, doc) in target.slots() {
                for (idx, (selector, el)) in doc.elements.iter().enumerate() {
                    if el.visible && fake_box(slot, idx, el).contains(x, y) {
                        let context = match slot {
                            0 => ContextRef::Page(page.clone()),
                            n => ContextRef::Frame {
                                page: page.clone(),
                                frame: target.frames[n - 1].id.clone(),
                            },
                        };
                        hit = Some((ElementHandle::new(context, selector.clone()), el.clone()));
                        break;
                    }
                }
                if hit.is_some() {
                    break;
                }
            }
            hit
        };

        match hit {
            None => Err(DriverError::NotFound(format!("nothing at {x:.0},{y:.0}"))),
            Some((_, el)) if el.reject_coordinates => {
                Err(DriverError::Intercepted(format!("point {x:.0},{y:.0}")))
            }
            Some((handle, el)) => self.click_effects(&handle, &el),
        }
    }

    async fn dispatch_events(
        &self,
        element: &ElementHandle,
        sequence: &EventSequence,
    ) -> Result<(), DriverError> {
        let kind = match sequence {
            EventSequence::Click => "click",
            EventSequence::Input { .. } => "input",
        };
        self.log(format!("dispatch {kind} {}", element.selector));
        let (_, _, el) = self.lock().require(element)?;
        if el.reject_script {
            return Err(DriverError::Script(format!("dispatch {}", element.selector)));
        }
        match sequence {
            EventSequence::Click => self.click_effects(element, &el),
            EventSequence::Input { value } => {
                self.lock()
                    .filled
                    .insert(element.selector.clone(), value.clone());
                Ok(())
            }
        }
    }

    async fn fill(&self, element: &ElementHandle, value: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.log(format!("fill {}", element.selector));
        let (_, _, el) = self.lock().require(element)?;
        if el.reject_fill || !el.enabled {
            return Err(DriverError::NotActionable(element.selector.clone()));
        }
        self.lock()
            .filled
            .insert(element.selector.clone(), value.to_string());
        Ok(())
    }

    async fn screenshot(&self, page: &PageId, path: &Path, _full_page: bool) -> Result<(), DriverError> {
        let fail = {
            let mut state = self.lock();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            state.calls.push(format!("screenshot {name}"));
            state.page(page)?;
            state.fail_screenshots
        };
        if fail {
            return Err(DriverError::Io("screenshot capture failed".to_string()));
        }
        tokio::fs::write(path, b"\x89PNG fake")
            .await
            .map_err(|err| DriverError::Io(err.to_string()))
    }

    async fn content(&self, page: &PageId) -> Result<String, DriverError> {
        let state = self.lock();
        if state.fail_content {
            return Err(DriverError::Io("content unavailable".to_string()));
        }
        let target = state.page(page)?;
        Ok(format!(
            "<html><body>{}</body></html>",
            target.doc.texts.join("\n")
        ))
    }

    async fn current_url(&self, page: &PageId) -> Result<String, DriverError> {
        Ok(self.lock().page(page)?.url.clone())
    }

    async fn title(&self, page: &PageId) -> Result<String, DriverError> {
        Ok(self.lock().page(page)?.title.clone())
    }

    async fn wait_for_new_page(&self, known: &[PageId], timeout: Duration) -> Result<PageId, DriverError> {
        self.lock()
            .pages
            .iter()
            .find(|p| !p.closed && !known.contains(&p.id))
            .map(|p| p.id.clone())
            .ok_or_else(|| DriverError::Timeout(format!("no new page within {timeout:?}")))
    }

    async fn wait_for_url_prefix(
        &self,
        page: &PageId,
        prefix: &str,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        let url = self.lock().page(page)?.url.clone();
        if url.starts_with(prefix) {
            Ok(())
        } else {
            Err(DriverError::Timeout(format!("url {url} does not start with {prefix}")))
        }
    }

    async fn close(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.calls.push("close".to_string());
        state.closed = true;
        Ok(())
    }
}
