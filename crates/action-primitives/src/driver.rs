use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use scenario_core_types::PageId;
use serde_json::Value;

use crate::errors::DriverError;
use crate::types::{
    BoundingBox, ClickMode, ContextRef, ElementHandle, ElementState, EventSequence, FrameInfo,
    PageInfo,
};

/// Capabilities the step executor needs from a browsing session.
///
/// Every wait takes an explicit timeout. Implementations must return
/// [`DriverError::Timeout`] rather than block past it.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Opens a blank page and returns its id.
    async fn new_page(&self) -> Result<PageId, DriverError>;

    /// Open pages in the order they were first seen.
    async fn pages(&self) -> Result<Vec<PageInfo>, DriverError>;

    async fn close_page(&self, page: &PageId) -> Result<(), DriverError>;

    async fn navigate(&self, page: &PageId, url: &str, timeout: Duration)
        -> Result<(), DriverError>;

    async fn wait_for_dom_ready(
        &self,
        context: &ContextRef,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Frames of a page in document order, main frame first.
    async fn frames(&self, page: &PageId) -> Result<Vec<FrameInfo>, DriverError>;

    /// Builds a lazy handle. Nothing is resolved until the handle is used.
    fn locate(&self, context: &ContextRef, selector: &str) -> ElementHandle {
        ElementHandle::new(context.clone(), selector)
    }

    async fn wait_for_state(
        &self,
        element: &ElementHandle,
        state: ElementState,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Immediate visibility probe; a missing element is simply not visible.
    async fn is_visible(&self, element: &ElementHandle) -> Result<bool, DriverError>;

    /// Runs a function source `(el) => ...` against the resolved element.
    async fn evaluate(&self, element: &ElementHandle, script: &str)
        -> Result<Value, DriverError>;

    async fn bounding_box(
        &self,
        element: &ElementHandle,
    ) -> Result<Option<BoundingBox>, DriverError>;

    async fn hover(&self, element: &ElementHandle, timeout: Duration) -> Result<(), DriverError>;

    async fn click(
        &self,
        element: &ElementHandle,
        mode: ClickMode,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    async fn click_at(&self, page: &PageId, x: f64, y: f64) -> Result<(), DriverError>;

    async fn dispatch_events(
        &self,
        element: &ElementHandle,
        sequence: &EventSequence,
    ) -> Result<(), DriverError>;

    async fn fill(
        &self,
        element: &ElementHandle,
        value: &str,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    async fn screenshot(&self, page: &PageId, path: &Path, full_page: bool)
        -> Result<(), DriverError>;

    async fn content(&self, page: &PageId) -> Result<String, DriverError>;

    async fn current_url(&self, page: &PageId) -> Result<String, DriverError>;

    async fn title(&self, page: &PageId) -> Result<String, DriverError>;

    /// Waits for a page that is not in `known` and returns it.
    async fn wait_for_new_page(
        &self,
        known: &[PageId],
        timeout: Duration,
    ) -> Result<PageId, DriverError>;

    async fn wait_for_url_prefix(
        &self,
        page: &PageId,
        prefix: &str,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Releases the session. Called exactly once by the run loop.
    async fn close(&self) -> Result<(), DriverError>;
}
