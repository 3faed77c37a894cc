//! Frame resolution from recorded frame hints.

use std::time::Duration;

use action_primitives::{poll_until, BrowserDriver, ContextRef, FrameInfo};
use scenario_core_types::{FrameHint, PageId};
use tracing::{debug, warn};

use crate::errors::GateError;

/// Optional polling while a freshly created iframe attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameWait {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for FrameWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5_000),
            interval: Duration::from_millis(200),
        }
    }
}

/// Either URL is a prefix of the other. Tolerates query and hash drift
/// between recording and replay.
pub fn urls_match(recorded: &str, live: &str) -> bool {
    if recorded.is_empty() || live.is_empty() {
        return false;
    }
    recorded == live || live.starts_with(recorded) || recorded.starts_with(live)
}

fn pick<'a>(frames: &'a [FrameInfo], hint: &FrameHint) -> Option<&'a FrameInfo> {
    let subframes = || frames.iter().filter(|f| !f.is_main);

    if let Some(href) = hint.href.as_deref().filter(|h| !h.is_empty()) {
        if let Some(found) = subframes().find(|f| f.url == href) {
            return Some(found);
        }
        if let Some(found) = subframes().find(|f| urls_match(href, &f.url)) {
            return Some(found);
        }
    }

    hint.name
        .as_deref()
        .filter(|n| !n.is_empty())
        .and_then(|name| subframes().find(|f| f.name == name))
}

/// Resolves the context a step should act in.
///
/// No hint or `isTop` means the page itself. A subframe hint that matches
/// nothing is an error; the step is not silently redirected to the page.
pub async fn resolve_frame(
    driver: &dyn BrowserDriver,
    page: &PageId,
    hint: Option<&FrameHint>,
    wait: Option<FrameWait>,
) -> Result<ContextRef, GateError> {
    let Some(hint) = hint.filter(|h| h.targets_subframe()) else {
        return Ok(ContextRef::Page(page.clone()));
    };

    let wait = wait.unwrap_or(FrameWait {
        timeout: Duration::ZERO,
        interval: Duration::ZERO,
    });

    let found = poll_until(wait.timeout, wait.interval, || async move {
        match driver.frames(page).await {
            Ok(frames) => pick(&frames, hint).map(|f| f.id.clone()),
            Err(err) => {
                debug!(error = %err, "frame enumeration failed");
                None
            }
        }
    })
    .await;

    match found {
        Some(frame) => {
            debug!(page = %page, frame = %frame, "resolved frame");
            Ok(ContextRef::Frame {
                page: page.clone(),
                frame,
            })
        }
        None => {
            let wanted = format!(
                "name={} href={}",
                hint.name.as_deref().unwrap_or("-"),
                hint.href.as_deref().unwrap_or("-")
            );
            warn!(page = %page, frame = %wanted, "frame not found");
            Err(GateError::FrameNotFound(wanted))
        }
    }
}
