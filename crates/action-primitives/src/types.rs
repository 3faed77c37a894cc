//! Handles and value types exchanged with a browser driver

use std::fmt;

use scenario_core_types::{FrameId, PageId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One browsing context: a page's top document or one of its subframes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContextRef {
    Page(PageId),
    Frame { page: PageId, frame: FrameId },
}

impl ContextRef {
    pub fn page(&self) -> &PageId {
        match self {
            ContextRef::Page(page) => page,
            ContextRef::Frame { page, .. } => page,
        }
    }

    pub fn frame(&self) -> Option<&FrameId> {
        match self {
            ContextRef::Page(_) => None,
            ContextRef::Frame { frame, .. } => Some(frame),
        }
    }

    pub fn is_page(&self) -> bool {
        matches!(self, ContextRef::Page(_))
    }
}

impl fmt::Display for ContextRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextRef::Page(page) => write!(f, "page:{page}"),
            ContextRef::Frame { page, frame } => write!(f, "page:{page}/frame:{frame}"),
        }
    }
}

/// Lazily resolved element: the selector is re-evaluated on every operation,
/// so a handle survives re-renders of the element it names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    pub context: ContextRef,
    pub selector: String,
}

impl ElementHandle {
    pub fn new(context: ContextRef, selector: impl Into<String>) -> Self {
        Self {
            context,
            selector: selector.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementState {
    Attached,
    Visible,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickMode {
    /// Real pointer events with a hit-test at the target point
    Native,
    /// Pointer events without the interception check
    Forced,
}

/// Event sequence replayed through page script when pointer input fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventSequence {
    /// mousedown, mouseup, click
    Click,
    /// value assignment followed by input and change
    Input { value: String },
}

/// Element box in page viewport coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub id: PageId,
    pub url: String,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub id: FrameId,
    pub name: String,
    pub url: String,
    pub is_main: bool,
}

/// Result of [`crate::scripts::ACTIONABILITY_PROBE`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Actionability {
    pub attached: bool,
    pub visible: bool,
    pub enabled: bool,
    pub width: f64,
    pub height: f64,
    pub pointer_events_none: bool,
}

impl Actionability {
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    /// Reason the element cannot take input, if any.
    pub fn blocker(&self) -> Option<&'static str> {
        if !self.attached {
            Some("detached")
        } else if !self.visible {
            Some("not visible")
        } else if !self.enabled {
            Some("disabled")
        } else if self.width <= 0.0 || self.height <= 0.0 {
            Some("zero-sized")
        } else if self.pointer_events_none {
            Some("pointer-events:none")
        } else {
            None
        }
    }
}
