use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Passed,
    Failed,
}

/// One line of `step_log.jsonl`. Written once, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepLogEntry {
    pub index: usize,
    #[serde(rename = "type")]
    pub step_type: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<String>,
}

impl StepLogEntry {
    pub fn passed(index: usize, step_type: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            index,
            step_type: step_type.into(),
            status: StepStatus::Passed,
            duration_ms,
            screenshot_ref: None,
        }
    }

    pub fn failed(index: usize, step_type: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: StepStatus::Failed,
            ..Self::passed(index, step_type, duration_ms)
        }
    }

    pub fn with_screenshot(mut self, screenshot: Option<String>) -> Self {
        self.screenshot_ref = screenshot;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    pub index: usize,
    pub url: String,
    pub name: String,
    pub is_main: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub index: usize,
    pub url: String,
    pub title: String,
    pub is_main: bool,
}

/// Diagnostic captures for an unrecovered step failure (`failure_context.json`).
///
/// Every capture is optional; `capture_errors` records why one is missing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureArtifactBundle {
    pub step_index: usize,
    pub step_type: String,
    pub error_code: String,
    pub error_message: String,
    pub screenshot_path: Option<String>,
    pub html_dump_path: Option<String>,
    pub frame_list: Vec<FrameRecord>,
    pub popup_page_list: Vec<PageRecord>,
    pub current_url: Option<String>,
    pub current_title: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capture_errors: BTreeMap<String, String>,
    pub captured_at: DateTime<Utc>,
}
