//! Failure artifacts.
//!
//! When a step fails for good, the collector captures what the page looked
//! like: a screenshot, the HTML, the frame tree and the open pages. Each
//! capture is independent; one that fails is noted in the bundle and the
//! rest still run.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use action_primitives::BrowserDriver;
use chrono::Utc;
use scenario_core_types::{step_number, FailureArtifactBundle, FrameRecord, PageId, PageRecord};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::errors::StepError;

pub const FAILURE_CONTEXT_FILE: &str = "failure_context.json";

/// Which step failed and where.
#[derive(Debug, Clone, Copy)]
pub struct FailureSite<'a> {
    pub step_index: usize,
    pub step_type: &'a str,
    pub error: &'a StepError,
    pub active: &'a PageId,
    pub main: &'a PageId,
}

pub struct FailureCollector {
    driver: Arc<dyn BrowserDriver>,
    work_dir: PathBuf,
    full_page: bool,
    collected: Mutex<HashMap<usize, FailureArtifactBundle>>,
}

impl FailureCollector {
    pub fn new(driver: Arc<dyn BrowserDriver>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            driver,
            work_dir: work_dir.into(),
            full_page: true,
            collected: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_full_page(mut self, full_page: bool) -> Self {
        self.full_page = full_page;
        self
    }

    /// Captures artifacts for a failed step. A second call for the same
    /// step returns the first bundle without touching the browser again.
    pub async fn collect(&self, site: FailureSite<'_>) -> FailureArtifactBundle {
        let mut collected = self.collected.lock().await;
        if let Some(bundle) = collected.get(&site.step_index) {
            return bundle.clone();
        }

        let bundle = self.capture(&site).await;
        self.write_context(&bundle).await;
        info!(
            step_index = site.step_index,
            capture_errors = bundle.capture_errors.len(),
            "failure artifacts collected"
        );
        collected.insert(site.step_index, bundle.clone());
        bundle
    }

    async fn capture(&self, site: &FailureSite<'_>) -> FailureArtifactBundle {
        let number = step_number(site.step_index);
        let mut errors = BTreeMap::new();

        let shot = self.work_dir.join(format!("failure_step_{number}.png"));
        let screenshot_path = match self
            .driver
            .screenshot(site.active, &shot, self.full_page)
            .await
        {
            Ok(()) => Some(file_name(&shot)),
            Err(err) => {
                errors.insert("screenshot".to_string(), err.to_string());
                None
            }
        };

        let html = self.work_dir.join(format!("failure_step_{number}.html"));
        let html_dump_path = match self.driver.content(site.active).await {
            Ok(content) => match tokio::fs::write(&html, content).await {
                Ok(()) => Some(file_name(&html)),
                Err(err) => {
                    errors.insert("html".to_string(), err.to_string());
                    None
                }
            },
            Err(err) => {
                errors.insert("html".to_string(), err.to_string());
                None
            }
        };

        let frame_list = match self.driver.frames(site.active).await {
            Ok(frames) => frames
                .into_iter()
                .enumerate()
                .map(|(index, frame)| FrameRecord {
                    index,
                    url: frame.url,
                    name: frame.name,
                    is_main: frame.is_main,
                })
                .collect(),
            Err(err) => {
                errors.insert("frames".to_string(), err.to_string());
                Vec::new()
            }
        };

        let popup_page_list = match self.driver.pages().await {
            Ok(pages) => pages
                .into_iter()
                .enumerate()
                .map(|(index, page)| PageRecord {
                    index,
                    is_main: &page.id == site.main,
                    url: page.url,
                    title: page.title,
                })
                .collect(),
            Err(err) => {
                errors.insert("pages".to_string(), err.to_string());
                Vec::new()
            }
        };

        let current_url = match self.driver.current_url(site.active).await {
            Ok(url) => Some(url),
            Err(err) => {
                errors.insert("url".to_string(), err.to_string());
                None
            }
        };
        let current_title = match self.driver.title(site.active).await {
            Ok(title) => Some(title),
            Err(err) => {
                errors.insert("title".to_string(), err.to_string());
                None
            }
        };

        FailureArtifactBundle {
            step_index: site.step_index,
            step_type: site.step_type.to_string(),
            error_code: site.error.code().to_string(),
            error_message: site.error.to_string(),
            screenshot_path,
            html_dump_path,
            frame_list,
            popup_page_list,
            current_url,
            current_title,
            capture_errors: errors,
            captured_at: Utc::now(),
        }
    }

    async fn write_context(&self, bundle: &FailureArtifactBundle) {
        let path = self.work_dir.join(FAILURE_CONTEXT_FILE);
        let body = match serde_json::to_string_pretty(bundle) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "failed to serialise failure context");
                return;
            }
        };
        if let Err(err) = tokio::fs::write(&path, body).await {
            warn!(path = %path.display(), error = %err, "failed to write failure context");
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_primitives::fake::FakeDriver;

    fn site<'a>(error: &'a StepError, page: &'a PageId) -> FailureSite<'a> {
        FailureSite {
            step_index: 7,
            step_type: "click",
            error,
            active: page,
            main: page,
        }
    }

    #[tokio::test]
    async fn writes_all_captures() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::new());
        let page = driver.main_page();
        driver.set_url(&page, "https://shop.test/cart");
        driver.add_frame(&page, "pay", "https://pay.test/");
        let collector = FailureCollector::new(driver.clone(), dir.path());
        let error = StepError::ElementNotFound("#buy".into());

        let bundle = collector.collect(site(&error, &page)).await;

        assert_eq!(bundle.error_code, "ELEMENT_NOT_FOUND");
        assert_eq!(bundle.screenshot_path.as_deref(), Some("failure_step_007.png"));
        assert_eq!(bundle.html_dump_path.as_deref(), Some("failure_step_007.html"));
        assert_eq!(bundle.frame_list.len(), 2);
        assert!(bundle.frame_list[0].is_main);
        assert_eq!(bundle.popup_page_list.len(), 1);
        assert_eq!(bundle.current_url.as_deref(), Some("https://shop.test/cart"));
        assert!(bundle.capture_errors.is_empty());
        assert!(dir.path().join("failure_step_007.png").exists());
        assert!(dir.path().join(FAILURE_CONTEXT_FILE).exists());
    }

    #[tokio::test]
    async fn failed_captures_are_recorded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::new());
        driver.fail_screenshots(true);
        driver.fail_content(true);
        let page = driver.main_page();
        let collector = FailureCollector::new(driver.clone(), dir.path());
        let error = StepError::AssertionFailed("nope".into());

        let bundle = collector.collect(site(&error, &page)).await;

        assert!(bundle.screenshot_path.is_none());
        assert!(bundle.html_dump_path.is_none());
        assert!(bundle.capture_errors.contains_key("screenshot"));
        assert!(bundle.capture_errors.contains_key("html"));
        assert!(bundle.current_url.is_some());
    }

    #[tokio::test]
    async fn second_collection_for_a_step_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::new());
        let page = driver.main_page();
        let collector = FailureCollector::new(driver.clone(), dir.path());
        let error = StepError::ElementNotFound("#x".into());

        let first = collector.collect(site(&error, &page)).await;
        let second = collector.collect(site(&error, &page)).await;

        assert_eq!(first, second);
        assert_eq!(driver.count_calls("screenshot failure_step_007"), 1);
    }
}
