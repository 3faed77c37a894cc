//! Runner configuration.
//!
//! One YAML document with a `browser` section for the Chromium session and
//! the executor's `timings`, `artifacts` and `auth` sections at top level.
//! A few environment variables override whatever the file says.

use std::env;
use std::path::PathBuf;

use action_flow::FlowConfig;
use cdp_adapter::{headless_from_env, CdpConfig};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub browser: CdpConfig,
    #[serde(flatten)]
    pub flow: FlowConfig,
}

impl RunnerConfig {
    /// `SCENARIO_HEADLESS`, `SCENARIO_CHROME` and `SCENARIO_STORAGE_STATE`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(headless) = headless_from_env() {
            self.browser.headless = headless;
        }
        if let Some(chrome) = non_empty_var("SCENARIO_CHROME") {
            self.browser.executable = PathBuf::from(chrome);
        }
        if let Some(state) = non_empty_var("SCENARIO_STORAGE_STATE") {
            self.flow.auth.storage_state_path = Some(state);
        }
    }

    /// Settings that would make a run misbehave. Empty when usable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let viewport = self.browser.viewport;
        if viewport.width == 0 || viewport.height == 0 {
            problems.push(format!(
                "browser.viewport must be non-zero, got {}x{}",
                viewport.width, viewport.height
            ));
        }
        if self.browser.default_deadline_ms == 0 {
            problems.push("browser.default_deadline_ms must be positive".to_string());
        }
        let timings = &self.flow.timings;
        if timings.poll_interval_ms == 0 {
            problems.push("timings.poll_interval_ms must be positive".to_string());
        }
        if timings.frame_poll_interval_ms == 0 {
            problems.push("timings.frame_poll_interval_ms must be positive".to_string());
        }
        if let Some(path) = &self.flow.auth.storage_state_path {
            if !PathBuf::from(path).exists() {
                problems.push(format!("auth.storage_state_path {path} does not exist"));
            }
        }
        problems
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
