//! Executor tuning.
//!
//! Every wait the executor performs is bounded by one of these values. The
//! defaults are the empirically tuned figures recorded scenarios were built
//! against.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorTimings {
    pub settle_after_click_ms: u64,
    pub settle_after_fill_ms: u64,
    pub settle_without_conditions_ms: u64,
    pub hover_timeout_ms: u64,
    pub hover_settle_ms: u64,
    pub dom_ready_timeout_ms: u64,
    pub stabilize_timeout_ms: u64,
    pub strategy_timeout_ms: u64,
    pub condition_timeout_ms: u64,
    pub retry_pause_ms: u64,
    pub error_retry_pause_ms: u64,
    pub max_retries: u32,
    pub frame_wait_timeout_ms: u64,
    pub frame_poll_interval_ms: u64,
    pub popup_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    pub assert_timeout_ms: u64,
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ExecutorTimings {
    fn default() -> Self {
        Self {
            settle_after_click_ms: 2_000,
            settle_after_fill_ms: 3_000,
            settle_without_conditions_ms: 500,
            hover_timeout_ms: 2_000,
            hover_settle_ms: 300,
            dom_ready_timeout_ms: 1_500,
            stabilize_timeout_ms: 5_000,
            strategy_timeout_ms: 8_000,
            condition_timeout_ms: 15_000,
            retry_pause_ms: 2_000,
            error_retry_pause_ms: 500,
            max_retries: 2,
            frame_wait_timeout_ms: 5_000,
            frame_poll_interval_ms: 200,
            popup_timeout_ms: 8_000,
            navigation_timeout_ms: 30_000,
            assert_timeout_ms: 8_000,
            wait_timeout_ms: 15_000,
            poll_interval_ms: 100,
        }
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

impl ExecutorTimings {
    /// All waits and pauses at zero, retries unchanged. For tests.
    pub fn instant() -> Self {
        Self {
            settle_after_click_ms: 0,
            settle_after_fill_ms: 0,
            settle_without_conditions_ms: 0,
            hover_timeout_ms: 0,
            hover_settle_ms: 0,
            dom_ready_timeout_ms: 0,
            stabilize_timeout_ms: 0,
            strategy_timeout_ms: 0,
            condition_timeout_ms: 0,
            retry_pause_ms: 0,
            error_retry_pause_ms: 0,
            frame_wait_timeout_ms: 0,
            frame_poll_interval_ms: 1,
            popup_timeout_ms: 0,
            navigation_timeout_ms: 0,
            assert_timeout_ms: 0,
            wait_timeout_ms: 0,
            poll_interval_ms: 1,
            ..Self::default()
        }
    }

    pub fn hover_timeout(&self) -> Duration {
        ms(self.hover_timeout_ms)
    }

    pub fn hover_settle(&self) -> Duration {
        ms(self.hover_settle_ms)
    }

    pub fn dom_ready_timeout(&self) -> Duration {
        ms(self.dom_ready_timeout_ms)
    }

    pub fn stabilize_timeout(&self) -> Duration {
        ms(self.stabilize_timeout_ms)
    }

    pub fn strategy_timeout(&self) -> Duration {
        ms(self.strategy_timeout_ms)
    }

    pub fn frame_wait_timeout(&self) -> Duration {
        ms(self.frame_wait_timeout_ms)
    }

    pub fn frame_poll_interval(&self) -> Duration {
        ms(self.frame_poll_interval_ms)
    }

    pub fn popup_timeout(&self) -> Duration {
        ms(self.popup_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        ms(self.navigation_timeout_ms)
    }

    pub fn assert_timeout(&self) -> Duration {
        ms(self.assert_timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        ms(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        ms(self.poll_interval_ms)
    }
}

/// Which artifacts a run writes besides the step log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactOptions {
    pub step_screenshots: bool,
    pub debug_checkpoints: bool,
    pub full_page_screenshots: bool,
}

impl Default for ArtifactOptions {
    fn default() -> Self {
        Self {
            step_screenshots: true,
            debug_checkpoints: true,
            full_page_screenshots: true,
        }
    }
}

/// Login indicator used by `ensure_logged_in`/`ensure_logged_out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthOptions {
    pub account_selector: String,
    pub logged_out_text: String,
    pub storage_state_path: Option<String>,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            account_selector: "#btnUser".to_string(),
            logged_out_text: "로그인".to_string(),
            storage_state_path: None,
        }
    }
}

/// Everything the executor and run loop are configured with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub timings: ExecutorTimings,
    pub artifacts: ArtifactOptions,
    pub auth: AuthOptions,
}
