use serde::{Deserialize, Serialize};

/// Default timeout carried by every inferred success condition.
pub const DEFAULT_CONDITION_TIMEOUT_MS: u64 = 15_000;

fn default_timeout() -> u64 {
    DEFAULT_CONDITION_TIMEOUT_MS
}

/// Externally observable signal that an action had its intended effect.
///
/// A step's conditions are OR-combined: the first condition that holds in any
/// evaluation scope satisfies the step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuccessCondition {
    ModalVisible {
        text: String,
        #[serde(default = "default_timeout")]
        timeout: u64,
    },
    /// `url` is a prefix pattern; a trailing `*` is accepted and ignored.
    UrlChanged {
        #[serde(rename = "url", alias = "url_prefix", alias = "urlPrefix")]
        url_prefix: String,
        #[serde(default = "default_timeout")]
        timeout: u64,
    },
    PopupOpened {
        #[serde(default = "default_timeout")]
        timeout: u64,
    },
    ElementVisible {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default = "default_timeout")]
        timeout: u64,
    },
}

impl SuccessCondition {
    pub fn timeout_ms(&self) -> u64 {
        match self {
            SuccessCondition::ModalVisible { timeout, .. }
            | SuccessCondition::UrlChanged { timeout, .. }
            | SuccessCondition::PopupOpened { timeout }
            | SuccessCondition::ElementVisible { timeout, .. } => *timeout,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SuccessCondition::ModalVisible { .. } => "modal_visible",
            SuccessCondition::UrlChanged { .. } => "url_changed",
            SuccessCondition::PopupOpened { .. } => "popup_opened",
            SuccessCondition::ElementVisible { .. } => "element_visible",
        }
    }

    /// Short human description used in logs and checkpoints.
    pub fn describe(&self) -> String {
        match self {
            SuccessCondition::ModalVisible { text, .. } => format!("modal_visible(text={text})"),
            SuccessCondition::UrlChanged { url_prefix, .. } => {
                format!("url_changed(prefix={})", url_prefix_of(url_prefix))
            }
            SuccessCondition::PopupOpened { .. } => "popup_opened".to_string(),
            SuccessCondition::ElementVisible { selector, text, .. } => match (selector, text) {
                (_, Some(text)) => format!("element_visible(text={text})"),
                (Some(selector), None) => format!("element_visible(selector={selector})"),
                (None, None) => "element_visible()".to_string(),
            },
        }
    }
}

/// Strips the optional trailing glob from a URL pattern.
pub fn url_prefix_of(pattern: &str) -> &str {
    pattern.trim_end_matches('*')
}
