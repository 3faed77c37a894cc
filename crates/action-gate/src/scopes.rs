//! Evaluation scopes.
//!
//! A scope is one browsing context in which a success condition may hold.
//! Scopes are enumerated fresh for every evaluation pass; frames and popups
//! come and go while an action settles.

use action_primitives::{BrowserDriver, ContextRef};
use scenario_core_types::PageId;
use serde::Serialize;

use crate::errors::GateError;

const NAME_URL_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    TopPage,
    Frame,
    Popup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationScope {
    pub kind: ScopeKind,
    pub context: ContextRef,
    /// Diagnostic name, e.g. `frame_1_https://pay.test/widget`.
    pub name: String,
}

impl EvaluationScope {
    /// URL conditions only make sense for whole pages.
    pub fn is_page(&self) -> bool {
        self.context.is_page()
    }
}

fn short_url(url: &str) -> String {
    url.chars().take(NAME_URL_CHARS).collect()
}

/// Enumerates scopes in fixed order: the active page, its subframes in
/// document order, then every other open page in open order.
pub async fn resolve_scopes(
    driver: &dyn BrowserDriver,
    active: &PageId,
) -> Result<Vec<EvaluationScope>, GateError> {
    let mut scopes = vec![EvaluationScope {
        kind: ScopeKind::TopPage,
        context: ContextRef::Page(active.clone()),
        name: "top_page".to_string(),
    }];

    for (idx, frame) in driver.frames(active).await?.into_iter().enumerate() {
        if frame.is_main {
            continue;
        }
        scopes.push(EvaluationScope {
            kind: ScopeKind::Frame,
            name: format!("frame_{idx}_{}", short_url(&frame.url)),
            context: ContextRef::Frame {
                page: active.clone(),
                frame: frame.id,
            },
        });
    }

    for (idx, page) in driver.pages().await?.into_iter().enumerate() {
        if &page.id == active {
            continue;
        }
        scopes.push(EvaluationScope {
            kind: ScopeKind::Popup,
            name: format!("popup_{idx}_{}", short_url(&page.url)),
            context: ContextRef::Page(page.id),
        });
    }

    Ok(scopes)
}
