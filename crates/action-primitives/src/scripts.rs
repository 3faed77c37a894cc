//! Element scripts passed to [`crate::BrowserDriver::evaluate`].
//!
//! Each constant is a function source taking the resolved element.

/// Returns `{attached, visible, enabled, width, height, pointerEventsNone}`.
pub const ACTIONABILITY_PROBE: &str = r#"(el) => {
  const style = window.getComputedStyle(el);
  const rect = el.getBoundingClientRect();
  return {
    attached: el.isConnected,
    visible: style.visibility !== 'hidden' && style.display !== 'none' && rect.width > 0 && rect.height > 0,
    enabled: !(el.disabled === true || el.getAttribute('aria-disabled') === 'true'),
    width: rect.width,
    height: rect.height,
    pointerEventsNone: style.pointerEvents === 'none'
  };
}"#;

/// Returns the element's rendered text.
pub const INNER_TEXT: &str = r#"(el) => (el.innerText || el.textContent || '')"#;

/// Computed-style visibility check used by `expect_visible`.
pub const VISIBILITY_PROBE: &str = r#"(el) => {
  const rect = el.getBoundingClientRect();
  const style = window.getComputedStyle(el);
  return rect.width > 0 && rect.height > 0 &&
    style.visibility !== 'hidden' &&
    style.display !== 'none' &&
    parseFloat(style.opacity || '1') > 0;
}"#;

pub const SCROLL_INTO_VIEW: &str =
    r#"(el) => { el.scrollIntoView({block: 'center', inline: 'center'}); return true; }"#;
