//! In-page selector engine.
//!
//! Handles the locator forms the compiler emits: `text=`, `role=...[name=...]`,
//! `label=`, `css=`, `xpath=` and plain CSS. Quoted values match exactly
//! after whitespace normalisation; unquoted ones match case-insensitive
//! substrings. Invalid CSS resolves to nothing instead of throwing.

use serde_json::Value;

pub const RESOLVER: &str = r#"(root, selector) => {
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
  const unquote = (raw) => {
    const s = raw.trim();
    const q = s[0];
    if ((q === '"' || q === "'") && s.length > 1 && s[s.length - 1] === q) {
      return { value: norm(s.slice(1, -1).replace(/\\(.)/g, '$1')), exact: true };
    }
    return { value: norm(s), exact: false };
  };
  const matches = (actual, want) => want.exact
    ? actual === want.value
    : actual.toLowerCase().includes(want.value.toLowerCase());
  const skip = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE', 'HEAD']);
  const textOf = (el) => norm(el.innerText || el.textContent);
  const all = (sel) => Array.from(root.querySelectorAll(sel)).filter((el) => !skip.has(el.tagName));

  const byText = (spec) => {
    const want = unquote(spec);
    const hit = (el) => matches(textOf(el), want);
    return all('body, body *').find((el) => hit(el) && !Array.from(el.children).some(hit)) || null;
  };

  const implicitRole = (el) => {
    const tag = el.tagName.toLowerCase();
    const type = (el.getAttribute('type') || '').toLowerCase();
    if (tag === 'button') return 'button';
    if (tag === 'a' && el.hasAttribute('href')) return 'link';
    if (tag === 'input') {
      if (['button', 'submit', 'reset', 'image'].includes(type)) return 'button';
      if (type === 'checkbox' || type === 'radio') return type;
      if (type === 'search') return 'searchbox';
      if (['', 'text', 'email', 'tel', 'url', 'password', 'number'].includes(type)) return 'textbox';
      return null;
    }
    if (tag === 'textarea') return 'textbox';
    if (tag === 'select') return 'combobox';
    if (/^h[1-6]$/.test(tag)) return 'heading';
    if (tag === 'img') return 'img';
    if (tag === 'li') return 'listitem';
    if (tag === 'nav') return 'navigation';
    if (tag === 'dialog') return 'dialog';
    return null;
  };
  const roleOf = (el) => norm(el.getAttribute('role')).split(' ')[0] || implicitRole(el);
  const nameOf = (el) => {
    const ids = norm(el.getAttribute('aria-labelledby'));
    if (ids) {
      const text = norm(ids.split(' ').map((id) => {
        const node = el.ownerDocument.getElementById(id);
        return node ? textOf(node) : '';
      }).join(' '));
      if (text) return text;
    }
    const aria = norm(el.getAttribute('aria-label'));
    if (aria) return aria;
    if (el.labels && el.labels.length) return norm(Array.from(el.labels).map(textOf).join(' '));
    if (el.tagName === 'INPUT' && ['button', 'submit', 'reset'].includes((el.type || '').toLowerCase())) {
      return norm(el.value);
    }
    const alt = norm(el.getAttribute('alt'));
    if (alt) return alt;
    return textOf(el) || norm(el.getAttribute('title') || el.getAttribute('placeholder'));
  };
  const byRole = (spec) => {
    const m = spec.trim().match(/^([\w-]+)\s*(?:\[\s*name\s*=\s*(.+)\])?$/);
    if (!m) return null;
    const role = m[1].toLowerCase();
    const name = m[2] ? unquote(m[2]) : null;
    return all('*').find((el) => roleOf(el) === role && (!name || matches(nameOf(el), name))) || null;
  };

  const byLabel = (spec) => {
    const want = unquote(spec);
    const label = all('label').find((l) => l.control && matches(textOf(l), want));
    if (label) return label.control;
    return all('[aria-label]').find((el) => matches(norm(el.getAttribute('aria-label')), want)) || null;
  };

  const byXPath = (expr) => {
    const doc = root.ownerDocument || root;
    return doc.evaluate(expr, root, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
  };

  try {
    const s = selector.trim();
    if (s.startsWith('text=')) return byText(s.slice(5));
    if (s.startsWith('role=')) return byRole(s.slice(5));
    if (s.startsWith('label=')) return byLabel(s.slice(6));
    if (s.startsWith('css=')) return root.querySelector(s.slice(4));
    if (s.startsWith('xpath=')) return byXPath(s.slice(6));
    if (s.startsWith('//')) return byXPath(s);
    return root.querySelector(s);
  } catch (e) {
    return null;
  }
}"#;

/// Expression that evaluates to the first element matching `selector`, or null.
pub fn locate_expression(selector: &str) -> String {
    let literal = Value::String(selector.to_string()).to_string();
    format!("({RESOLVER})(document, {literal})")
}

/// True when the pointer would land on the element (or a descendant) at its centre.
pub const HIT_TEST: &str = r#"(el) => {
  const r = el.getBoundingClientRect();
  const hit = el.ownerDocument.elementFromPoint(r.left + r.width / 2, r.top + r.height / 2);
  return !!hit && (hit === el || el.contains(hit));
}"#;

pub const DISPATCH_CLICK: &str = r#"(el) => {
  for (const type of ['mousedown', 'mouseup']) {
    el.dispatchEvent(new MouseEvent(type, { bubbles: true, cancelable: true, view: window }));
  }
  el.click();
  return true;
}"#;

pub const DISPATCH_INPUT: &str = r#"(el, value) => {
  el.focus();
  el.value = value;
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return true;
}"#;

/// Focuses and clears an editable element; false if it cannot take text.
pub const PREPARE_FILL: &str = r#"(el) => {
  const editable = el.isContentEditable ||
    el.tagName === 'TEXTAREA' ||
    (el.tagName === 'INPUT' && !['button', 'submit', 'reset', 'checkbox', 'radio', 'file', 'image'].includes((el.type || '').toLowerCase()));
  if (!editable || el.disabled || el.readOnly) return false;
  el.focus();
  if (el.isContentEditable) {
    el.textContent = '';
  } else {
    el.value = '';
  }
  el.dispatchEvent(new Event('input', { bubbles: true }));
  return true;
}"#;

pub const COMMIT_FILL: &str = r#"(el) => {
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return true;
}"#;
