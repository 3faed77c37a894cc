//! Browser launch settings and Chrome discovery.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use which::which;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1440,
            height: 900,
        }
    }
}

/// Configuration for launching Chromium and tuning the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    /// Upper bound for a single protocol command.
    pub default_deadline_ms: u64,
    /// Attach to a running browser instead of launching one.
    pub websocket_url: Option<String>,
    /// `0` disables the keep-alive probe.
    pub heartbeat_interval_ms: u64,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone: String,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable().unwrap_or_default(),
            user_data_dir: default_profile_dir(),
            headless: headless_from_env().unwrap_or(true),
            default_deadline_ms: 30_000,
            websocket_url: None,
            heartbeat_interval_ms: 15_000,
            viewport: Viewport::default(),
            locale: "ko-KR".to_string(),
            timezone: "Asia/Seoul".to_string(),
        }
    }
}

/// `SCENARIO_HEADLESS`: `0`, `false`, `no` or `off` ask for a visible window.
pub fn headless_from_env() -> Option<bool> {
    let value = env::var("SCENARIO_HEADLESS").ok()?;
    let lower = value.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return None;
    }
    Some(!matches!(lower.as_str(), "0" | "false" | "no" | "off"))
}

fn default_profile_dir() -> PathBuf {
    Path::new("./.scenario-profile").into()
}

/// Finds a Chrome or Chromium binary: `SCENARIO_CHROME`, then `PATH`,
/// then the usual install locations.
pub fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("SCENARIO_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    os_specific_chrome_paths()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let root = PathBuf::from(value.trim());
                paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                paths.push(root.join("Chromium/Application/chrome.exe"));
            }
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recorded_environment() {
        let cfg = CdpConfig::default();
        assert_eq!(cfg.viewport, Viewport { width: 1440, height: 900 });
        assert_eq!(cfg.locale, "ko-KR");
        assert_eq!(cfg.timezone, "Asia/Seoul");
        assert_eq!(cfg.default_deadline_ms, 30_000);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg: CdpConfig = serde_json::from_value(serde_json::json!({
            "headless": false,
            "viewport": { "width": 800, "height": 600 }
        }))
        .unwrap();
        assert!(!cfg.headless);
        assert_eq!(cfg.viewport.width, 800);
        assert_eq!(cfg.timezone, "Asia/Seoul");
    }
}
