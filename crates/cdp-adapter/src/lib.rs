//! Chrome DevTools Protocol driver for scenario runs.
//!
//! [`CdpDriver`] implements the executor's `BrowserDriver` capability on top
//! of a [`CdpTransport`]. The production transport launches Chromium (or
//! attaches to a running one) through chromiumoxide's websocket connection;
//! tests substitute a scripted transport.

pub mod config;
pub mod driver;
pub mod error;
pub mod selectors;
pub mod storage;
pub mod transport;
pub mod util;

pub use config::{detect_chrome_executable, headless_from_env, CdpConfig, Viewport};
pub use driver::CdpDriver;
pub use error::{AdapterError, AdapterErrorKind};
pub use storage::{StorageCookie, StorageState};
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget};
