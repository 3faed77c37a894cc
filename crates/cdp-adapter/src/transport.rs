//! Connection to Chromium.
//!
//! A background task owns the websocket. Commands reach it over a channel
//! and their responses come back on per-call oneshots. Protocol events are
//! drained and dropped: the driver polls target state instead of tracking
//! it from events.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::extract_ws_url;

/// Where a command is sent: the browser endpoint or an attached session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;

    /// Closes the browser if this transport launched it.
    async fn shutdown(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

type Responder = oneshot::Sender<Result<Value, AdapterError>>;

type RuntimeFactory = Arc<
    dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Arc<RuntimeState>, AdapterError>> + Send + Sync,
>;

/// Transport backed by a launched (or attached) Chromium process.
///
/// The runtime is created lazily and recreated if the connection task dies.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    state: Arc<Mutex<Option<Arc<RuntimeState>>>>,
    factory: RuntimeFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let factory: RuntimeFactory = Arc::new(|cfg: CdpConfig| {
            Box::pin(async move { Ok(Arc::new(RuntimeState::start(cfg).await?)) })
        });
        Self::with_factory(cfg, factory)
    }

    fn with_factory(cfg: CdpConfig, factory: RuntimeFactory) -> Self {
        Self {
            cfg,
            state: Arc::new(Mutex::new(None)),
            factory,
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }

    async fn runtime(&self) -> Result<Arc<RuntimeState>, AdapterError> {
        let mut guard = self.state.lock().await;
        if let Some(rt) = guard.as_ref() {
            if rt.is_alive() {
                return Ok(rt.clone());
            }
            warn!(target: "cdp-transport", "connection lost, starting a new browser runtime");
        }

        let runtime = (self.factory)(self.cfg.clone()).await?;
        *guard = Some(runtime.clone());
        Ok(runtime)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        let runtime = self.runtime().await?;
        runtime
            .send(
                CommandTarget::Browser,
                "Target.setDiscoverTargets",
                json!({ "discover": true }),
                self.deadline(),
            )
            .await?;
        Ok(())
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let runtime = self.runtime().await?;
        runtime.send(target, method, params, self.deadline()).await
    }

    async fn shutdown(&self) -> Result<(), AdapterError> {
        let runtime = self.state.lock().await.take();
        let Some(runtime) = runtime else {
            return Ok(());
        };
        if runtime.launched && runtime.is_alive() {
            // The connection drops as Chrome exits, so a missing reply is expected.
            if let Err(err) = runtime
                .send(CommandTarget::Browser, "Browser.close", json!({}), self.deadline())
                .await
            {
                debug!(target: "cdp-transport", %err, "Browser.close did not answer");
            }
        }
        info!(target: "cdp-transport", "browser session closed");
        Ok(())
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: Responder,
}

struct RuntimeState {
    command_tx: mpsc::Sender<ControlMessage>,
    loop_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
    launched: bool,
}

impl RuntimeState {
    async fn start(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let (child, ws_url) = match cfg.websocket_url.clone() {
            Some(url) => (None, url),
            None => {
                let mut child = browser_config(&cfg)?.launch().map_err(|err| {
                    AdapterError::new(AdapterErrorKind::Internal)
                        .with_hint(format!("failed to launch chromium: {err}"))
                })?;
                let ws_url = extract_ws_url(&mut child).await?;
                (Some(child), ws_url)
            }
        };
        let launched = child.is_some();

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let alive = Arc::new(AtomicBool::new(true));

        let loop_alive = alive.clone();
        let loop_task = tokio::spawn(async move {
            let result = run_loop(conn, command_rx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-transport", %err, "connection loop ended with an error");
            }
        });

        let heartbeat_task = spawn_heartbeat(
            command_tx.clone(),
            alive.clone(),
            Duration::from_millis(cfg.heartbeat_interval_ms),
        );

        info!(target: "cdp-transport", url = %ws_url, launched, "chromium connection established");

        Ok(Self {
            command_tx,
            loop_task,
            heartbeat_task,
            child: Mutex::new(child),
            alive,
            launched,
        })
    }

    #[cfg(test)]
    fn stub() -> (Arc<Self>, Arc<AtomicBool>) {
        let (command_tx, _command_rx) = mpsc::channel(8);
        let alive = Arc::new(AtomicBool::new(true));
        let loop_task = tokio::spawn(futures::future::pending::<()>());
        (
            Arc::new(Self {
                command_tx,
                loop_task,
                heartbeat_task: None,
                child: Mutex::new(None),
                alive: alive.clone(),
                launched: false,
            }),
            alive,
        )
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (responder, response) = oneshot::channel();
        self.command_tx
            .send(ControlMessage {
                target,
                method: method.to_string(),
                params,
                responder,
            })
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        match tokio::time::timeout(deadline, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("{method}: response channel closed"))),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                .with_hint(format!("{method} timed out"))
                .retriable(true)),
        }
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        if let Some(handle) = &self.heartbeat_task {
            handle.abort();
        }

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            if let Err(err) = child.kill().await {
                                warn!(target: "cdp-transport", %err, "failed to kill chromium");
                            }
                        });
                    }
                    Err(_) => debug!(target: "cdp-transport", "no runtime left to kill chromium"),
                }
            }
        }
    }
}

fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!(
                "chrome executable not found at {}",
                cfg.executable.display()
            ))
            .with_data(json!({
                "expected": cfg.executable,
                "hint": "Set SCENARIO_CHROME to the full path of chrome/chromium."
            })));
    }

    let profile_dir = absolute_profile_dir(&cfg.user_data_dir)?;
    fs::create_dir_all(&profile_dir).map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("failed to create user-data-dir: {err}"))
    })?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(Duration::from_secs(20))
        .window_size(cfg.viewport.width, cfg.viewport.height)
        .user_data_dir(profile_dir);

    if !cfg.headless {
        builder = builder.with_head();
    }
    if std::env::var("SCENARIO_DISABLE_SANDBOX")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        builder = builder.no_sandbox();
    }

    let lang = format!("--lang={}", cfg.locale);
    let mut args = vec![
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-breakpad",
        "--disable-component-update",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-popup-blocking",
        "--disable-sync",
        // keeps every frame in the page's renderer so one session reaches all of them
        "--disable-features=site-per-process,IsolateOrigins",
        "--no-first-run",
        "--no-default-browser-check",
        "--password-store=basic",
        "--remote-allow-origins=*",
        "--use-mock-keychain",
        lang.as_str(),
    ];
    if cfg.headless {
        args.push("--headless=new");
        args.push("--hide-scrollbars");
        args.push("--mute-audio");
    }
    builder = builder.args(args);

    if !cfg.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(cfg.executable.clone());
    }

    builder.build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal).with_hint(format!("browser config error: {err}"))
    })
}

fn absolute_profile_dir(dir: &Path) -> Result<PathBuf, AdapterError> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("failed to resolve cwd for user-data-dir: {err}"))
    })?;
    Ok(cwd.join(dir))
}

fn spawn_heartbeat(
    sender: mpsc::Sender<ControlMessage>,
    alive: Arc<AtomicBool>,
    every: Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }
    let reply_deadline = every.min(Duration::from_secs(5));

    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        while alive.load(Ordering::Relaxed) {
            ticker.tick().await;
            let (responder, response) = oneshot::channel();
            let probe = ControlMessage {
                target: CommandTarget::Browser,
                method: "Browser.getVersion".to_string(),
                params: json!({}),
                responder,
            };
            if sender.send(probe).await.is_err() {
                break;
            }
            match tokio::time::timeout(reply_deadline, response).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(err))) => {
                    warn!(target: "cdp-transport", %err, "heartbeat failed");
                    break;
                }
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!(target: "cdp-transport", "heartbeat timed out");
                    break;
                }
            }
        }
    }))
}

async fn run_loop(
    mut conn: Connection<CdpEventMessage>,
    mut command_rx: mpsc::Receiver<ControlMessage>,
) -> Result<(), AdapterError> {
    let mut inflight: HashMap<CallId, Responder> = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = command_rx.recv() => {
                let session = match cmd.target {
                    CommandTarget::Browser => None,
                    CommandTarget::Session(id) => Some(CdpSessionId::from(id)),
                };
                let method: MethodId = cmd.method.clone().into();
                match conn.submit_command(method, session, cmd.params) {
                    Ok(call_id) => {
                        inflight.insert(call_id, cmd.responder);
                    }
                    Err(err) => {
                        let err = AdapterError::new(AdapterErrorKind::CdpIo)
                            .with_hint(format!("{}: {err}", cmd.method));
                        let _ = cmd.responder.send(Err(err.clone()));
                        return Err(err);
                    }
                }
            }
            message = conn.next() => {
                match message {
                    Some(Ok(Message::Response(resp))) => {
                        if let Some(responder) = inflight.remove(&resp.id) {
                            let _ = responder.send(extract_payload(resp));
                        }
                    }
                    Some(Ok(Message::Event(_))) => {
                        trace!(target: "cdp-transport", "event dropped");
                    }
                    Some(Err(err)) => {
                        let err = map_cdp_error(err);
                        for (_, responder) in inflight.drain() {
                            let _ = responder.send(Err(err.clone()));
                        }
                        return Err(err);
                    }
                    None => {
                        let err = AdapterError::new(AdapterErrorKind::CdpIo)
                            .with_hint("cdp connection closed");
                        for (_, responder) in inflight.drain() {
                            let _ = responder.send(Err(err.clone()));
                        }
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn extract_payload(resp: Response) -> Result<Value, AdapterError> {
    if let Some(result) = resp.result {
        return Ok(result);
    }
    match resp.error {
        Some(error) => {
            let kind = if error.message.contains("No target with given id")
                || error.message.contains("Session with given id not found")
            {
                AdapterErrorKind::TargetNotFound
            } else {
                AdapterErrorKind::CdpIo
            };
            Err(AdapterError::new(kind)
                .with_hint(format!("cdp error {}: {}", error.code, error.message))
                .retriable(error.code >= 500))
        }
        None => Err(AdapterError::new(AdapterErrorKind::Internal).with_hint("empty cdp response")),
    }
}

fn map_cdp_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::NavTimeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::JavascriptException(_) => {
            AdapterError::new(AdapterErrorKind::ScriptException).with_hint(hint)
        }
        CdpError::Serde(_) | CdpError::FrameNotFound(_) => {
            AdapterError::new(AdapterErrorKind::Internal).with_hint(hint)
        }
        _ => AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn recreates_runtime_when_dead() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let flags = Arc::new(Mutex::new(Vec::<Arc<AtomicBool>>::new()));

        let factory: RuntimeFactory = {
            let spawned = spawned.clone();
            let flags = flags.clone();
            Arc::new(move |_cfg: CdpConfig| {
                let spawned = spawned.clone();
                let flags = flags.clone();
                Box::pin(async move {
                    spawned.fetch_add(1, Ordering::SeqCst);
                    let (runtime, alive) = RuntimeState::stub();
                    flags.lock().await.push(alive);
                    Ok(runtime)
                })
            })
        };
        let transport = ChromiumTransport::with_factory(CdpConfig::default(), factory);

        let first = transport.runtime().await.unwrap();
        let again = transport.runtime().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(spawned.load(Ordering::SeqCst), 1);

        flags.lock().await[0].store(false, Ordering::SeqCst);
        let second = transport.runtime().await.unwrap();
        assert_eq!(spawned.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn shutdown_without_runtime_is_a_no_op() {
        let transport = ChromiumTransport::new(CdpConfig::default());
        transport.shutdown().await.unwrap();
    }
}
