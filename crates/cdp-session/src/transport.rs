//! Low-level DevTools protocol transport.
//!
//! Owns the Chromium child process and its websocket connection. A single
//! run loop multiplexes outbound commands (mpsc + oneshot responders keyed
//! by call id) against the inbound event stream; everything above this layer
//! talks JSON methods and params, never the wire.

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::io::{AsyncBufReadExt, BufReader};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{SessionConfig, SessionError, SessionErrorKind};

/// One decoded event from the instrumentation channel.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Where a command is addressed: the browser endpoint or an attached target
/// session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// The seam the session layer drives. Tests substitute a scripted fake;
/// production uses [`ChromiumTransport`].
#[async_trait]
pub trait CdpTransport: Send + Sync {
    fn is_alive(&self) -> bool;

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, SessionError>;

    async fn next_event(&self) -> Option<TransportEvent>;

    /// Stop the run loop and kill the child process. Idempotent.
    async fn shutdown(&self);
}

struct PendingCommand {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, SessionError>>,
}

/// Transport backed by a launched Chromium child process.
pub struct ChromiumTransport {
    command_tx: mpsc::Sender<PendingCommand>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl ChromiumTransport {
    /// Launch Chromium, connect to its devtools endpoint and start the run
    /// loop.
    pub async fn launch(cfg: &SessionConfig) -> Result<Arc<Self>, SessionError> {
        let browser_cfg = build_browser_config(cfg)?;
        let mut child = browser_cfg.launch().map_err(|err| {
            SessionError::new(SessionErrorKind::Launch)
                .with_hint(format!("failed to launch chromium: {err}"))
                .retriable(true)
        })?;

        let ws_url = extract_ws_url(&mut child).await?;
        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| {
                SessionError::new(SessionErrorKind::CdpIo)
                    .with_hint(err.to_string())
                    .retriable(true)
            })?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);
        let alive = Arc::new(AtomicBool::new(true));

        let loop_alive = alive.clone();
        let loop_task = tokio::spawn(async move {
            if let Err(err) = run_loop(conn, command_rx, events_tx).await {
                error!(target: "cdp-session", ?err, "transport loop terminated with error");
            }
            loop_alive.store(false, Ordering::Relaxed);
        });

        info!(target: "cdp-session", url = %ws_url, "chromium connection established");

        Ok(Arc::new(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task: Mutex::new(Some(loop_task)),
            child: Mutex::new(Some(child)),
            alive,
        }))
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, SessionError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let pending = PendingCommand {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx.send(pending).await.map_err(|err| {
            SessionError::new(SessionErrorKind::CdpIo).with_hint(err.to_string())
        })?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::new(SessionErrorKind::CdpIo)
                .with_hint("command response channel closed")),
            Err(_) => Err(SessionError::new(SessionErrorKind::NavTimeout)
                .with_hint(format!("command {method} timed out"))),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::Relaxed);
        if let Some(task) = self.loop_task.lock().await.take() {
            task.abort();
        }
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.kill().await {
                warn!(target: "cdp-session", ?err, "failed to kill chromium child");
            }
        }
    }
}

impl Drop for ChromiumTransport {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        if let Ok(mut guard) = self.loop_task.try_lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
        // Backstop only; close() is the supported teardown path.
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-session", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-session", "no runtime available to kill chromium child");
                }
            }
        }
    }
}

fn build_browser_config(cfg: &SessionConfig) -> Result<BrowserConfig, SessionError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(SessionError::new(SessionErrorKind::Launch).with_hint(format!(
            "chrome executable not found at {}; set PAGECARBON_CHROME",
            cfg.executable.display()
        )));
    }

    let profile_dir = if cfg.user_data_dir.is_absolute() {
        cfg.user_data_dir.clone()
    } else {
        std::env::current_dir()
            .map_err(|err| {
                SessionError::new(SessionErrorKind::Internal)
                    .with_hint(format!("failed to resolve cwd: {err}"))
            })?
            .join(&cfg.user_data_dir)
    };
    fs::create_dir_all(&profile_dir).map_err(|err| {
        SessionError::new(SessionErrorKind::Internal)
            .with_hint(format!("failed to ensure user-data-dir: {err}"))
    })?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(cfg.command_deadline)
        .launch_timeout(Duration::from_secs(20));

    if !cfg.headless {
        builder = builder.with_head();
    }

    if std::env::var("PAGECARBON_DISABLE_SANDBOX")
        .map(|v| v != "0" && v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        builder = builder.no_sandbox();
    }

    let mut args = vec![
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-breakpad",
        "--disable-component-update",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-hang-monitor",
        "--disable-popup-blocking",
        "--disable-sync",
        "--metrics-recording-only",
        "--no-first-run",
        "--no-default-browser-check",
        "--remote-allow-origins=*",
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
    builder = builder.user_data_dir(profile_dir);

    builder.build().map_err(|err| {
        SessionError::new(SessionErrorKind::Internal)
            .with_hint(format!("browser config error: {err}"))
    })
}

/// Pull the devtools websocket URL out of Chromium's stderr banner.
async fn extract_ws_url(child: &mut Child) -> Result<String, SessionError> {
    let stderr = child.stderr.take().ok_or_else(|| {
        SessionError::new(SessionErrorKind::Launch)
            .with_hint("chromium process missing stderr handle")
    })?;
    let mut lines = BufReader::new(stderr).lines();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| {
                SessionError::new(SessionErrorKind::Launch).with_hint(err.to_string())
            })?;
            if let Some((_, ws)) = line.rsplit_once("listening on ") {
                let ws = ws.trim();
                if ws.starts_with("ws") && ws.contains("devtools/browser") {
                    return Ok(ws.to_string());
                }
            }
        }
        Err(SessionError::new(SessionErrorKind::Launch)
            .with_hint("chromium exited before exposing devtools websocket url")
            .retriable(true))
    };

    tokio::time::timeout(Duration::from_secs(20), reader)
        .await
        .map_err(|_| {
            SessionError::new(SessionErrorKind::Launch)
                .with_hint("timed out waiting for chromium devtools websocket url")
                .retriable(true)
        })?
}

async fn run_loop(
    mut conn: Connection<CdpEventMessage>,
    mut command_rx: mpsc::Receiver<PendingCommand>,
    events_tx: mpsc::Sender<TransportEvent>,
) -> Result<(), SessionError> {
    let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, SessionError>>> =
        HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = command_rx.recv() => {
                submit(&mut conn, cmd, &mut inflight)?;
            }
            message = conn.next() => {
                match message {
                    Some(Ok(Message::Response(resp))) => {
                        if let Some(responder) = inflight.remove(&resp.id) {
                            let _ = responder.send(extract_payload(resp));
                        }
                    }
                    Some(Ok(Message::Event(event))) => {
                        forward_event(event, &events_tx).await;
                    }
                    Some(Err(err)) => {
                        let mapped = SessionError::new(SessionErrorKind::CdpIo)
                            .with_hint(err.to_string())
                            .retriable(true);
                        for (_, responder) in inflight.drain() {
                            let _ = responder.send(Err(mapped.clone()));
                        }
                        return Err(mapped);
                    }
                    None => {
                        let err = SessionError::new(SessionErrorKind::CdpIo)
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

fn submit(
    conn: &mut Connection<CdpEventMessage>,
    cmd: PendingCommand,
    inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, SessionError>>>,
) -> Result<(), SessionError> {
    let session = match cmd.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
    };

    let method_id: MethodId = cmd.method.clone().into();
    match conn.submit_command(method_id, session, cmd.params) {
        Ok(call_id) => {
            inflight.insert(call_id, cmd.responder);
            Ok(())
        }
        Err(err) => {
            let mapped = SessionError::new(SessionErrorKind::CdpIo).with_hint(err.to_string());
            let _ = cmd.responder.send(Err(mapped.clone()));
            Err(mapped)
        }
    }
}

async fn forward_event(event: CdpEventMessage, events_tx: &mpsc::Sender<TransportEvent>) {
    let raw: CdpJsonEventMessage = match event.try_into() {
        Ok(raw) => raw,
        Err(err) => {
            warn!(target: "cdp-session", %err, "failed to decode cdp event");
            return;
        }
    };

    let payload = TransportEvent {
        method: raw.method.into_owned(),
        params: raw.params,
        session_id: raw.session_id,
    };

    if events_tx.send(payload).await.is_err() {
        debug!(target: "cdp-session", "event receiver dropped");
    }
}

fn extract_payload(resp: Response) -> Result<Value, SessionError> {
    if let Some(result) = resp.result {
        Ok(result)
    } else if let Some(error) = resp.error {
        Err(SessionError::new(SessionErrorKind::CdpIo)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(error.code >= 500))
    } else {
        Err(SessionError::new(SessionErrorKind::Internal).with_hint("empty cdp response"))
    }
}
