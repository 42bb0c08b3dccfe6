//! Session lifecycle: launch with bounded retry, device emulation, the
//! [`PageOps`] page surface, and idempotent teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use network_tap::NetworkEvent;
use pagecarbon_core_types::{RequestId, SessionId};

use crate::profile::{DeviceProfile, Viewport};
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};
use crate::{SessionConfig, SessionError, SessionErrorKind};

const DOM_READY_POLL: Duration = Duration::from_millis(100);
const EVENT_BUS_CAPACITY: usize = 1024;

/// The narrow page surface the analysis layers drive. Object safe so the
/// orchestrator and the behavior crates can run against fakes in tests.
#[async_trait]
pub trait PageOps: Send + Sync {
    /// Navigate and wait for the DOM to become ready, bounded by `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError>;

    /// Evaluate an expression in the page and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<Value, SessionError>;

    /// Synthesize a left-button pointer click at viewport coordinates.
    async fn dispatch_click(&self, x: f64, y: f64) -> Result<(), SessionError>;

    async fn insert_text(&self, text: &str) -> Result<(), SessionError>;

    async fn set_viewport(&self, viewport: Viewport) -> Result<(), SessionError>;

    /// Subscribe to the session's decoded network lifecycle events.
    fn network_events(&self) -> broadcast::Receiver<NetworkEvent>;

    /// Tear the session down: close the target and kill the browser
    /// process. Idempotent; repeated calls are no-ops.
    async fn close(&self) -> Result<(), SessionError>;
}

pub type TransportFactory = Arc<
    dyn Fn(SessionConfig) -> BoxFuture<'static, Result<Arc<dyn CdpTransport>, SessionError>>
        + Send
        + Sync,
>;

/// Launches isolated sessions; one browser process and one page per call.
pub struct SessionManager {
    config: SessionConfig,
    factory: TransportFactory,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let factory: TransportFactory = Arc::new(|cfg: SessionConfig| {
            Box::pin(async move {
                let transport = ChromiumTransport::launch(&cfg).await?;
                Ok(transport as Arc<dyn CdpTransport>)
            })
        });
        Self { config, factory }
    }

    /// Substitute the transport factory; used by tests to script launches.
    pub fn with_factory(config: SessionConfig, factory: TransportFactory) -> Self {
        Self { config, factory }
    }

    /// Launch a session and apply the device profile.
    ///
    /// Transient failures (the browser can lose viewport/touch negotiation
    /// races during startup) are retried up to the configured bound with
    /// linear backoff; transport liveness is re-checked before every
    /// attempt so a dead process is never reused.
    pub async fn launch(&self, profile: &DeviceProfile) -> Result<Session, SessionError> {
        let attempts = self.config.launch_attempts.max(1);
        let mut transport: Option<Arc<dyn CdpTransport>> = None;
        let mut last_error =
            SessionError::new(SessionErrorKind::Launch).with_hint("no launch attempts made");

        for attempt in 1..=attempts {
            if let Some(existing) = &transport {
                if !existing.is_alive() {
                    debug!(target: "cdp-session", attempt, "transport died; relaunching");
                    existing.shutdown().await;
                    transport = None;
                }
            }

            let current = match &transport {
                Some(existing) => existing.clone(),
                None => match (self.factory)(self.config.clone()).await {
                    Ok(fresh) => {
                        transport = Some(fresh.clone());
                        fresh
                    }
                    Err(err) => {
                        warn!(target: "cdp-session", attempt, %err, "browser launch failed");
                        last_error = err;
                        if attempt < attempts {
                            sleep(self.config.launch_backoff_step * attempt).await;
                        }
                        continue;
                    }
                },
            };

            match self.open_page(current.clone(), profile).await {
                Ok(session) => {
                    info!(
                        target: "cdp-session",
                        session = %session.id,
                        device = profile.device.as_str(),
                        attempt,
                        "session ready"
                    );
                    return Ok(session);
                }
                Err(err) => {
                    warn!(target: "cdp-session", attempt, %err, "page setup failed");
                    last_error = err;
                    // No point backing off once the attempt budget is spent.
                    if attempt < attempts {
                        sleep(self.config.launch_backoff_step * attempt).await;
                    }
                }
            }
        }

        if let Some(transport) = transport {
            transport.shutdown().await;
        }
        Err(SessionError::new(SessionErrorKind::Launch)
            .with_hint(format!("gave up after {attempts} attempts: {last_error}")))
    }

    async fn open_page(
        &self,
        transport: Arc<dyn CdpTransport>,
        profile: &DeviceProfile,
    ) -> Result<Session, SessionError> {
        let deadline = self.config.command_deadline;

        let created = transport
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
                deadline,
            )
            .await?;
        let target_id = created
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                SessionError::new(SessionErrorKind::PageCreation)
                    .with_hint("createTarget missing targetId")
            })?
            .to_string();

        let attached = transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                deadline,
            )
            .await?;
        let cdp_session = attached
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                SessionError::new(SessionErrorKind::PageCreation)
                    .with_hint("attachToTarget missing sessionId")
                    .retriable(true)
            })?
            .to_string();

        let target = CommandTarget::Session(cdp_session.clone());
        for domain in ["Page.enable", "Runtime.enable", "Network.enable"] {
            transport
                .send_command(target.clone(), domain, Value::Object(Default::default()), deadline)
                .await?;
        }

        transport
            .send_command(
                target.clone(),
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": profile.viewport.width,
                    "height": profile.viewport.height,
                    "deviceScaleFactor": profile.viewport.device_scale_factor,
                    "mobile": profile.viewport.mobile,
                }),
                deadline,
            )
            .await?;
        transport
            .send_command(
                target,
                "Emulation.setTouchEmulationEnabled",
                json!({ "enabled": profile.touch }),
                deadline,
            )
            .await?;

        Ok(Session::start(
            transport,
            cdp_session,
            target_id,
            profile.clone(),
            deadline,
        ))
    }
}

/// One live browser session. Owned exclusively by the run that launched it.
pub struct Session {
    pub id: SessionId,
    pub profile: DeviceProfile,
    pub created_at: DateTime<Utc>,
    transport: Arc<dyn CdpTransport>,
    cdp_session: String,
    target_id: String,
    command_deadline: Duration,
    events: broadcast::Sender<NetworkEvent>,
    pump: JoinHandle<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("profile", &self.profile)
            .field("created_at", &self.created_at)
            .field("target_id", &self.target_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn start(
        transport: Arc<dyn CdpTransport>,
        cdp_session: String,
        target_id: String,
        profile: DeviceProfile,
        command_deadline: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let pump = spawn_event_pump(transport.clone(), cdp_session.clone(), events.clone());
        Self {
            id: SessionId::new(),
            profile,
            created_at: Utc::now(),
            transport,
            cdp_session,
            target_id,
            command_deadline,
            events,
            pump,
            closed: AtomicBool::new(false),
        }
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        self.transport
            .send_command(
                CommandTarget::Session(self.cdp_session.clone()),
                method,
                params,
                self.command_deadline,
            )
            .await
    }

    async fn wait_dom_ready(&self, deadline: Instant) -> Result<(), SessionError> {
        loop {
            if Instant::now() >= deadline {
                return Err(SessionError::new(SessionErrorKind::NavTimeout)
                    .with_hint("dom did not become ready before the navigation deadline"));
            }

            let response = self
                .send(
                    "Runtime.evaluate",
                    json!({ "expression": "document.readyState", "returnByValue": true }),
                )
                .await?;

            let ready = response
                .get("result")
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str())
                .map(|state| matches!(state, "interactive" | "complete"))
                .unwrap_or(false);
            if ready {
                return Ok(());
            }

            sleep(DOM_READY_POLL).await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The pump task holds a transport clone; a session dropped without
        // `close()` (a cancelled run) must not keep it alive, or the
        // transport's child-kill backstop never fires.
        self.pump.abort();
    }
}

#[async_trait]
impl PageOps for Session {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        self.send("Page.navigate", json!({ "url": url })).await?;
        self.wait_dom_ready(deadline).await
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, SessionError> {
        let response = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            return Err(SessionError::new(SessionErrorKind::Internal)
                .with_hint(format!("page script raised: {details}")));
        }

        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn dispatch_click(&self, x: f64, y: f64) -> Result<(), SessionError> {
        for phase in ["mousePressed", "mouseReleased"] {
            self.send(
                "Input.dispatchMouseEvent",
                json!({
                    "type": phase,
                    "x": x,
                    "y": y,
                    "button": "left",
                    "buttons": 1,
                    "clickCount": 1,
                    "pointerType": "mouse",
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<(), SessionError> {
        self.send("Input.insertText", json!({ "text": text })).await?;
        Ok(())
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<(), SessionError> {
        self.send(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": viewport.width,
                "height": viewport.height,
                "deviceScaleFactor": viewport.device_scale_factor,
                "mobile": viewport.mobile,
            }),
        )
        .await?;
        Ok(())
    }

    fn network_events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pump.abort();

        if let Err(err) = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.closeTarget",
                json!({ "targetId": self.target_id }),
                self.command_deadline,
            )
            .await
        {
            // Teardown never masks the run outcome; log and move on.
            warn!(target: "cdp-session", session = %self.id, %err, "closeTarget failed");
        }

        self.transport.shutdown().await;
        info!(target: "cdp-session", session = %self.id, "session closed");
        Ok(())
    }
}

fn spawn_event_pump(
    transport: Arc<dyn CdpTransport>,
    cdp_session: String,
    events: broadcast::Sender<NetworkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = transport.next_event().await {
            if event.session_id.as_deref() != Some(cdp_session.as_str()) {
                continue;
            }
            if let Some(decoded) = decode_network_event(&event) {
                // No receivers is fine; the monitor may not be attached yet.
                let _ = events.send(decoded);
            }
        }
        debug!(target: "cdp-session", "event pump finished");
    })
}

/// Decode a raw instrumentation event into the monitor's vocabulary.
/// Non-network events and malformed payloads yield `None`.
pub fn decode_network_event(event: &TransportEvent) -> Option<NetworkEvent> {
    let request_id = event
        .params
        .get("requestId")
        .and_then(|v| v.as_str())
        .map(|s| RequestId(s.to_string()));

    match event.method.as_str() {
        "Network.requestWillBeSent" => {
            let url = event
                .params
                .get("request")
                .and_then(|r| r.get("url"))
                .and_then(|v| v.as_str())?
                .to_string();
            Some(NetworkEvent::RequestWillBeSent {
                request_id: request_id?,
                url,
            })
        }
        "Network.responseReceived" => {
            let response = event.params.get("response")?;
            let status = response.get("status").and_then(|v| v.as_u64())? as u16;
            let mime_type = response
                .get("mimeType")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let headers = response
                .get("headers")
                .and_then(|v| v.as_object())
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            Some(NetworkEvent::ResponseReceived {
                request_id: request_id?,
                status,
                mime_type,
                headers,
            })
        }
        "Network.loadingFinished" => {
            let encoded_byte_len = event
                .params
                .get("encodedDataLength")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0)
                .max(0.0) as u64;
            Some(NetworkEvent::LoadingFinished {
                request_id: request_id?,
                encoded_byte_len,
            })
        }
        "Network.loadingFailed" => {
            let reason = event
                .params
                .get("errorText")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            Some(NetworkEvent::LoadingFailed {
                request_id: request_id?,
                reason,
            })
        }
        _ => None,
    }
}
