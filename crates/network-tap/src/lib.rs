//! Network activity monitor for pagecarbon sessions.
//!
//! Subscribes to the instrumentation channel's network events and runs a
//! small per-resource state machine (`Requested -> Responded -> {Finished |
//! Failed}`). The in-flight set and the last-activity timestamp are the only
//! mutable shared state; everything the rest of the system needs — the final
//! resource list, byte totals and the blocking `wait_idle` — is derived from
//! them.

pub mod config;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pagecarbon_core_types::RequestId;

pub use crate::config::TapConfig;

/// Errors emitted by the monitor surface.
#[derive(Clone, Debug, Error)]
pub enum TapError {
    #[error("listener not found")]
    ListenerNotFound,
    #[error("channel closed")]
    ChannelClosed,
}

/// Network lifecycle events understood by the monitor. Mirrors the shape of
/// the underlying CDP `Network.*` notifications.
#[derive(Clone, Debug)]
pub enum NetworkEvent {
    RequestWillBeSent {
        request_id: RequestId,
        url: String,
    },
    ResponseReceived {
        request_id: RequestId,
        status: u16,
        mime_type: String,
        headers: HashMap<String, String>,
    },
    LoadingFinished {
        request_id: RequestId,
        encoded_byte_len: u64,
    },
    LoadingFailed {
        request_id: RequestId,
        reason: String,
    },
}

impl NetworkEvent {
    pub fn request_id(&self) -> &RequestId {
        match self {
            NetworkEvent::RequestWillBeSent { request_id, .. }
            | NetworkEvent::ResponseReceived { request_id, .. }
            | NetworkEvent::LoadingFinished { request_id, .. }
            | NetworkEvent::LoadingFailed { request_id, .. } => request_id,
        }
    }
}

/// Lifecycle phase of one observed transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourcePhase {
    Requested,
    Responded,
    Finished,
    Failed,
}

impl ResourcePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResourcePhase::Finished | ResourcePhase::Failed)
    }
}

/// One observed network transfer. `transferred_bytes` is authoritative only
/// once the phase is terminal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub request_id: RequestId,
    pub url: String,
    pub mime_type: Option<String>,
    pub status: Option<u16>,
    pub transferred_bytes: u64,
    pub headers: HashMap<String, String>,
    pub phase: ResourcePhase,
}

impl ResourceRecord {
    fn new(request_id: RequestId, url: String) -> Self {
        Self {
            request_id,
            url,
            mime_type: None,
            status: None,
            transferred_bytes: 0,
            headers: HashMap::new(),
            phase: ResourcePhase::Requested,
        }
    }

    /// Whether this record contributes to byte totals: finished transfer
    /// with a non-error status.
    pub fn billable(&self) -> bool {
        self.phase == ResourcePhase::Finished && self.status.map_or(true, |s| s < 400)
    }
}

/// Outcome of one `wait_idle` call. Hitting `max_wait` without the page
/// going quiet is an expected result, not an error.
#[derive(Clone, Copy, Debug)]
pub struct IdleWait {
    pub reached_idle: bool,
    pub elapsed: Duration,
}

type ActivityListener = Box<dyn Fn(&NetworkEvent) -> Result<(), String> + Send + Sync>;

/// Identifier handed out by [`NetworkMonitor::on_activity`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

struct TapState {
    records: HashMap<RequestId, ResourceRecord>,
    inflight: HashSet<RequestId>,
    last_activity: Instant,
    // Insertion order, so `resources()` is stable across calls.
    order: Vec<RequestId>,
}

impl TapState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            inflight: HashSet::new(),
            last_activity: Instant::now(),
            order: Vec::new(),
        }
    }
}

/// Per-session network monitor. Create with [`NetworkMonitor::new`] and wire
/// it to a session with [`NetworkMonitor::attach`]; tests can feed events
/// directly through [`NetworkMonitor::ingest`].
pub struct NetworkMonitor {
    config: TapConfig,
    state: Mutex<TapState>,
    listeners: Mutex<Vec<(ListenerId, ActivityListener)>>,
    next_listener: Mutex<u64>,
}

impl NetworkMonitor {
    pub fn new(config: TapConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(TapState::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: Mutex::new(0),
        })
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// Consume events from an instrumentation channel subscription until it
    /// closes. Lagged receivers skip ahead rather than aborting.
    pub fn attach(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<NetworkEvent>,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => monitor.ingest(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: "network-tap", skipped, "event subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Apply one event to the per-resource state machine.
    pub fn ingest(&self, event: NetworkEvent) {
        // Data URLs never hit the network; ignore them entirely, listeners
        // included.
        if let NetworkEvent::RequestWillBeSent { url, .. } = &event {
            if url.starts_with("data:") {
                return;
            }
        }

        self.notify_listeners(&event);

        let mut state = self.state.lock();
        let now = Instant::now();

        match event {
            NetworkEvent::RequestWillBeSent { request_id, url } => {
                state.last_activity = now;
                if state.records.contains_key(&request_id) {
                    // Redirect chains re-announce the same id; keep the
                    // original record but refresh the URL.
                    if let Some(record) = state.records.get_mut(&request_id) {
                        record.url = url;
                    }
                    return;
                }
                state.inflight.insert(request_id.clone());
                state.order.push(request_id.clone());
                state
                    .records
                    .insert(request_id.clone(), ResourceRecord::new(request_id, url));
            }
            NetworkEvent::ResponseReceived {
                request_id,
                status,
                mime_type,
                headers,
            } => {
                state.last_activity = now;
                match state.records.get_mut(&request_id) {
                    Some(record) if !record.phase.is_terminal() => {
                        record.status = Some(status);
                        record.mime_type = Some(mime_type);
                        record.headers = headers;
                        record.phase = ResourcePhase::Responded;
                    }
                    Some(_) => {}
                    None => {
                        debug!(target: "network-tap", %request_id, "response for untracked request");
                    }
                }
            }
            NetworkEvent::LoadingFinished {
                request_id,
                encoded_byte_len,
            } => {
                state.last_activity = now;
                let removed = state.inflight.remove(&request_id);
                match state.records.get_mut(&request_id) {
                    Some(record) if !record.phase.is_terminal() => {
                        record.transferred_bytes = encoded_byte_len;
                        record.phase = ResourcePhase::Finished;
                    }
                    Some(_) if removed => {
                        warn!(target: "network-tap", %request_id, "terminal event for finished record");
                    }
                    _ => {}
                }
            }
            NetworkEvent::LoadingFailed { request_id, reason } => {
                state.last_activity = now;
                state.inflight.remove(&request_id);
                match state.records.get_mut(&request_id) {
                    Some(record) if !record.phase.is_terminal() => {
                        record.phase = ResourcePhase::Failed;
                        debug!(target: "network-tap", %request_id, %reason, "transfer failed");
                    }
                    _ => {}
                }
            }
        }
    }

    /// Snapshot of every record observed so far, in arrival order.
    pub fn resources(&self) -> Vec<ResourceRecord> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect()
    }

    /// Bytes across all billable records (finished, status below 400).
    pub fn total_bytes(&self) -> u64 {
        let state = self.state.lock();
        state
            .records
            .values()
            .filter(|r| r.billable())
            .map(|r| r.transferred_bytes)
            .sum()
    }

    pub fn inflight_count(&self) -> usize {
        self.state.lock().inflight.len()
    }

    pub fn since_last_activity(&self) -> Duration {
        self.state.lock().last_activity.elapsed()
    }

    /// Block until the page is idle (no transfers in flight and no activity
    /// for at least `quiet_window`), or until `max_wait` elapses.
    ///
    /// Always returns within `max_wait` plus one poll tick, whatever the
    /// traffic pattern. New requests arriving during the quiet window reset
    /// the clock.
    pub async fn wait_idle(&self, quiet_window: Duration, max_wait: Duration) -> IdleWait {
        let started = Instant::now();
        loop {
            let (inflight, since_activity) = {
                let state = self.state.lock();
                (state.inflight.len(), state.last_activity.elapsed())
            };

            if inflight == 0 && since_activity >= quiet_window {
                return IdleWait {
                    reached_idle: true,
                    elapsed: started.elapsed(),
                };
            }

            if started.elapsed() >= max_wait {
                debug!(
                    target: "network-tap",
                    inflight,
                    since_activity_ms = since_activity.as_millis() as u64,
                    "idle wait hit its ceiling"
                );
                return IdleWait {
                    reached_idle: false,
                    elapsed: started.elapsed(),
                };
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Convenience form using the configured windows.
    pub async fn wait_idle_default(&self) -> IdleWait {
        self.wait_idle(self.config.quiet_window, self.config.max_wait)
            .await
    }

    /// Register an activity listener. A failing listener is logged and
    /// skipped; it never disturbs event processing or other listeners.
    pub fn on_activity<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&NetworkEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        let mut next = self.next_listener.lock();
        let id = ListenerId(*next);
        *next += 1;
        self.listeners.lock().push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<(), TapError> {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        if listeners.len() == before {
            return Err(TapError::ListenerNotFound);
        }
        Ok(())
    }

    fn notify_listeners(&self, event: &NetworkEvent) {
        let listeners = self.listeners.lock();
        for (id, listener) in listeners.iter() {
            if let Err(reason) = listener(event) {
                warn!(target: "network-tap", listener = id.0, %reason, "activity listener failed");
            }
        }
    }
}
