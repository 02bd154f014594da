//! The channel endpoint: send-now-or-queue, and replay on reconnect.
//!
//! A [`Channel`] owns one API key's queue file and one [`Link`] to the peer.
//! Connection state is always read from the link at the moment of the
//! decision; the channel keeps no state of its own beyond "initialized".
//!
//! ```text
//! send ──► link connected? ──yes──► forward ──► Forwarded
//!                  │                   │ NotConnected
//!                  no ◄────────────────┘
//!                  ▼
//!           append under lock ──► Queued
//!
//! "connect" ──► replay_events ──► drain queue file through forward
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use metrics::counter;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_core::metrics::{
    EVENTS_FORWARDED_TOTAL, EVENTS_QUEUED_TOTAL, EVENTS_REPLAYED_TOTAL, FORWARD_ERRORS_TOTAL,
};
use tether_core::{EventRecord, Result, TetherError, TransportError};
use tether_queue::{QueueContext, QueueFile, ReplayOutcome, ReplayReport};
use tracing::{debug, info, warn};

use crate::role::{ClientLink, ServerLink};
use crate::transport::{
    CONNECT_EVENT, ClientTransport, EventHandler, Link, Role, ServerTransport,
};

/// How [`Channel::send`] disposed of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the live peer.
    Forwarded,
    /// Appended to the queue file for replay.
    Queued,
}

/// Server-side endpoint for one API key.
pub type ServerApi<S> = Channel<ServerLink<S>>;

/// Client-side endpoint.
pub type ClientApi<C> = Channel<ClientLink<C>>;

/// Buffered event channel for one API key.
pub struct Channel<L> {
    api_key: String,
    queue: QueueFile,
    link: L,
    initialized: AtomicBool,
    hooked: AtomicBool,
}

impl<S: ServerTransport + 'static> Channel<ServerLink<S>> {
    /// Server endpoint for the peer identified by `api_key`.
    pub fn server(ctx: &QueueContext, api_key: &str, transport: Arc<S>) -> Result<Arc<Self>> {
        Self::new(ctx, api_key, ServerLink::new(transport, api_key))
    }
}

impl<C: ClientTransport + 'static> Channel<ClientLink<C>> {
    /// Client endpoint authenticating as `api_key`.
    pub fn client(ctx: &QueueContext, api_key: &str, transport: Arc<C>) -> Result<Arc<Self>> {
        Self::new(ctx, api_key, ClientLink::new(transport))
    }
}

impl<L: Link + 'static> Channel<L> {
    /// Endpoint over an arbitrary link. Nothing touches disk until [`Channel::init`].
    pub fn new(ctx: &QueueContext, api_key: &str, link: L) -> Result<Arc<Self>> {
        let queue = QueueFile::open(ctx, api_key)?;
        Ok(Arc::new(Self {
            api_key: api_key.to_string(),
            queue,
            link,
            initialized: AtomicBool::new(false),
            hooked: AtomicBool::new(false),
        }))
    }

    /// Create the queue file and hook replay to the `connect` notification.
    ///
    /// Safe to call more than once; the hook is registered only the first time.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        self.queue.ensure().await?;

        if !self.hooked.swap(true, Ordering::SeqCst) {
            let weak = Arc::downgrade(self);
            self.link
                .listen(CONNECT_EVENT, Arc::new(move |_: Value| Self::on_connect(&weak)));
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            api_key = %self.api_key,
            role = %self.role(),
            path = %self.queue.path().display(),
            "event channel initialized"
        );
        Ok(())
    }

    fn on_connect(weak: &Weak<Self>) {
        let Some(channel) = weak.upgrade() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(api_key = %channel.api_key, "connect notification outside a tokio runtime, replay skipped");
            return;
        };
        debug!(api_key = %channel.api_key, role = %channel.role(), "peer connected, replaying queue");
        let _ = runtime.spawn(async move {
            if let Err(e) = channel.replay_events().await {
                warn!(
                    api_key = %channel.api_key,
                    error = %e,
                    kind = e.error_kind(),
                    retry_on_reconnect = e.is_transient(),
                    "queue replay failed"
                );
            }
        });
    }

    /// Subscribe to inbound `event`, decoding its payload as `T`.
    ///
    /// Payloads that do not deserialize into `T` are logged and dropped.
    /// Use [`serde_json::Value`] for `T` to accept anything.
    pub fn listen<T, F>(&self, event: &str, callback: F)
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let api_key = self.api_key.clone();
        let name = event.to_string();
        let handler: EventHandler = Arc::new(move |payload: Value| {
            match serde_json::from_value::<T>(payload) {
                Ok(value) => callback(value),
                Err(e) => {
                    warn!(api_key = %api_key, event = %name, error = %e, "dropping inbound event with unexpected payload");
                }
            }
        });
        self.link.listen(event, handler);
    }

    /// Deliver an event now if the peer is connected, otherwise queue it.
    ///
    /// `timestamp` defaults to the current time in epoch milliseconds. A
    /// queued event is never dropped; a forward refused with anything but
    /// [`TransportError::NotConnected`] is returned to the caller.
    pub async fn send(&self, event: &str, data: Value, timestamp: Option<i64>) -> Result<Delivery> {
        self.ensure_initialized()?;
        if event.is_empty() {
            return Err(TetherError::InvalidEvent("event name must not be empty".into()));
        }
        let record = EventRecord::new(event, data, timestamp);
        let role = self.role().as_str();

        if self.link.state().is_connected() {
            match self.link.forward(&record).await {
                Ok(()) => {
                    counter!(EVENTS_FORWARDED_TOTAL, "role" => role).increment(1);
                    debug!(api_key = %self.api_key, role, event, "forwarded event");
                    return Ok(Delivery::Forwarded);
                }
                Err(TransportError::NotConnected(_)) => {
                    debug!(api_key = %self.api_key, role, event, "peer dropped before forward, queueing");
                }
                Err(e) => {
                    counter!(FORWARD_ERRORS_TOTAL, "role" => role).increment(1);
                    return Err(e.into());
                }
            }
        }

        self.queue.append(&record).await?;
        counter!(EVENTS_QUEUED_TOTAL, "role" => role).increment(1);
        debug!(api_key = %self.api_key, role, event, "queued event");
        Ok(Delivery::Queued)
    }

    /// Forward the queued backlog to the peer, in order.
    ///
    /// Stops forwarding as soon as the peer is gone and keeps the rest of the
    /// file for the next reconnect. Malformed lines are always kept.
    pub async fn replay_events(&self) -> Result<ReplayReport> {
        self.ensure_initialized()?;
        let link = &self.link;
        let api_key = self.api_key.as_str();
        let role = self.role().as_str();

        let report = self
            .queue
            .drain(|record| async move {
                if !link.state().is_connected() {
                    return ReplayOutcome::Halt;
                }
                match link.forward(&record).await {
                    Ok(()) => ReplayOutcome::Delivered,
                    Err(TransportError::NotConnected(_)) => ReplayOutcome::Halt,
                    Err(e) => {
                        counter!(FORWARD_ERRORS_TOTAL, "role" => role).increment(1);
                        warn!(api_key, role, event = %record.event, error = %e, "forward failed during replay, dropping record");
                        ReplayOutcome::Dropped
                    }
                }
            })
            .await?;

        counter!(EVENTS_REPLAYED_TOTAL, "role" => role).increment(report.delivered as u64);
        Ok(report)
    }

    /// Path of this endpoint's queue file.
    pub fn queue_path(&self) -> &Path {
        self.queue.path()
    }

    /// API key this endpoint serves.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Side of the connection.
    pub fn role(&self) -> Role {
        self.link.role()
    }

    /// Whether [`Channel::init`] has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(TetherError::NotInitialized(self.api_key.clone()))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
