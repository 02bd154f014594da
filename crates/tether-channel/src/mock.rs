//! In-memory transports for tests.
//!
//! Both fakes record every forwarded record, let tests flip the connection
//! state, inject forward failures and fire inbound events at registered
//! handlers. Handlers run synchronously on the caller's thread.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tether_core::{EventRecord, TransportError};

use crate::transport::{
    CONNECT_EVENT, ClientTransport, ConnectionState, EventHandler, ServerTransport,
};

/// Key the client fake files everything under.
const CLIENT_PEER: &str = "";

#[derive(Default)]
struct Peers {
    connected: HashSet<String>,
    sent: Vec<(String, EventRecord)>,
    handlers: Vec<(String, String, EventHandler)>,
    failures: VecDeque<TransportError>,
    disconnect_after: Option<usize>,
}

#[derive(Default)]
struct MockPeers {
    inner: Mutex<Peers>,
}

impl MockPeers {
    fn set_connected(&self, key: &str, connected: bool) {
        let mut peers = self.inner.lock();
        if connected {
            let _ = peers.connected.insert(key.to_string());
        } else {
            let _ = peers.connected.remove(key);
        }
    }

    fn is_connected(&self, key: &str) -> bool {
        self.inner.lock().connected.contains(key)
    }

    fn deliver(&self, key: &str, record: &EventRecord) -> Result<(), TransportError> {
        let mut peers = self.inner.lock();
        if !peers.connected.contains(key) {
            return Err(TransportError::NotConnected(key.to_string()));
        }
        if let Some(err) = peers.failures.pop_front() {
            return Err(err);
        }
        peers.sent.push((key.to_string(), record.clone()));
        if let Some(remaining) = peers.disconnect_after.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                peers.disconnect_after = None;
                let _ = peers.connected.remove(key);
            }
        }
        Ok(())
    }

    fn subscribe(&self, key: &str, event: &str, handler: EventHandler) {
        self.inner
            .lock()
            .handlers
            .push((key.to_string(), event.to_string(), handler));
    }

    fn emit(&self, key: &str, event: &str, payload: &Value) -> usize {
        let matching: Vec<EventHandler> = self
            .inner
            .lock()
            .handlers
            .iter()
            .filter(|(k, e, _)| k == key && e == event)
            .map(|(_, _, h)| EventHandler::clone(h))
            .collect();
        for handler in &matching {
            handler(payload.clone());
        }
        matching.len()
    }
}

/// Fake [`ServerTransport`] holding any number of peers by API key.
#[derive(Default)]
pub struct MockServerTransport {
    peers: MockPeers,
}

impl MockServerTransport {
    /// No peers connected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `api_key` connected without notifying listeners.
    pub fn connect(&self, api_key: &str) {
        self.peers.set_connected(api_key, true);
    }

    /// Mark `api_key` connected and fire the `connect` notification.
    pub fn reconnect(&self, api_key: &str) {
        self.connect(api_key);
        let _ = self.peers.emit(api_key, CONNECT_EVENT, &Value::Null);
    }

    /// Mark `api_key` disconnected.
    pub fn disconnect(&self, api_key: &str) {
        self.peers.set_connected(api_key, false);
    }

    /// Records forwarded so far, with the key they were sent to.
    pub fn sent(&self) -> Vec<(String, EventRecord)> {
        self.peers.inner.lock().sent.clone()
    }

    /// Records forwarded to `api_key`.
    pub fn sent_to(&self, api_key: &str) -> Vec<EventRecord> {
        self.peers
            .inner
            .lock()
            .sent
            .iter()
            .filter(|(k, _)| k == api_key)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Fail the next forward with `err`.
    pub fn fail_next(&self, err: TransportError) {
        self.peers.inner.lock().failures.push_back(err);
    }

    /// Drop the receiving peer's connection after `n` more successful forwards.
    pub fn disconnect_after(&self, n: usize) {
        self.peers.inner.lock().disconnect_after = Some(n);
    }

    /// Deliver an inbound event from `api_key`. Returns how many handlers ran.
    pub fn emit(&self, api_key: &str, event: &str, payload: Value) -> usize {
        self.peers.emit(api_key, event, &payload)
    }
}

#[async_trait]
impl ServerTransport for MockServerTransport {
    fn state(&self, api_key: &str) -> ConnectionState {
        ConnectionState::from_connected(self.peers.is_connected(api_key))
    }

    async fn send_to(&self, api_key: &str, record: &EventRecord) -> Result<(), TransportError> {
        self.peers.deliver(api_key, record)
    }

    fn listen_to(&self, api_key: &str, event: &str, handler: EventHandler) {
        self.peers.subscribe(api_key, event, handler);
    }
}

/// Fake [`ClientTransport`] with a single server peer.
#[derive(Default)]
pub struct MockClientTransport {
    peers: MockPeers,
}

impl MockClientTransport {
    /// Starts disconnected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state without notifying listeners.
    pub fn set_connected(&self, connected: bool) {
        self.peers.set_connected(CLIENT_PEER, connected);
    }

    /// Connect and fire the `connect` notification.
    pub fn reconnect(&self) {
        self.set_connected(true);
        let _ = self.peers.emit(CLIENT_PEER, CONNECT_EVENT, &Value::Null);
    }

    /// Records forwarded so far.
    pub fn sent(&self) -> Vec<EventRecord> {
        self.peers
            .inner
            .lock()
            .sent
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Fail the next forward with `err`.
    pub fn fail_next(&self, err: TransportError) {
        self.peers.inner.lock().failures.push_back(err);
    }

    /// Drop the connection after `n` more successful forwards.
    pub fn disconnect_after(&self, n: usize) {
        self.peers.inner.lock().disconnect_after = Some(n);
    }

    /// Deliver an inbound event from the server. Returns how many handlers ran.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        self.peers.emit(CLIENT_PEER, event, &payload)
    }
}

#[async_trait]
impl ClientTransport for MockClientTransport {
    fn is_connected(&self) -> bool {
        self.peers.is_connected(CLIENT_PEER)
    }

    async fn send(&self, record: &EventRecord) -> Result<(), TransportError> {
        self.peers.deliver(CLIENT_PEER, record)
    }

    fn listen(&self, event: &str, handler: EventHandler) {
        self.peers.subscribe(CLIENT_PEER, event, handler);
    }
}
