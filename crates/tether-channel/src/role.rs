//! [`Link`] adapters for each side of the connection.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::{EventRecord, TransportError};

use crate::transport::{
    ClientTransport, ConnectionState, EventHandler, Link, Role, ServerTransport,
};

/// Server-side link: one API key's view of a shared [`ServerTransport`].
pub struct ServerLink<S> {
    transport: Arc<S>,
    api_key: String,
}

impl<S: ServerTransport> ServerLink<S> {
    /// Bind `transport` to the peer identified by `api_key`.
    pub fn new(transport: Arc<S>, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl<S: ServerTransport> Link for ServerLink<S> {
    fn role(&self) -> Role {
        Role::Server
    }

    fn state(&self) -> ConnectionState {
        self.transport.state(&self.api_key)
    }

    async fn forward(&self, record: &EventRecord) -> Result<(), TransportError> {
        self.transport.send_to(&self.api_key, record).await
    }

    fn listen(&self, event: &str, handler: EventHandler) {
        self.transport.listen_to(&self.api_key, event, handler);
    }
}

/// Client-side link over a [`ClientTransport`].
pub struct ClientLink<C> {
    transport: Arc<C>,
}

impl<C: ClientTransport> ClientLink<C> {
    /// Wrap `transport`.
    pub fn new(transport: Arc<C>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl<C: ClientTransport> Link for ClientLink<C> {
    fn role(&self) -> Role {
        Role::Client
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_connected(self.transport.is_connected())
    }

    async fn forward(&self, record: &EventRecord) -> Result<(), TransportError> {
        self.transport.send(record).await
    }

    fn listen(&self, event: &str, handler: EventHandler) {
        self.transport.listen(event, handler);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
