//! # tether-channel
//!
//! Reliable, at-least-once event delivery between a server and a client
//! identified by an API key.
//!
//! - **Endpoint**: [`Channel`] forwards to a connected peer or queues to disk,
//!   and replays the queue when the peer reconnects. [`ServerApi`] and
//!   [`ClientApi`] are the two roles.
//! - **Transport**: [`transport`] traits the host's connection layer implements
//! - **Roles**: [`role`] adapters from a transport to the endpoint's [`Link`]
//! - **Mock**: [`mock`] in-memory transports for tests
//!
//! ## Crate Position
//!
//! Depends on tether-core and tether-queue. Top of the library stack.

#![deny(unsafe_code)]

pub mod endpoint;
pub mod mock;
pub mod role;
pub mod transport;

pub use endpoint::{Channel, ClientApi, Delivery, ServerApi};
pub use role::{ClientLink, ServerLink};
pub use transport::{
    CONNECT_EVENT, ClientTransport, ConnectionState, EventHandler, Link, Role, ServerTransport,
};
