//! # tether-core
//!
//! Shared vocabulary for the tether event channel.
//!
//! - **Records**: [`record::EventRecord`], the unit queued on disk and forwarded to peers
//! - **Codec**: [`codec`] turns records into single, control-character-free queue lines and back
//! - **Errors**: [`errors::TetherError`], [`errors::DecodeError`], [`errors::TransportError`]
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber
//! - **Metrics**: [`metrics`] name constants shared by the queue and channel crates
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other tether crates.

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod record;

pub use errors::{DecodeError, Result, TetherError, TransportError};
pub use record::EventRecord;
