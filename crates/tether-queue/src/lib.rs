//! # tether-queue
//!
//! Durable store-and-forward queue for undeliverable events.
//!
//! - **File**: [`file::QueueFile`], one `<api_key>.eventstream` file per key with
//!   append, drain (replay), inspect and purge
//! - **Lock**: [`lock::QueueLock`], exclusive advisory lock scoped to one
//!   read-modify-write cycle
//! - **Registry**: [`registry::StreamRegistry`], shared append handles keyed by path
//!
//! ## Crate Position
//!
//! Depends on tether-core and tether-settings. Depended on by tether-channel
//! and the `tether` binary.

#![deny(unsafe_code)]

pub mod file;
pub mod lock;
pub mod registry;

pub use file::{
    PurgeMode, QUEUE_FILE_EXTENSION, QueueContext, QueueEntry, QueueFile, ReplayOutcome,
    ReplayReport, validate_api_key,
};
pub use lock::{LockOptions, QueueLock};
pub use registry::{SharedStream, StreamRegistry};
