//! Shared domain types for the bothive runtime.
//!
//! Everything here is serde-friendly and free of I/O: the error taxonomy,
//! the parsed configuration tree, the normalized stream-event union, and
//! the bot/message data model. Heavier crates (channels, gateway) depend
//! on this one and never the other way around.

pub mod bot;
pub mod config;
pub mod error;
pub mod message;
pub mod stream;

pub use error::{Error, ErrorKind, Result};
