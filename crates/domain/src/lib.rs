//! Shared domain types for the coworker server.
//!
//! Everything that crosses a crate boundary lives here: the error
//! taxonomy, transcript messages, the canonical stream-part vocabulary,
//! tool call/outcome types, the wire protocol, and configuration.

pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod tool;
pub mod wire;
