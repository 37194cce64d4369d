//! # MASC — Multi-Agent Coordination Substrate
//!
//! A process-local and cross-node runtime that lets independent agent
//! processes share a room: negotiate task ownership, exchange messages,
//! hold mutually exclusive file locks, and hand off long-running work
//! before context exhaustion.
//!
//! ## Architecture
//!
//! - `codec`: Compact Protocol v4 — framed zstd with optional dictionary
//! - `backend`: pluggable key/value storage with CAS and lease locks
//! - `room`: the coordination state machine layered on `backend`
//! - `session`: per-agent sliding-window rate limiting and message queues
//! - `bounded`: termination-safe multi-agent execution loop
//! - `mitosis`: two-phase agent handoff (prepare + divide)
//! - `validation`: key/path/identifier safety checks shared by every layer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod config;
pub mod context;
pub mod validation;
pub mod codec;
pub mod backend;
pub mod room;
pub mod session;
pub mod bounded;
pub mod mitosis;

#[cfg(feature = "envelope-encryption")]
pub mod envelope;

pub use error::{MascError, MascResult};
pub use context::ProcessContext;

/// Crate version, re-exported for diagnostics and envelope audit records.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, re-exported for diagnostics and envelope audit records.
pub const NAME: &str = env!("CARGO_PKG_NAME");
