#![deny(unsafe_code)]

/// Live repair session: ingest, backlog, reveal scheduling, and view state.
///
/// The transport lives in `fixstream-transport`; this crate turns its typed
/// events into an ordered, animated view and drives it from one task.
pub mod repair;
/// Layered settings, resolved once at startup.
pub mod settings;
