//! Anomaly-detection plugin core for a syscall observability host.
//!
//! The host streams kernel-captured syscall events and owns a process/thread
//! state table; this crate computes a configurable per-event behavior
//! fingerprint (a string built from selected thread and event attributes),
//! maintains probabilistic frequency estimates of those fingerprints in a
//! bank of Count-Min Sketches, and exposes the estimates back to the host as
//! extractable fields.
//!
//! The host drives three entry points on a [`Plugin`] instance:
//! configuration/initialization, per-event parse (which updates the
//! sketches), and field extraction (which reads them).

pub mod config;
pub mod event;
pub mod extract;
pub mod plugin;
pub mod profile;
pub mod sketch;
pub mod table;

pub use plugin::{ExtractError, FieldRequest, FieldValue, Plugin};
