//! Observer-facing event types and the queue that carries them.
//!
//! All event types derive `serde::Serialize` + `serde::Deserialize` so the
//! HTTP shim can forward them verbatim as server-sent-event `data:` payloads.

pub mod bus;
pub mod events;
