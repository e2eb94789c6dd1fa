//! # anka-core
//!
//! Voice assistant orchestration engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → SpeechCapture(listen) → WakeWordMatcher ──match──► SpeechCapture(listen)
//!                                                                      │
//!                                                            ResponseDispatcher::dispatch
//!                                                                      │
//!                                                        SpeechSynthesizer (primary → fallback)
//!
//! every phase transition ──► EventBus ──► presentation layer (SSE, dashboard, ...)
//! ```
//!
//! One background worker thread owns the capture → match → capture → dispatch →
//! speak cycle. `AssistantController::ask` drives the dispatch → speak half on
//! the caller's thread; all speech output is serialised inside the synthesizer.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod run_flag;
pub mod speech;
pub mod vad;
pub mod wake;

// Convenience re-exports for downstream crates
pub use capture::{CaptureOutcome, SpeechCapture, SpeechSource};
pub use dispatch::{Dispatch, DispatchFailure, ResponseDispatcher};
pub use engine::{AssistantConfig, AssistantController, Collaborators, Phrases};
pub use error::AnkaError;
pub use ipc::bus::{Delivery, EventBus, EventSubscription};
pub use ipc::events::{AssistantEvent, AssistantState, LogLevel};
pub use run_flag::RunFlag;
pub use speech::{SpeechSynthesizer, SynthesisBackend, SynthesisError};
pub use wake::WakeWordMatcher;
