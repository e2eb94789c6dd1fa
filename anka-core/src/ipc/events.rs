//! Events published on the `EventBus`.
//!
//! ## Wire shape
//!
//! | Event | JSON |
//! |-------|------|
//! | `Connected` | `{"type":"connected"}` |
//! | `Log` | `{"type":"log","message":"...","level":"success"}` |
//! | `Status` | `{"type":"status","status":"listening_wake"}` |
//! | `Speaking` | `{"type":"speaking","text":"..."}` |
//! | `SpeakingStopped` | `{"type":"speaking_stopped"}` |
//! | `Transcription` | `{"type":"transcription","text":"..."}` |
//! | `Response` | `{"type":"response","text":"..."}` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Assistant events
// ---------------------------------------------------------------------------

/// A single notification for observers. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    /// Synthetic greeting delivered once to each new subscription.
    Connected,
    /// Human-readable progress or failure message.
    Log { message: String, level: LogLevel },
    /// The assistant entered a new phase.
    Status { status: AssistantState },
    /// Speech output started for `text`.
    Speaking { text: String },
    /// Speech output finished (successfully or not).
    SpeakingStopped,
    /// A question captured from the microphone.
    Transcription { text: String },
    /// The reply that is about to be spoken.
    Response { text: String },
}

impl AssistantEvent {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
            level,
        }
    }
}

/// Severity attached to `AssistantEvent::Log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Assistant state
// ---------------------------------------------------------------------------

/// Phase of the assistant cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantState {
    /// Worker not running (initial and terminal state).
    Idle,
    /// Measuring ambient noise before the first wake listen.
    Calibrating,
    /// Waiting for the wake phrase.
    ListeningWake,
    /// Wake phrase heard; capturing the question.
    ListeningQuestion,
    /// Waiting on the remote answer service.
    Processing,
    /// Playing a reply or prompt.
    Speaking,
}
