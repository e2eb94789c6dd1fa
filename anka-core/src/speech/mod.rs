//! `SpeechSynthesizer`: ordered fallback chain of voice backends.
//!
//! ```text
//! speak(text)
//!   ├─ lock output (one utterance at a time, across all callers)
//!   ├─ publish speaking
//!   ├─ backend[0].synthesize_and_play ── Err ──► warning log ──► backend[1] ...
//!   └─ publish speaking_stopped (always)
//! ```

pub mod local;
pub mod openai;

use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::ipc::{
    bus::EventBus,
    events::{AssistantEvent, LogLevel},
};

pub use local::LocalVoice;
pub use openai::OpenAiVoice;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("playback failed: {0}")]
    Playback(String),
}

/// A voice that can render and play text, blocking until playback ends.
pub trait SynthesisBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn synthesize_and_play(&self, text: &str) -> Result<(), SynthesisError>;
}

pub struct SpeechSynthesizer {
    backends: Vec<Box<dyn SynthesisBackend>>,
    bus: EventBus,
    /// Serialises all speech output.
    output: Mutex<()>,
}

impl SpeechSynthesizer {
    /// `backends` are tried in order; an empty list still brackets every
    /// utterance with `speaking`/`speaking_stopped`.
    pub fn new(backends: Vec<Box<dyn SynthesisBackend>>, bus: EventBus) -> Self {
        Self {
            backends,
            bus,
            output: Mutex::new(()),
        }
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Speak `text`. Never fails; the outcome is only visible as events.
    pub fn speak(&self, text: &str) {
        let _output = self.output.lock();
        self.bus.publish(AssistantEvent::Speaking {
            text: text.to_string(),
        });

        let mut spoken = false;
        for (idx, backend) in self.backends.iter().enumerate() {
            let attempt = catch_unwind(AssertUnwindSafe(|| backend.synthesize_and_play(text)))
                .unwrap_or_else(|_| Err(SynthesisError::Synthesis("backend panicked".into())));
            match attempt {
                Ok(()) => {
                    debug!(backend = backend.name(), "utterance played");
                    spoken = true;
                    break;
                }
                Err(e) => {
                    let next = if idx + 1 < self.backends.len() {
                        ", falling back"
                    } else {
                        ""
                    };
                    self.bus.log(
                        LogLevel::Warning,
                        format!("Voice '{}' failed: {e}{next}", backend.name()),
                    );
                }
            }
        }

        if !spoken {
            self.bus
                .log(LogLevel::Error, "No voice backend could speak the reply");
        }
        self.bus.publish(AssistantEvent::SpeakingStopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::thread;
    use std::time::Duration;

    struct CountingVoice {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl SynthesisBackend for CountingVoice {
        fn name(&self) -> &str {
            self.name
        }

        fn synthesize_and_play(&self, _text: &str) -> Result<(), SynthesisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SynthesisError::Synthesis("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    struct PanickingVoice;

    impl SynthesisBackend for PanickingVoice {
        fn name(&self) -> &str {
            "panicky"
        }

        fn synthesize_and_play(&self, _text: &str) -> Result<(), SynthesisError> {
            panic!("driver exploded");
        }
    }

    fn voice(name: &'static str, fail: bool) -> (Box<dyn SynthesisBackend>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(CountingVoice {
                name,
                calls: Arc::clone(&calls),
                fail,
            }),
            calls,
        )
    }

    fn bracket_count(events: &[AssistantEvent]) -> (usize, usize) {
        let starts = events
            .iter()
            .filter(|e| matches!(e, AssistantEvent::Speaking { .. }))
            .count();
        let stops = events
            .iter()
            .filter(|e| matches!(e, AssistantEvent::SpeakingStopped))
            .count();
        (starts, stops)
    }

    #[test]
    fn primary_success_skips_fallback() {
        let bus = EventBus::new();
        let (primary, primary_calls) = voice("cloud", false);
        let (fallback, fallback_calls) = voice("local", false);
        let synth = SpeechSynthesizer::new(vec![primary, fallback], bus.clone());

        synth.speak("hello");

        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            bus.drain(),
            vec![
                AssistantEvent::Speaking {
                    text: "hello".into()
                },
                AssistantEvent::SpeakingStopped,
            ]
        );
    }

    #[test]
    fn primary_failure_logs_warning_and_falls_back() {
        let bus = EventBus::new();
        let (primary, _) = voice("cloud", true);
        let (fallback, fallback_calls) = voice("local", false);
        let synth = SpeechSynthesizer::new(vec![primary, fallback], bus.clone());

        synth.speak("hello");

        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
        let events = bus.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1],
            AssistantEvent::Log { level: LogLevel::Warning, message } if message.contains("cloud")
        ));
        assert_eq!(bracket_count(&events), (1, 1));
        assert_eq!(events.last(), Some(&AssistantEvent::SpeakingStopped));
    }

    #[test]
    fn bracket_holds_when_every_backend_fails_or_none_exist() {
        let bus = EventBus::new();
        let (a, _) = voice("cloud", true);
        let synth = SpeechSynthesizer::new(vec![a, Box::new(PanickingVoice)], bus.clone());
        synth.speak("hello");
        let events = bus.drain();
        assert_eq!(bracket_count(&events), (1, 1));
        assert!(events.iter().any(|e| matches!(
            e,
            AssistantEvent::Log {
                level: LogLevel::Error,
                ..
            }
        )));

        let empty = SpeechSynthesizer::new(Vec::new(), bus.clone());
        empty.speak("nobody home");
        assert_eq!(bracket_count(&bus.drain()), (1, 1));
    }

    struct SlowVoice {
        active: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
    }

    impl SynthesisBackend for SlowVoice {
        fn name(&self) -> &str {
            "slow"
        }

        fn synthesize_and_play(&self, _text: &str) -> Result<(), SynthesisError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn concurrent_callers_never_overlap_playback() {
        let bus = EventBus::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let synth = Arc::new(SpeechSynthesizer::new(
            vec![Box::new(SlowVoice {
                active: Arc::clone(&active),
                max_seen: Arc::clone(&max_seen),
            })],
            bus.clone(),
        ));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let synth = Arc::clone(&synth);
                thread::spawn(move || synth.speak(&format!("utterance {i}")))
            })
            .collect();
        for h in handles {
            h.join().expect("speaker thread panicked");
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        // Brackets are never interleaved.
        let events = bus.drain();
        for pair in events.chunks(2) {
            assert!(matches!(pair[0], AssistantEvent::Speaking { .. }));
            assert_eq!(pair[1], AssistantEvent::SpeakingStopped);
        }
    }
}
