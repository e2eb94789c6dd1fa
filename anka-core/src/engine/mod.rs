//! `AssistantController`: lifecycle owner of the single assistant worker.
//!
//! ## Lifecycle
//!
//! ```text
//! AssistantController::new(config, bus, collaborators)
//!     └─► start()   → run flag set, worker spawned, status = calibrating → listening_wake
//!         └─► stop() → run flag cleared, bounded wait for the worker, status = idle
//! ```
//!
//! `start()` is idempotent and `stop()` on a stopped controller does nothing.
//! The microphone listener watches the run flag between audio polls, so a
//! stop cuts a listen short. A dispatch or utterance already in flight runs
//! to completion; if that outlasts `stop_join_timeout` the worker is left to
//! finish on its own and `start()` reports `StillStopping` until it has.
//!
//! ## Threading
//!
//! `ask()` and `speak_demo_reply()` run on the caller's thread, concurrently
//! with the worker. Speech output is serialised inside `SpeechSynthesizer`;
//! capture and dispatch are not.

pub mod worker;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    capture::{CaptureSettings, CpalInput, OpenAiTranscriber, SpeechCapture, SpeechSource, Transcriber},
    dispatch::{Dispatch, ResponseDispatcher, DEFAULT_DISPATCH_TIMEOUT},
    error::{AnkaError, Result},
    ipc::{
        bus::EventBus,
        events::{AssistantEvent, AssistantState, LogLevel},
    },
    run_flag::RunFlag,
    speech::{LocalVoice, OpenAiVoice, SpeechSynthesizer, SynthesisBackend},
    wake::WakeWordMatcher,
};

use worker::{AssistantCore, Caller};

/// Interval between "has the worker exited" checks in `stop()`.
const JOIN_POLL: Duration = Duration::from_millis(20);

/// Fixed sentences the assistant speaks on its own behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrases {
    /// Spoken right after the wake phrase is recognised.
    pub acknowledgement: String,
    /// Spoken when the question was heard but not understood.
    pub unintelligible: String,
    /// Substituted for the reply on any dispatch failure.
    pub dispatch_apology: String,
    /// Substituted when the remote service answers with nothing.
    pub empty_reply: String,
}

impl Default for Phrases {
    fn default() -> Self {
        Self {
            acknowledgement: "Yes?".into(),
            unintelligible: "Sorry, I didn't catch that.".into(),
            dispatch_apology: "Sorry, I couldn't reach the assistant service right now.".into(),
            empty_reply: "Sorry, I didn't get an answer.".into(),
        }
    }
}

/// Configuration for `AssistantController`. Fixed once the controller is
/// built.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Default: `anka`.
    pub wake_phrase: String,
    /// Minimum similarity (0..=100) for a token to count as the wake phrase.
    /// Default: 70.
    pub wake_threshold: f64,
    /// BCP-47 recognition language. Default: `sk-SK`.
    pub language: String,
    /// Human-readable language name sent with every dispatched question.
    /// Default: `Slovak`.
    pub language_label: String,
    /// Ambient calibration before the first wake listen. Default: 2 s.
    pub calibration: Duration,
    /// Recalibration before each question. Default: 1.5 s.
    pub question_calibration: Duration,
    pub wake_timeout: Duration,
    pub wake_phrase_limit: Duration,
    /// Default: 10 s.
    pub question_timeout: Duration,
    /// Default: 15 s.
    pub question_phrase_limit: Duration,
    /// Initial energy threshold in 16-bit PCM units. Default: 1000.
    pub energy_threshold: f32,
    pub dynamic_energy: bool,
    pub dynamic_damping: f32,
    pub dynamic_ratio: f32,
    /// Trailing silence that ends a phrase. Default: 0.8 s.
    pub pause_threshold: Duration,
    pub dispatch_timeout: Duration,
    /// Pause after an unexpected loop error before resuming.
    pub error_backoff: Duration,
    /// How long `stop()` waits for the worker to exit.
    pub stop_join_timeout: Duration,
    /// Remote automation endpoint. `None` disables dispatch.
    pub webhook_url: Option<String>,
    /// Enables cloud transcription and the cloud voice.
    pub openai_api_key: Option<String>,
    pub tts_model: String,
    pub tts_voice: String,
    pub transcription_model: String,
    /// Input device name; `None` uses the system default.
    pub input_device: Option<String>,
    pub phrases: Phrases,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            wake_phrase: "anka".into(),
            wake_threshold: 70.0,
            language: "sk-SK".into(),
            language_label: "Slovak".into(),
            calibration: Duration::from_secs(2),
            question_calibration: Duration::from_millis(1_500),
            wake_timeout: Duration::from_secs(5),
            wake_phrase_limit: Duration::from_secs(5),
            question_timeout: Duration::from_secs(10),
            question_phrase_limit: Duration::from_secs(15),
            energy_threshold: 1_000.0,
            dynamic_energy: true,
            dynamic_damping: 0.15,
            dynamic_ratio: 1.5,
            pause_threshold: Duration::from_millis(800),
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            error_backoff: Duration::from_secs(1),
            stop_join_timeout: Duration::from_secs(2),
            webhook_url: None,
            openai_api_key: None,
            tts_model: "tts-1".into(),
            tts_voice: "alloy".into(),
            transcription_model: "whisper-1".into(),
            input_device: None,
            phrases: Phrases::default(),
        }
    }
}

impl AssistantConfig {
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            energy_threshold: self.energy_threshold,
            dynamic_energy: self.dynamic_energy,
            dynamic_damping: self.dynamic_damping,
            dynamic_ratio: self.dynamic_ratio,
            pause_threshold: self.pause_threshold,
        }
    }
}

/// The external parts the worker drives.
pub struct Collaborators {
    pub source: Box<dyn SpeechSource>,
    pub dispatcher: Box<dyn Dispatch>,
    /// Tried in order on every utterance.
    pub backends: Vec<Box<dyn SynthesisBackend>>,
}

impl Collaborators {
    /// Microphone + OpenAI transcription, the HTTP dispatcher, and the
    /// OpenAI voice followed by the platform's local voice.
    ///
    /// Missing credentials degrade the assistant instead of failing.
    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());

        let transcriber: Option<Box<dyn Transcriber>> = match api_key {
            Some(key) => Some(Box::new(OpenAiTranscriber::new(
                key,
                config.transcription_model.clone(),
            )?)),
            None => {
                warn!("OPENAI_API_KEY not set: speech recognition unavailable");
                None
            }
        };
        let source = SpeechCapture::new(
            Box::new(CpalInput::new(config.input_device.clone())),
            transcriber,
            config.language.clone(),
            config.capture_settings(),
        );

        let dispatcher = ResponseDispatcher::new(
            config.webhook_url.clone(),
            config.dispatch_timeout,
            config.wake_phrase.clone(),
            config.language_label.clone(),
        )?;
        if !dispatcher.is_configured() {
            warn!("N8N_WEBHOOK_URL not set: questions will be answered with an apology");
        }

        let mut backends: Vec<Box<dyn SynthesisBackend>> = Vec::new();
        if let Some(key) = api_key {
            backends.push(Box::new(OpenAiVoice::new(
                key,
                config.tts_model.clone(),
                config.tts_voice.clone(),
            )?));
        }
        if let Some(local) = LocalVoice::platform_default(&config.language) {
            backends.push(Box::new(local));
        }
        info!(
            voices = backends.len(),
            dispatch = dispatcher.is_configured(),
            "collaborators ready"
        );

        Ok(Self {
            source: Box::new(source),
            dispatcher: Box::new(dispatcher),
            backends,
        })
    }
}

/// The top-level assistant handle.
///
/// `Send + Sync`; share it as `Arc<AssistantController>` between the
/// transport layer's handlers.
pub struct AssistantController {
    core: Arc<AssistantCore>,
    running: RunFlag,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AssistantController {
    pub fn new(config: AssistantConfig, bus: EventBus, collaborators: Collaborators) -> Self {
        let matcher = WakeWordMatcher::new(&config.wake_phrase, config.wake_threshold);
        let synthesizer = SpeechSynthesizer::new(collaborators.backends, bus.clone());
        let core = AssistantCore {
            matcher,
            source: collaborators.source,
            dispatcher: collaborators.dispatcher,
            synthesizer,
            state: Mutex::new(AssistantState::Idle),
            bus,
            config,
        };
        Self {
            core: Arc::new(core),
            running: RunFlag::default(),
            worker: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.core.bus
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.core.config
    }

    pub fn state(&self) -> AssistantState {
        self.core.state()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// Mirror to tracing and enqueue a `log` event.
    pub fn log(&self, message: impl Into<String>, level: LogLevel) {
        self.core.bus.log(level, message);
    }

    /// Spawn the worker. Returns immediately; a no-op when already running.
    ///
    /// # Errors
    /// - `AnkaError::StillStopping` if a previous worker is still finishing
    ///   a call it could not abandon.
    /// - `AnkaError::Io` if the thread cannot be spawned.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if self.running.is_running() {
            debug!("start ignored: already running");
            return Ok(());
        }
        if let Some(handle) = worker.take() {
            if !handle.is_finished() {
                *worker = Some(handle);
                return Err(AnkaError::StillStopping);
            }
            if handle.join().is_err() {
                warn!("previous worker exited by panic");
            }
        }

        self.running.set(true);
        let core = Arc::clone(&self.core);
        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name("anka-worker".into())
            .spawn(move || worker::run(core, running));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                self.core.bus.log(LogLevel::Info, "Assistant started");
                Ok(())
            }
            Err(e) => {
                self.running.set(false);
                Err(AnkaError::Io(e))
            }
        }
    }

    /// Clear the run flag and wait up to `stop_join_timeout` for the worker.
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        if !self.running.swap(false) {
            return;
        }
        self.core.bus.log(LogLevel::Info, "Stopping assistant...");

        let Some(handle) = worker.take() else {
            return;
        };
        let deadline = Instant::now() + self.core.config.stop_join_timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL);
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("worker exited by panic");
            }
        } else {
            warn!(
                waited = ?self.core.config.stop_join_timeout,
                "worker still busy; it will exit after its current call"
            );
            *worker = Some(handle);
        }
    }

    /// Answer a typed question: dispatch, publish the reply and speak it, on
    /// the caller's thread. Returns the text that was spoken.
    ///
    /// # Errors
    /// `AnkaError::EmptyQuestion` for a blank question.
    pub fn ask(&self, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AnkaError::EmptyQuestion);
        }
        self.core
            .bus
            .log(LogLevel::Info, format!("Text question: {question}"));
        let reply = self.core.process_question(Caller::Direct, question);
        self.hand_back();
        Ok(reply)
    }

    /// Speak a canned reply that echoes `question`, without dispatching.
    pub fn speak_demo_reply(&self, question: &str) -> Result<String> {
        let reply = format!(
            "I heard you ask: {}. This is a test response to demonstrate the \
             text-to-speech voice.",
            question.trim()
        );
        self.core
            .bus
            .log(LogLevel::Success, format!("Test Response: {reply}"));
        self.core.bus.publish(AssistantEvent::Response {
            text: reply.clone(),
        });
        self.core.speak(Caller::Direct, &reply);
        self.hand_back();
        Ok(reply)
    }

    /// Re-announce the worker's own state once a direct call is done, so
    /// status displays leave the direct call's last phase.
    fn hand_back(&self) {
        self.core.bus.publish(AssistantEvent::Status {
            status: self.core.state(),
        });
    }
}

impl Drop for AssistantController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{capture::CaptureOutcome, dispatch::DispatchFailure};

    struct SilentSource;

    impl SpeechSource for SilentSource {
        fn calibrate(
            &self,
            _duration: Duration,
            _running: &RunFlag,
        ) -> std::result::Result<f32, CaptureOutcome> {
            Ok(0.01)
        }

        fn listen(
            &self,
            _timeout: Duration,
            _limit: Duration,
            running: &RunFlag,
        ) -> std::result::Result<String, CaptureOutcome> {
            while running.is_running() {
                thread::sleep(Duration::from_millis(5));
            }
            Err(CaptureOutcome::Interrupted)
        }
    }

    struct Unconfigured;

    impl Dispatch for Unconfigured {
        fn dispatch(&self, _question: &str) -> std::result::Result<String, DispatchFailure> {
            Err(DispatchFailure::NotConfigured)
        }
    }

    fn controller() -> AssistantController {
        AssistantController::new(
            AssistantConfig::default(),
            EventBus::new(),
            Collaborators {
                source: Box::new(SilentSource),
                dispatcher: Box::new(Unconfigured),
                backends: Vec::new(),
            },
        )
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AssistantConfig::default();
        assert_eq!(config.wake_phrase, "anka");
        assert_eq!(config.wake_threshold, 70.0);
        assert_eq!(config.language, "sk-SK");
        assert_eq!(config.question_timeout, Duration::from_secs(10));
        assert_eq!(config.dispatch_timeout, Duration::from_secs(30));
        assert!(config.webhook_url.is_none());
    }

    #[test]
    fn starts_idle_and_returns_to_idle_after_stop() {
        let c = controller();
        assert_eq!(c.state(), AssistantState::Idle);
        assert!(!c.is_running());

        c.start().expect("start");
        assert!(c.is_running());
        c.stop();
        assert!(!c.is_running());
        assert_eq!(c.state(), AssistantState::Idle);
    }

    #[test]
    fn blank_question_is_rejected_without_events() {
        let c = controller();
        assert!(matches!(c.ask("   "), Err(AnkaError::EmptyQuestion)));
        assert!(c.bus().is_empty());
    }

    #[test]
    fn unconfigured_dispatch_speaks_the_apology() {
        let c = controller();
        let reply = c.ask("what time is it").expect("ask");
        assert_eq!(reply, Phrases::default().dispatch_apology);
        assert_eq!(c.state(), AssistantState::Idle);
    }

    #[test]
    fn demo_reply_echoes_the_question() {
        let c = controller();
        let reply = c.speak_demo_reply("is it raining").expect("demo");
        assert!(reply.starts_with("I heard you ask: is it raining."));
        let events = c.bus().drain();
        let response = events
            .iter()
            .position(|e| *e == AssistantEvent::Response { text: reply.clone() })
            .expect("response event");
        let stopped = events
            .iter()
            .position(|e| *e == AssistantEvent::SpeakingStopped)
            .expect("speaking_stopped event");
        assert!(response < stopped);
        assert_eq!(c.state(), AssistantState::Idle);
    }

    #[test]
    fn direct_ask_announces_its_phases_without_taking_the_state() {
        let c = controller();
        c.ask("what time is it").expect("ask");
        let statuses: Vec<AssistantState> = c
            .bus()
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                AssistantEvent::Status { status } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                AssistantState::Processing,
                AssistantState::Speaking,
                AssistantState::Idle
            ]
        );
        assert_eq!(c.state(), AssistantState::Idle);
    }
}
