//! The assistant loop: calibrate once, then
//! wake listen → match → acknowledge → question listen → dispatch → speak.
//!
//! Every transition is published on the bus. One failed iteration (device
//! error or panic) is logged and followed by a short back-off; it never ends
//! the loop. Only the run flag does.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::AssistantConfig;
use crate::{
    capture::{CaptureOutcome, SpeechSource},
    dispatch::Dispatch,
    ipc::{
        bus::EventBus,
        events::{AssistantEvent, AssistantState, LogLevel},
    },
    run_flag::RunFlag,
    speech::SpeechSynthesizer,
    wake::WakeWordMatcher,
};

/// Granularity of the error back-off sleep, so stop() is not held up by it.
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// Who is driving a phase. Only the worker owns the state cell; direct
/// callers announce their phases on the bus without touching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Caller {
    Worker,
    Direct,
}

/// Everything shared between the worker and direct callers.
pub(crate) struct AssistantCore {
    pub(crate) config: AssistantConfig,
    pub(crate) bus: EventBus,
    pub(crate) matcher: WakeWordMatcher,
    pub(crate) source: Box<dyn SpeechSource>,
    pub(crate) dispatcher: Box<dyn Dispatch>,
    pub(crate) synthesizer: SpeechSynthesizer,
    pub(crate) state: Mutex<AssistantState>,
}

impl AssistantCore {
    /// Record `next`; publish a `status` event only when it differs.
    pub(crate) fn set_state(&self, next: AssistantState) {
        let mut state = self.state.lock();
        if *state == next {
            return;
        }
        *state = next;
        debug!(state = ?next, "assistant state");
        self.bus.publish(AssistantEvent::Status { status: next });
    }

    pub(crate) fn state(&self) -> AssistantState {
        *self.state.lock()
    }

    fn enter(&self, caller: Caller, phase: AssistantState) {
        match caller {
            Caller::Worker => self.set_state(phase),
            Caller::Direct => self.bus.publish(AssistantEvent::Status { status: phase }),
        }
    }

    pub(crate) fn speak(&self, caller: Caller, text: &str) {
        self.enter(caller, AssistantState::Speaking);
        self.synthesizer.speak(text);
    }

    /// Dispatch `question`, publish and speak the reply (or the apology that
    /// stands in for it). Returns what was spoken.
    pub(crate) fn process_question(&self, caller: Caller, question: &str) -> String {
        self.enter(caller, AssistantState::Processing);
        self.bus.log(LogLevel::Info, "Processing question...");

        let phrases = &self.config.phrases;
        let reply = match self.dispatcher.dispatch(question) {
            Ok(reply) if reply.trim().is_empty() => {
                self.bus
                    .log(LogLevel::Warning, "Remote service returned an empty reply");
                phrases.empty_reply.clone()
            }
            Ok(reply) => {
                self.bus.log(LogLevel::Success, "Response received");
                reply
            }
            Err(e) => {
                self.bus.log(LogLevel::Error, format!("Dispatch failed: {e}"));
                phrases.dispatch_apology.clone()
            }
        };

        self.bus.publish(AssistantEvent::Response {
            text: reply.clone(),
        });
        self.speak(caller, &reply);
        reply
    }

    /// One wake → question → reply cycle. `Err` only for failures the loop
    /// cannot absorb locally.
    fn cycle(&self, running: &RunFlag) -> Result<(), CaptureOutcome> {
        let config = &self.config;
        self.set_state(AssistantState::ListeningWake);

        let heard = match self
            .source
            .listen(config.wake_timeout, config.wake_phrase_limit, running)
        {
            Ok(text) => text,
            Err(CaptureOutcome::ServiceError(detail)) => {
                self.bus
                    .log(LogLevel::Warning, format!("Speech service error: {detail}"));
                return Ok(());
            }
            Err(CaptureOutcome::DeviceError(detail)) => {
                return Err(CaptureOutcome::DeviceError(detail))
            }
            Err(_) => return Ok(()),
        };
        debug!(transcript = %heard, "heard while waiting for wake phrase");

        let Some(hit) = self.matcher.find(&heard) else {
            return Ok(());
        };
        if !running.is_running() {
            return Ok(());
        }
        info!(token = %hit.token, score = hit.score, "wake phrase matched");
        self.bus.log(
            LogLevel::Success,
            format!("Wake word detected ({:.0}%)", hit.score),
        );
        self.speak(Caller::Worker, &config.phrases.acknowledgement);

        self.listen_for_question(running)
    }

    fn listen_for_question(&self, running: &RunFlag) -> Result<(), CaptureOutcome> {
        let config = &self.config;
        if !running.is_running() {
            return Ok(());
        }

        self.set_state(AssistantState::ListeningQuestion);
        match self.source.calibrate(config.question_calibration, running) {
            Ok(_) | Err(CaptureOutcome::Interrupted) => {}
            Err(CaptureOutcome::DeviceError(detail)) => {
                return Err(CaptureOutcome::DeviceError(detail))
            }
            Err(e) => debug!("question recalibration skipped: {e}"),
        }
        if !running.is_running() {
            return Ok(());
        }

        self.bus.log(
            LogLevel::Info,
            format!(
                "Listening for your question ({}s)...",
                config.question_timeout.as_secs()
            ),
        );

        match self
            .source
            .listen(config.question_timeout, config.question_phrase_limit, running)
        {
            Ok(question) if question.trim().is_empty() => {
                self.bus
                    .log(LogLevel::Warning, "Could not understand the question");
                self.speak(Caller::Worker, &config.phrases.unintelligible);
            }
            Ok(question) => {
                let question = question.trim();
                self.bus
                    .log(LogLevel::Info, format!("Question: {question}"));
                self.bus.publish(AssistantEvent::Transcription {
                    text: question.to_string(),
                });
                self.process_question(Caller::Worker, question);
            }
            Err(CaptureOutcome::Unintelligible) => {
                self.bus
                    .log(LogLevel::Warning, "Could not understand the question");
                self.speak(Caller::Worker, &config.phrases.unintelligible);
            }
            Err(CaptureOutcome::NoSpeechDetected) => {
                self.bus
                    .log(LogLevel::Warning, "No question heard within the timeout");
            }
            Err(CaptureOutcome::ServiceError(detail)) => {
                self.bus
                    .log(LogLevel::Error, format!("Speech service error: {detail}"));
            }
            Err(CaptureOutcome::Interrupted) => {}
            Err(CaptureOutcome::DeviceError(detail)) => {
                return Err(CaptureOutcome::DeviceError(detail))
            }
        }
        Ok(())
    }
}

/// Worker thread body. Returns once the run flag is cleared.
pub(crate) fn run(core: std::sync::Arc<AssistantCore>, running: RunFlag) {
    core.set_state(AssistantState::Calibrating);
    core.bus
        .log(LogLevel::Info, "Calibrating microphone for ambient noise...");
    match core.source.calibrate(core.config.calibration, &running) {
        Ok(threshold) => core.bus.log(
            LogLevel::Info,
            format!("Microphone calibrated (threshold {threshold:.4})"),
        ),
        Err(CaptureOutcome::Interrupted) => {}
        Err(e) => core.bus.log(
            LogLevel::Warning,
            format!("Calibration failed: {e}; using the default threshold"),
        ),
    }

    if running.is_running() {
        core.bus.log(
            LogLevel::Info,
            format!("Listening for wake word '{}'...", core.matcher.phrase()),
        );
    }

    while running.is_running() {
        match catch_unwind(AssertUnwindSafe(|| core.cycle(&running))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                core.bus
                    .log(LogLevel::Error, format!("Assistant loop error: {e}"));
                backoff(core.config.error_backoff, &running);
            }
            Err(_) => {
                core.bus
                    .log(LogLevel::Error, "Assistant loop panicked; resuming");
                backoff(core.config.error_backoff, &running);
            }
        }
    }

    core.set_state(AssistantState::Idle);
    core.bus.log(LogLevel::Info, "Assistant stopped");
}

fn backoff(total: Duration, running: &RunFlag) {
    let deadline = Instant::now() + total;
    while running.is_running() && Instant::now() < deadline {
        thread::sleep(BACKOFF_SLICE);
    }
}
