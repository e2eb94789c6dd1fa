//! `SpeechCapture`: microphone acquisition, ambient calibration and
//! transcription behind one blocking `listen` call.
//!
//! The worker only sees the `SpeechSource` trait, so tests (and alternative
//! front-ends) can script utterances without a microphone or network.

pub mod listener;
pub mod transcribe;

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    audio::MicStream,
    buffering::{create_mic_ring, AudioConsumer, Consumer},
    error::Result,
    run_flag::RunFlag,
    vad::EnergyGate,
};

pub use listener::PhraseLimits;
pub use transcribe::{OpenAiTranscriber, Transcriber};

/// Why a listen produced no text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureOutcome {
    /// Nothing above the energy threshold within the timeout.
    #[error("no speech detected")]
    NoSpeechDetected,
    /// Speech was captured but could not be transcribed.
    #[error("speech was not intelligible")]
    Unintelligible,
    /// The transcription service failed.
    #[error("speech service error: {0}")]
    ServiceError(String),
    /// The run flag was cleared while listening.
    #[error("listening interrupted")]
    Interrupted,
    /// The microphone could not be opened or failed mid-stream.
    #[error("microphone error: {0}")]
    DeviceError(String),
}

/// What the assistant worker listens through.
pub trait SpeechSource: Send + Sync {
    /// Measure ambient noise for `duration` and return the resulting energy
    /// threshold (normalized RMS).
    fn calibrate(&self, duration: Duration, running: &RunFlag) -> std::result::Result<f32, CaptureOutcome>;

    /// Block until one phrase has been heard and transcribed, for at most
    /// roughly `timeout + phrase_time_limit`. Never retries.
    fn listen(
        &self,
        timeout: Duration,
        phrase_time_limit: Duration,
        running: &RunFlag,
    ) -> std::result::Result<String, CaptureOutcome>;
}

// ---------------------------------------------------------------------------
// Microphone abstraction
// ---------------------------------------------------------------------------

/// A device that can be opened for exclusive reading.
pub trait AudioInput: Send + Sync {
    /// Open the device. Dropping the returned source releases it.
    fn open(&self) -> Result<Box<dyn FrameSource>>;
}

/// Blocks of mono samples from an open device.
pub trait FrameSource {
    fn sample_rate(&self) -> u32;

    /// Wait up to `wait` for the next block. `None` when nothing arrived.
    fn read(&mut self, wait: Duration) -> Option<Vec<f32>>;
}

/// The system microphone via cpal.
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    preferred_device: Option<String>,
}

impl CpalInput {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

impl AudioInput for CpalInput {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        let (producer, consumer) = create_mic_ring();
        let stream = MicStream::open(producer, self.preferred_device.as_deref())?;
        Ok(Box::new(CpalFrames {
            sample_rate: stream.sample_rate,
            _stream: stream,
            consumer,
            scratch: vec![0.0; 4_096],
        }))
    }
}

struct CpalFrames {
    _stream: MicStream,
    consumer: AudioConsumer,
    sample_rate: u32,
    scratch: Vec<f32>,
}

/// Sleep between empty ring polls (avoids busy-wait burning a core).
const EMPTY_RING_SLEEP: Duration = Duration::from_millis(5);

impl FrameSource for CpalFrames {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, wait: Duration) -> Option<Vec<f32>> {
        let deadline = Instant::now() + wait;
        loop {
            let n = self.consumer.pop_slice(&mut self.scratch);
            if n > 0 {
                return Some(self.scratch[..n].to_vec());
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(EMPTY_RING_SLEEP);
        }
    }
}

// ---------------------------------------------------------------------------
// SpeechCapture
// ---------------------------------------------------------------------------

/// Listening parameters that do not vary per call.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    /// Initial energy threshold in 16-bit PCM units.
    pub energy_threshold: f32,
    /// Whether silence keeps adapting the threshold.
    pub dynamic_energy: bool,
    pub dynamic_damping: f32,
    pub dynamic_ratio: f32,
    /// Trailing silence that ends a phrase.
    pub pause_threshold: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            energy_threshold: 1_000.0,
            dynamic_energy: true,
            dynamic_damping: 0.15,
            dynamic_ratio: 1.5,
            pause_threshold: Duration::from_millis(800),
        }
    }
}

/// Microphone + energy gate + transcriber.
pub struct SpeechCapture {
    input: Box<dyn AudioInput>,
    transcriber: Option<Box<dyn Transcriber>>,
    language: String,
    pause_threshold: Duration,
    /// Held for the whole of every device access; the gate's threshold
    /// persists across calls.
    gate: Mutex<EnergyGate>,
}

impl SpeechCapture {
    /// `transcriber: None` leaves capture working but reports every phrase
    /// as a `ServiceError`.
    pub fn new(
        input: Box<dyn AudioInput>,
        transcriber: Option<Box<dyn Transcriber>>,
        language: impl Into<String>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            input,
            transcriber,
            language: language.into(),
            pause_threshold: settings.pause_threshold,
            gate: Mutex::new(EnergyGate::new(
                settings.energy_threshold,
                settings.dynamic_damping,
                settings.dynamic_ratio,
                settings.dynamic_energy,
            )),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.gate.lock().threshold()
    }
}

impl SpeechSource for SpeechCapture {
    fn calibrate(
        &self,
        duration: Duration,
        running: &RunFlag,
    ) -> std::result::Result<f32, CaptureOutcome> {
        let mut gate = self.gate.lock();
        let mut frames = self
            .input
            .open()
            .map_err(|e| CaptureOutcome::DeviceError(e.to_string()))?;
        let threshold = listener::calibrate(frames.as_mut(), &mut gate, duration, running)?;
        info!(threshold, "microphone calibrated");
        Ok(threshold)
    }

    fn listen(
        &self,
        timeout: Duration,
        phrase_time_limit: Duration,
        running: &RunFlag,
    ) -> std::result::Result<String, CaptureOutcome> {
        let phrase = {
            let mut gate = self.gate.lock();
            let mut frames = self
                .input
                .open()
                .map_err(|e| CaptureOutcome::DeviceError(e.to_string()))?;
            let limits = PhraseLimits {
                timeout,
                phrase_time_limit,
                pause_threshold: self.pause_threshold,
            };
            listener::record_phrase(frames.as_mut(), &mut gate, limits, running)?
            // Device released here, before the network round trip.
        };

        debug!(
            seconds = phrase.duration_secs(),
            "phrase captured, transcribing"
        );

        let transcriber = self.transcriber.as_ref().ok_or_else(|| {
            CaptureOutcome::ServiceError("speech recognition is not configured".into())
        })?;
        transcriber.transcribe(&phrase, &self.language)
    }
}
