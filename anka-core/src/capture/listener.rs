//! Phrase recording state machine over a stream of microphone blocks.
//!
//! ```text
//! waiting ──speech──► recording ──pause_threshold of silence──► done
//!    │                    └──────phrase_time_limit reached──────► done
//!    └──timeout without speech──► NoSpeechDetected
//! any state ──run flag cleared──► Interrupted
//! ```
//!
//! Timing is counted in samples so decisions do not depend on how fast the
//! device delivers audio; a wall-clock guard covers devices that deliver
//! nothing at all.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::{
    buffering::chunk::AudioChunk,
    capture::{CaptureOutcome, FrameSource},
    run_flag::RunFlag,
    vad::{EnergyGate, VadDecision},
};

/// How long a single `FrameSource::read` may block.
pub const READ_WAIT: Duration = Duration::from_millis(50);

/// Audio kept from before the phrase started, so soft onsets are not clipped.
const PRE_ROLL: Duration = Duration::from_millis(300);

/// Silence-based end-of-phrase parameters.
#[derive(Debug, Clone, Copy)]
pub struct PhraseLimits {
    /// Give up if no phrase starts within this long.
    pub timeout: Duration,
    /// Cut a phrase off after this long.
    pub phrase_time_limit: Duration,
    /// Trailing silence that ends a phrase.
    pub pause_threshold: Duration,
}

fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize
}

/// Measure ambient noise for `duration` and settle the gate's threshold on it.
pub fn calibrate(
    frames: &mut dyn FrameSource,
    gate: &mut EnergyGate,
    duration: Duration,
    running: &RunFlag,
) -> Result<f32, CaptureOutcome> {
    let rate = frames.sample_rate();
    let wanted = samples_for(duration, rate);
    let wall_deadline = Instant::now() + duration + Duration::from_secs(1);
    let mut measured = 0usize;

    while measured < wanted {
        if !running.is_running() {
            return Err(CaptureOutcome::Interrupted);
        }
        match frames.read(READ_WAIT) {
            Some(block) if !block.is_empty() => {
                measured += block.len();
                gate.calibrate(&AudioChunk::new(block, rate));
            }
            _ => {
                if Instant::now() >= wall_deadline {
                    break;
                }
            }
        }
    }

    debug!(
        threshold = gate.threshold(),
        measured_samples = measured,
        "ambient calibration finished"
    );
    Ok(gate.threshold())
}

/// Record one phrase. Returns the phrase audio (pre-roll included).
pub fn record_phrase(
    frames: &mut dyn FrameSource,
    gate: &mut EnergyGate,
    limits: PhraseLimits,
    running: &RunFlag,
) -> Result<AudioChunk, CaptureOutcome> {
    let rate = frames.sample_rate();
    let timeout_samples = samples_for(limits.timeout, rate);
    let limit_samples = samples_for(limits.phrase_time_limit, rate).max(1);
    let pause_samples = samples_for(limits.pause_threshold, rate).max(1);
    let pre_roll_samples = samples_for(PRE_ROLL, rate);
    let wall_deadline = Instant::now() + limits.timeout + Duration::from_secs(1);

    let mut pre_roll: VecDeque<f32> = VecDeque::with_capacity(pre_roll_samples);
    let mut waited = 0usize;
    let mut phrase: Vec<f32> = Vec::new();
    let mut phrase_len = 0usize;
    let mut trailing_silence = 0usize;
    let mut started = false;

    loop {
        if !running.is_running() {
            return Err(CaptureOutcome::Interrupted);
        }

        let block = match frames.read(READ_WAIT) {
            Some(block) if !block.is_empty() => block,
            _ => {
                if !started && Instant::now() >= wall_deadline {
                    return Err(CaptureOutcome::NoSpeechDetected);
                }
                if started && Instant::now() >= wall_deadline + limits.phrase_time_limit {
                    break;
                }
                continue;
            }
        };

        let chunk = AudioChunk::new(block, rate);
        let decision = gate.classify(&chunk);

        if !started {
            if decision == VadDecision::Speech {
                started = true;
                phrase.extend(pre_roll.drain(..));
                phrase_len = chunk.samples.len();
                phrase.extend_from_slice(&chunk.samples);
                debug!(waited_samples = waited, "phrase started");
            } else {
                waited += chunk.samples.len();
                pre_roll.extend(chunk.samples.iter().copied());
                while pre_roll.len() > pre_roll_samples {
                    pre_roll.pop_front();
                }
                if waited >= timeout_samples {
                    return Err(CaptureOutcome::NoSpeechDetected);
                }
                continue;
            }
        } else {
            phrase_len += chunk.samples.len();
            phrase.extend_from_slice(&chunk.samples);
            if decision.is_speech() {
                trailing_silence = 0;
            } else {
                trailing_silence += chunk.samples.len();
            }
        }

        if trailing_silence >= pause_samples {
            debug!(phrase_samples = phrase_len, "phrase ended on pause");
            break;
        }
        if phrase_len >= limit_samples {
            debug!(phrase_samples = phrase_len, "phrase time limit reached");
            break;
        }
    }

    Ok(AudioChunk::new(phrase, rate))
}
