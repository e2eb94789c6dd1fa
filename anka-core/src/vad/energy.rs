//! Energy gate with an ambient-noise-tracking threshold.
//!
//! ## Algorithm
//!
//! 1. Compute RMS of the incoming block.
//! 2. If RMS > `threshold` → `Speech`.
//! 3. Otherwise → `Silence`, and (when dynamic) pull the threshold toward
//!    `rms * ratio` with damping `damping ^ block_seconds`.
//!
//! Calibration applies step 3 unconditionally for every block of ambient
//! audio, so the threshold settles just above the room's noise floor.

use super::VadDecision;
use crate::buffering::chunk::AudioChunk;

/// Scale between 16-bit PCM energy units (as used in configuration) and the
/// normalized f32 samples the gate works on.
pub const PCM16_FULL_SCALE: f32 = 32_768.0;

#[derive(Debug, Clone)]
pub struct EnergyGate {
    /// Current RMS threshold on normalized samples.
    threshold: f32,
    /// Fraction of the old threshold kept per second of adaptation.
    damping: f32,
    /// Multiplier applied to ambient RMS to obtain the target threshold.
    ratio: f32,
    /// Whether silence keeps adapting the threshold outside calibration.
    dynamic: bool,
}

impl EnergyGate {
    /// `seed_pcm16` is the starting threshold in 16-bit PCM units (e.g. 1000).
    pub fn new(seed_pcm16: f32, damping: f32, ratio: f32, dynamic: bool) -> Self {
        Self {
            threshold: (seed_pcm16 / PCM16_FULL_SCALE).max(0.0),
            damping: damping.clamp(0.0, 1.0),
            ratio: ratio.max(1.0),
            dynamic,
        }
    }

    /// Current threshold on normalized samples.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Adapt to one block of ambient (non-speech) audio.
    pub fn calibrate(&mut self, chunk: &AudioChunk) {
        self.adapt(rms(&chunk.samples), chunk.duration_secs() as f32);
    }

    pub fn classify(&mut self, chunk: &AudioChunk) -> VadDecision {
        let energy = rms(&chunk.samples);
        if energy > self.threshold {
            VadDecision::Speech
        } else {
            if self.dynamic {
                self.adapt(energy, chunk.duration_secs() as f32);
            }
            VadDecision::Silence
        }
    }

    fn adapt(&mut self, energy: f32, seconds: f32) {
        let damping = self.damping.powf(seconds);
        let target = energy * self.ratio;
        self.threshold = self.threshold * damping + target * (1.0 - damping);
    }
}

impl Default for EnergyGate {
    fn default() -> Self {
        Self::new(1_000.0, 0.15, 1.5, true)
    }
}

/// Root-mean-square of a sample slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn block(amplitude: f32, len: usize) -> AudioChunk {
        AudioChunk::new(vec![amplitude; len], 16_000)
    }

    #[test]
    fn seed_is_converted_from_pcm16_units() {
        let gate = EnergyGate::new(1_000.0, 0.15, 1.5, true);
        assert_relative_eq!(gate.threshold(), 1_000.0 / 32_768.0);
    }

    #[test]
    fn loud_block_is_speech_quiet_block_is_silence() {
        let mut gate = EnergyGate::new(1_000.0, 0.15, 1.5, false);
        assert_eq!(gate.classify(&block(0.5, 1_600)), VadDecision::Speech);
        assert_eq!(gate.classify(&block(0.0, 1_600)), VadDecision::Silence);
    }

    #[test]
    fn calibration_settles_near_ratio_times_ambient() {
        let mut gate = EnergyGate::new(1_000.0, 0.15, 1.5, false);
        // Ten seconds of steady 0.01 RMS hiss.
        for _ in 0..100 {
            gate.calibrate(&block(0.01, 1_600));
        }
        assert_relative_eq!(gate.threshold(), 0.015, epsilon = 1e-4);
    }

    #[test]
    fn static_gate_ignores_silence_for_adaptation() {
        let mut gate = EnergyGate::new(1_000.0, 0.15, 1.5, false);
        let before = gate.threshold();
        gate.classify(&block(0.0, 16_000));
        assert_relative_eq!(gate.threshold(), before);
    }

    #[test]
    fn dynamic_gate_lowers_threshold_during_silence() {
        let mut gate = EnergyGate::new(1_000.0, 0.15, 1.5, true);
        let before = gate.threshold();
        gate.classify(&block(0.0, 16_000));
        assert!(gate.threshold() < before);
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert_relative_eq!(rms(&samples), 0.5, epsilon = 1e-5);
        assert_eq!(rms(&[]), 0.0);
    }
}
