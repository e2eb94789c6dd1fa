//! Speech/silence classification for the microphone listener.
//!
//! Only an energy gate is provided: the listener needs "has a phrase started"
//! and "has it ended", not speech/noise discrimination.

pub mod energy;

pub use energy::EnergyGate;

/// Whether a given audio block contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// The block's energy is above the current threshold.
    Speech,
    /// The block is at or below the threshold.
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}
