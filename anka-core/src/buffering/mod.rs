//! Lock-free SPSC ring buffer between the microphone callback and the listener.
//!
//! Uses `ringbuf::HeapRb<f32>` whose `push_slice` is wait-free, so the cpal
//! input callback never blocks on the listening thread.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the audio callback.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the listening thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// 2^20 samples ≈ 21.8 s at 48 kHz. The listener drains continuously, so
/// this only has to absorb scheduling hiccups, not whole phrases.
pub const MIC_RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair for one microphone session.
pub fn create_mic_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(MIC_RING_CAPACITY).split()
}
