//! Audio devices via the cpal backend.
//!
//! # Design constraints
//!
//! cpal callbacks run on an OS audio thread. They must not block on a mutex
//! or perform I/O, so capture pushes into an SPSC ring buffer and playback
//! reads from an immutable sample vector behind an atomic cursor.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Streams are therefore opened and dropped inside a single blocking
//! call (`calibrate`, `listen`, `play_blocking`) on the calling thread.

pub mod capture;
pub mod playback;
pub mod resample;

pub use capture::MicStream;
pub use playback::{play_blocking, PlaybackCursor};
pub use resample::{convert_clip, RateConverter};
