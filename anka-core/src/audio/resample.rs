//! Sample-rate conversion for speech clips using a rubato `FastFixedIn`
//! resampler.
//!
//! Synthesized speech arrives at whatever rate the voice produced (24 kHz
//! for the remote voice). When the output device cannot open a stream at
//! that rate, `play_blocking` converts the clip to the device rate first.
//! Equal rates never create a rubato session.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{AnkaError, Result};

/// Input frames per rubato call when converting a whole clip.
pub const CLIP_CHUNK: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when both rates match.
    resampler: Option<FastFixedIn<f32>>,
    /// Partial input chunk carried between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// `[1][output_frames_max]`
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// Returns `AnkaError::AudioDevice` if rubato rejects the rates or chunk
    /// size.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }
        if from_rate == 0 || to_rate == 0 {
            return Err(AnkaError::AudioDevice(format!(
                "resampler init: invalid rates {from_rate} -> {to_rate}"
            )));
        }

        let ratio = f64::from(to_rate) / f64::from(from_rate);
        let resampler =
            FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
                .map_err(|e| AnkaError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        debug!(from_rate, to_rate, chunk_size, max_out, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
        })
    }

    /// Feed samples and return whatever full chunks produced (may be empty).
    /// A remainder shorter than `chunk_size` waits for the next call or for
    /// [`RateConverter::flush`].
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Zero-pad and convert any buffered remainder.
    pub fn flush(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.input_buf.is_empty() {
            self.input_buf.clear();
            return Vec::new();
        }
        let padding = self.chunk_size - self.input_buf.len();
        self.process(&vec![0.0; padding])
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert a complete clip. The result is trimmed to the clip's duration at
/// the new rate so the zero-padded tail does not lengthen playback.
pub fn convert_clip(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut converter = RateConverter::new(from_rate, to_rate, CLIP_CHUNK)?;
    let mut out = converter.process(samples);
    out.extend(converter.flush());

    let expected = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    out.truncate(expected);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rates_pass_the_clip_through() {
        let mut rc = RateConverter::new(24_000, 24_000, CLIP_CHUNK).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
        assert!(rc.flush().is_empty());
        assert_eq!(convert_clip(&samples, 24_000, 24_000).unwrap(), samples);
    }

    #[test]
    fn downsampling_a_chunk_scales_its_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(!rc.is_passthrough());
        let out = rc.process(&[0.0f32; 960]);
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={}",
            out.len()
        );
    }

    #[test]
    fn partial_chunks_wait_until_full() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&[0.0f32; 500]).is_empty());
        assert!(!rc.process(&[0.0f32; 500]).is_empty());
    }

    #[test]
    fn flush_converts_the_buffered_remainder() {
        let mut rc = RateConverter::new(24_000, 48_000, 1024).unwrap();
        assert!(rc.process(&[0.2f32; 100]).is_empty());
        let tail = rc.flush();
        assert!(!tail.is_empty());
        assert!(rc.flush().is_empty());
    }

    #[test]
    fn whole_clip_keeps_its_duration() {
        let clip = vec![0.0f32; 24_000];
        assert_eq!(convert_clip(&clip, 24_000, 48_000).unwrap().len(), 48_000);
        assert_eq!(convert_clip(&clip, 24_000, 16_000).unwrap().len(), 16_000);
        // 1000 samples is shorter than one chunk; the padded flush covers it.
        assert_eq!(convert_clip(&[0.1f32; 1000], 24_000, 48_000).unwrap().len(), 2000);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            RateConverter::new(0, 48_000, CLIP_CHUNK),
            Err(AnkaError::AudioDevice(_))
        ));
    }
}
