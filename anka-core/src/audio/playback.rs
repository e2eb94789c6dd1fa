//! Blocking playback of synthesized speech on the default output device.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{debug, error, warn};

#[cfg(feature = "audio-cpal")]
use super::resample::convert_clip;

use crate::error::{AnkaError, Result};

/// Interval between "is still playing" checks.
pub const PLAYBACK_POLL: Duration = Duration::from_millis(50);

/// Extra time allowed beyond the clip's nominal length before giving up.
#[cfg(feature = "audio-cpal")]
const PLAYBACK_GRACE: Duration = Duration::from_secs(2);

/// Lets the device drain its last buffer before the stream is dropped.
#[cfg(feature = "audio-cpal")]
const TAIL_FLUSH: Duration = Duration::from_millis(100);

/// Shared read position over an immutable clip. The output callback advances
/// it; the playing thread polls `is_playing`.
#[derive(Clone)]
pub struct PlaybackCursor {
    samples: Arc<Vec<f32>>,
    position: Arc<AtomicUsize>,
}

impl PlaybackCursor {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples: Arc::new(samples),
            position: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Next sample, or silence once the clip is exhausted.
    pub fn next_sample(&self) -> f32 {
        let pos = self.position.load(Ordering::Acquire);
        match self.samples.get(pos) {
            Some(&s) => {
                self.position.store(pos + 1, Ordering::Release);
                s
            }
            None => 0.0,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.position.load(Ordering::Acquire) < self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Play a mono clip and block until it has been handed to the device.
#[cfg(feature = "audio-cpal")]
pub fn play_blocking(samples: &[f32], sample_rate: u32) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AnkaError::NoDefaultOutputDevice)?;
    let (config, format) = choose_output_config(&device, sample_rate)?;
    let device_rate = config.sample_rate.0;

    let clip = if device_rate == sample_rate {
        samples.to_vec()
    } else {
        debug!(from = sample_rate, to = device_rate, "converting clip to device rate");
        convert_clip(samples, sample_rate, device_rate)?
    };
    let cursor = PlaybackCursor::new(clip);
    let stream = match format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, cursor.clone()),
        SampleFormat::I16 => build_output::<i16>(&device, &config, cursor.clone()),
        SampleFormat::U16 => build_output::<u16>(&device, &config, cursor.clone()),
        fmt => {
            return Err(AnkaError::AudioStream(format!(
                "unsupported output sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| AnkaError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AnkaError::AudioStream(e.to_string()))?;

    let nominal = Duration::from_secs_f64(cursor.len() as f64 / f64::from(device_rate));
    let deadline = std::time::Instant::now() + nominal + PLAYBACK_GRACE;
    while cursor.is_playing() {
        if std::time::Instant::now() >= deadline {
            warn!("playback did not finish before its deadline");
            break;
        }
        std::thread::sleep(PLAYBACK_POLL);
    }
    std::thread::sleep(TAIL_FLUSH);

    drop(stream);
    debug!(samples = cursor.len(), device_rate, "playback complete");
    Ok(())
}

#[cfg(not(feature = "audio-cpal"))]
pub fn play_blocking(_samples: &[f32], _sample_rate: u32) -> Result<()> {
    Err(AnkaError::AudioStream(
        "compiled without audio-cpal feature".into(),
    ))
}

/// Prefer a mono/stereo config that runs at the clip's own rate; otherwise
/// use the device default and let `convert_clip` bridge the gap.
#[cfg(feature = "audio-cpal")]
fn choose_output_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<(StreamConfig, SampleFormat)> {
    let native = device.supported_output_configs().ok().and_then(|mut ranges| {
        ranges.find(|c| {
            c.channels() <= 2
                && matches!(
                    c.sample_format(),
                    SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
                )
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
    });
    if let Some(range) = native {
        let supported = range.with_sample_rate(SampleRate(sample_rate));
        return Ok((supported.config(), supported.sample_format()));
    }

    let supported = device
        .default_output_config()
        .map_err(|e| AnkaError::AudioDevice(e.to_string()))?;
    Ok((supported.config(), supported.sample_format()))
}

#[cfg(feature = "audio-cpal")]
fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    cursor: PlaybackCursor,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));
    device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels) {
                let value = <T as FromSample<f32>>::from_sample_(cursor.next_sample());
                for out in frame.iter_mut() {
                    *out = value;
                }
            }
        },
        |err| error!("playback stream error: {err}"),
        None,
    )
}
