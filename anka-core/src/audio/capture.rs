//! Microphone input stream.

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, SampleFormat, SizedSample, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::{
    buffering::AudioProducer,
    error::{AnkaError, Result},
};

/// Handle to an open microphone. Mono f32 frames flow into the producer
/// handed to `open` until this value is dropped, which releases the device.
///
/// **Not `Send`**: create and drop it on the same OS thread.
pub struct MicStream {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

impl MicStream {
    /// Open the input device named `preferred_device`, falling back to the
    /// default input device and then the first available one.
    #[cfg(feature = "audio-cpal")]
    pub fn open(producer: AudioProducer, preferred_device: Option<&str>) -> Result<Self> {
        let device = select_input_device(preferred_device)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| AnkaError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let config: StreamConfig = supported.config();

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_mono_input::<f32>(&device, &config, producer),
            SampleFormat::I16 => build_mono_input::<i16>(&device, &config, producer),
            SampleFormat::U16 => build_mono_input::<u16>(&device, &config, producer),
            SampleFormat::U8 => build_mono_input::<u8>(&device, &config, producer),
            fmt => {
                return Err(AnkaError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| AnkaError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AnkaError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(_producer: AudioProducer, _preferred_device: Option<&str>) -> Result<Self> {
        Err(AnkaError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(feature = "audio-cpal")]
fn select_input_device(preferred: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(preferred_name) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) = devices.find(|d| {
                    d.name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                }) {
                    return Ok(device);
                }
                warn!(
                    "preferred input device '{}' not found, falling back",
                    preferred_name
                );
            }
            Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }

    let mut devices = host
        .input_devices()
        .map_err(|e| AnkaError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(AnkaError::NoDefaultInputDevice)?;
    warn!("no default input device, falling back to first available input");
    Ok(fallback)
}

/// Build an input stream that mixes every frame down to mono f32.
#[cfg(feature = "audio-cpal")]
fn build_mono_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let mut mix: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _info: &cpal::InputCallbackInfo| {
            mix.clear();
            mix.extend(data.chunks_exact(channels).map(|frame| {
                let sum: f32 = frame
                    .iter()
                    .map(|&s| <f32 as FromSample<T>>::from_sample_(s))
                    .sum();
                sum / channels as f32
            }));
            let written = producer.push_slice(&mix);
            if written < mix.len() {
                warn!("microphone ring full: dropped {} frames", mix.len() - written);
            }
        },
        |err| error!("microphone stream error: {err}"),
        None,
    )
}
