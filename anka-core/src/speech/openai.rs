//! Cloud voice: OpenAI `/audio/speech`, played on the default output device.

use std::io::Cursor;
use std::time::Duration;

use hound::{SampleFormat, WavReader};
use tracing::debug;

use super::{SynthesisBackend, SynthesisError};
use crate::{
    audio,
    error::{AnkaError, Result},
};

pub const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";
const SPEECH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct OpenAiVoice {
    client: reqwest::blocking::Client,
    url: String,
    api_key: String,
    model: String,
    voice: String,
}

#[derive(serde::Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

impl OpenAiVoice {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Result<Self> {
        Self::with_url(OPENAI_SPEECH_URL, api_key, model, voice)
    }

    pub fn with_url(
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(SPEECH_TIMEOUT)
            .build()
            .map_err(|e| AnkaError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
        })
    }

    /// Fetch the WAV rendering of `text`.
    fn fetch(&self, text: &str) -> std::result::Result<Vec<u8>, SynthesisError> {
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "wav",
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| SynthesisError::Synthesis(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SynthesisError::Synthesis(format!(
                "speech API returned {status}: {body}"
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|e| SynthesisError::Synthesis(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl SynthesisBackend for OpenAiVoice {
    fn name(&self) -> &str {
        "openai"
    }

    fn synthesize_and_play(&self, text: &str) -> std::result::Result<(), SynthesisError> {
        let wav = self.fetch(text)?;
        let (samples, rate) = decode_wav(&wav)?;
        debug!(samples = samples.len(), rate, "speech clip received");
        audio::play_blocking(&samples, rate).map_err(|e| SynthesisError::Playback(e.to_string()))
    }
}

/// Decode a WAV clip to mono `f32` samples in `[-1, 1]`.
///
/// Streamed WAV responses carry placeholder chunk sizes, so samples are read
/// until the reader stops yielding rather than trusting the header length.
pub fn decode_wav(bytes: &[u8]) -> std::result::Result<(Vec<f32>, u32), SynthesisError> {
    let reader =
        WavReader::new(Cursor::new(bytes)).map_err(|e| SynthesisError::Playback(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .map_while(std::result::Result::ok)
            .collect(),
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map_while(std::result::Result::ok)
                .map(|s| s as f32 / scale)
                .collect()
        }
    };

    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };
    Ok((mono, spec.sample_rate))
}
