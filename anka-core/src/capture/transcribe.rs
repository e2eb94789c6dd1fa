//! Cloud speech-to-text.

use std::time::Duration;

use reqwest::blocking::multipart;
use tracing::{debug, warn};

use crate::{
    buffering::chunk::AudioChunk,
    capture::CaptureOutcome,
    error::{AnkaError, Result},
};

/// Turns captured audio into text.
pub trait Transcriber: Send + Sync {
    /// `language` is a BCP-47 tag such as `sk-SK`.
    ///
    /// Empty results are reported as `Unintelligible`; transport and API
    /// failures as `ServiceError`.
    fn transcribe(
        &self,
        audio: &AudioChunk,
        language: &str,
    ) -> std::result::Result<String, CaptureOutcome>;
}

pub const OPENAI_TRANSCRIPTIONS_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(20);

/// OpenAI-compatible `/audio/transcriptions` client.
pub struct OpenAiTranscriber {
    client: reqwest::blocking::Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::with_url(OPENAI_TRANSCRIPTIONS_URL, api_key, model)
    }

    pub fn with_url(
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(TRANSCRIBE_TIMEOUT)
            .build()
            .map_err(|e| AnkaError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

/// `sk-SK` → `sk`. The transcription API takes ISO-639-1 codes.
pub fn primary_language(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

impl Transcriber for OpenAiTranscriber {
    fn transcribe(
        &self,
        audio: &AudioChunk,
        language: &str,
    ) -> std::result::Result<String, CaptureOutcome> {
        if audio.is_empty() {
            return Err(CaptureOutcome::Unintelligible);
        }

        let wav = audio
            .to_wav_bytes()
            .map_err(|e| CaptureOutcome::ServiceError(format!("wav encode failed: {e}")))?;
        debug!(wav_bytes = wav.len(), "uploading phrase for transcription");

        let file_part = multipart::Part::bytes(wav)
            .file_name("phrase.wav")
            .mime_str("audio/wav")
            .map_err(|e| CaptureOutcome::ServiceError(e.to_string()))?;
        let mut form = multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json")
            .part("file", file_part);
        let lang = primary_language(language);
        if !lang.is_empty() {
            form = form.text("language", lang);
        }

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| {
                warn!(error = %e, "transcription request failed");
                CaptureOutcome::ServiceError(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(%status, body = %body, "transcription API error");
            return Err(CaptureOutcome::ServiceError(format!(
                "transcription API returned {status}"
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .map_err(|e| CaptureOutcome::ServiceError(format!("invalid response: {e}")))?;
        let text = payload
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::trim)
            .unwrap_or_default();
        if text.is_empty() {
            Err(CaptureOutcome::Unintelligible)
        } else {
            Ok(text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_language_strips_region() {
        assert_eq!(primary_language("sk-SK"), "sk");
        assert_eq!(primary_language("en_US"), "en");
        assert_eq!(primary_language("DE"), "de");
        assert_eq!(primary_language(""), "");
    }

    #[test]
    fn empty_audio_is_unintelligible_without_a_request() {
        // Unroutable URL: the call must return before touching the network.
        let transcriber =
            OpenAiTranscriber::with_url("http://127.0.0.1:9/unused", "key", "whisper-1")
                .expect("client");
        let outcome = transcriber.transcribe(&AudioChunk::new(vec![], 16_000), "sk-SK");
        assert_eq!(outcome, Err(CaptureOutcome::Unintelligible));
    }

    fn phrase() -> AudioChunk {
        AudioChunk::new(vec![0.1; 1600], 16_000)
    }

    fn transcriber_for(server: &mockito::Server) -> OpenAiTranscriber {
        OpenAiTranscriber::with_url(
            format!("{}/v1/audio/transcriptions", server.url()),
            "key",
            "whisper-1",
        )
        .expect("client")
    }

    #[test]
    fn uploads_the_phrase_and_returns_trimmed_text() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/audio/transcriptions")
            .match_header("authorization", "Bearer key")
            .match_header(
                "content-type",
                mockito::Matcher::Regex("^multipart/form-data".into()),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"text":" Ahoj "}"#)
            .create();

        let outcome = transcriber_for(&server).transcribe(&phrase(), "sk-SK");

        assert_eq!(outcome, Ok("Ahoj".to_string()));
        mock.assert();
    }

    #[test]
    fn blank_transcript_is_unintelligible() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/audio/transcriptions")
            .with_status(200)
            .with_body(r#"{"text":"   "}"#)
            .create();

        let outcome = transcriber_for(&server).transcribe(&phrase(), "sk-SK");
        assert_eq!(outcome, Err(CaptureOutcome::Unintelligible));
    }

    #[test]
    fn api_error_status_is_a_service_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/audio/transcriptions")
            .with_status(500)
            .with_body("internal server error")
            .create();

        match transcriber_for(&server).transcribe(&phrase(), "sk-SK") {
            Err(CaptureOutcome::ServiceError(detail)) => assert!(detail.contains("500"), "{detail}"),
            other => panic!("expected ServiceError, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_a_service_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/audio/transcriptions")
            .with_status(200)
            .with_body("not json")
            .create();

        assert!(matches!(
            transcriber_for(&server).transcribe(&phrase(), "sk-SK"),
            Err(CaptureOutcome::ServiceError(_))
        ));
    }
}
