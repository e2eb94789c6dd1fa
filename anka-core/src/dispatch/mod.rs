//! `ResponseDispatcher`: forwards a question to the remote automation
//! service and normalizes its reply to plain text.
//!
//! ## Reply parsing
//!
//! ```text
//! body ──parse──► Structured(json) ──"message"?──► text
//!        │                  └───────"text"?─────► text
//!        │                  └───── neither ─────► whole body
//!        └──────► Raw(body) ───────────────────► whole body
//! ```

use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{AnkaError, Result};

/// JSON fields that may carry the reply, in priority order.
pub const REPLY_FIELDS: [&str; 2] = ["message", "text"];

/// Default request timeout for the remote service.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a dispatch produced no reply. Callers substitute an apology; these
/// never reach speech output directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchFailure {
    #[error("remote endpoint is not configured")]
    NotConfigured,
    #[error("remote service timed out")]
    Timeout,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("remote service returned HTTP {0}")]
    HttpError(u16),
}

/// Anything that can answer a question.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, question: &str) -> std::result::Result<String, DispatchFailure>;
}

/// Outbound request body.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchPayload {
    /// `"<Wake phrase>, <question>"`.
    pub text: String,
    /// Local time, ISO-8601.
    pub timestamp: String,
    /// Language label understood by the remote flow (e.g. `Slovak`).
    pub language: String,
}

/// Result of the parse step, before field selection.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Structured(serde_json::Value),
    Raw(String),
}

impl ResponseBody {
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Raw(body.to_string()),
        }
    }

    /// Value of the first present field in `REPLY_FIELDS`, else `None`.
    pub fn reply_field(&self) -> Option<String> {
        let Self::Structured(value) = self else {
            return None;
        };
        REPLY_FIELDS.iter().find_map(|field| match value.get(*field)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }
}

/// Plain reply text for a response body: `message`, then `text`, then the
/// body verbatim.
pub fn extract_reply(body: &str) -> String {
    ResponseBody::parse(body)
        .reply_field()
        .unwrap_or_else(|| body.to_string())
}

/// Capitalize the first character (`anka` → `Anka`).
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Blocking HTTP dispatcher.
pub struct ResponseDispatcher {
    client: reqwest::blocking::Client,
    endpoint: Option<String>,
    wake_phrase: String,
    language_label: String,
}

impl ResponseDispatcher {
    /// `endpoint: None` (or blank) makes every dispatch return
    /// `NotConfigured` without touching the network.
    pub fn new(
        endpoint: Option<String>,
        timeout: Duration,
        wake_phrase: impl Into<String>,
        language_label: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnkaError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            wake_phrase: wake_phrase.into(),
            language_label: language_label.into(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn payload(&self, question: &str) -> DispatchPayload {
        DispatchPayload {
            text: format!("{}, {}", capitalize(self.wake_phrase.trim()), question.trim()),
            timestamp: Local::now().to_rfc3339(),
            language: self.language_label.clone(),
        }
    }
}

impl Dispatch for ResponseDispatcher {
    fn dispatch(&self, question: &str) -> std::result::Result<String, DispatchFailure> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            warn!("dispatch skipped: remote endpoint not configured");
            return Err(DispatchFailure::NotConfigured);
        };

        let payload = self.payload(question);
        debug!(endpoint, text = %payload.text, "dispatching question");

        let response = self
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchFailure::Timeout
                } else {
                    DispatchFailure::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "remote service rejected the question");
            return Err(DispatchFailure::HttpError(status.as_u16()));
        }

        let body = response.text().map_err(|e| {
            if e.is_timeout() {
                DispatchFailure::Timeout
            } else {
                DispatchFailure::NetworkError(e.to_string())
            }
        })?;
        info!(status = status.as_u16(), bytes = body.len(), "remote service replied");
        Ok(extract_reply(&body))
    }
}
