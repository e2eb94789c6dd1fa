//! Startup configuration: JSON settings file, then environment overrides.
//!
//! Loaded once in `main` and turned into an immutable `AssistantConfig`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anka_core::{AssistantConfig, Phrases};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub wake_word: String,
    pub wake_threshold: f64,
    pub language: String,
    pub language_label: String,
    /// Seconds to wait for a question to start.
    pub recognition_timeout: u64,
    pub webhook_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub tts_model: String,
    pub tts_voice: String,
    pub transcription_model: String,
    pub preferred_input_device: Option<String>,
    pub port: u16,
    pub acknowledgement: String,
    pub unintelligible_reply: String,
    pub dispatch_apology: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        let core = AssistantConfig::default();
        let phrases = Phrases::default();
        Self {
            wake_word: core.wake_phrase,
            wake_threshold: core.wake_threshold,
            language: core.language,
            language_label: core.language_label,
            recognition_timeout: core.question_timeout.as_secs(),
            webhook_url: None,
            openai_api_key: None,
            tts_model: core.tts_model,
            tts_voice: core.tts_voice,
            transcription_model: core.transcription_model,
            preferred_input_device: None,
            port: DEFAULT_PORT,
            acknowledgement: phrases.acknowledgement,
            unintelligible_reply: phrases.unintelligible,
            dispatch_apology: phrases.dispatch_apology,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        self.wake_word = non_blank(&self.wake_word).unwrap_or(defaults.wake_word);
        self.wake_threshold = if self.wake_threshold.is_finite() {
            self.wake_threshold.clamp(0.0, 100.0)
        } else {
            defaults.wake_threshold
        };
        self.language = non_blank(&self.language).unwrap_or(defaults.language);
        self.language_label = non_blank(&self.language_label).unwrap_or(defaults.language_label);
        self.recognition_timeout = self.recognition_timeout.clamp(1, 120);
        self.webhook_url = self.webhook_url.as_deref().and_then(non_blank);
        self.openai_api_key = self.openai_api_key.as_deref().and_then(non_blank);
        self.tts_model = non_blank(&self.tts_model).unwrap_or(defaults.tts_model);
        self.tts_voice = non_blank(&self.tts_voice).unwrap_or(defaults.tts_voice);
        self.transcription_model =
            non_blank(&self.transcription_model).unwrap_or(defaults.transcription_model);
        self.preferred_input_device = self.preferred_input_device.as_deref().and_then(non_blank);
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        self.acknowledgement = non_blank(&self.acknowledgement).unwrap_or(defaults.acknowledgement);
        self.unintelligible_reply =
            non_blank(&self.unintelligible_reply).unwrap_or(defaults.unintelligible_reply);
        self.dispatch_apology = non_blank(&self.dispatch_apology).unwrap_or(defaults.dispatch_apology);
    }

    /// Overlay the environment variables the assistant has always honoured.
    /// `lookup` is `std::env::var(..).ok()` outside tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("WAKE_WORD") {
            self.wake_word = v;
        }
        if let Some(v) = lookup("WAKE_THRESHOLD") {
            match v.trim().parse() {
                Ok(t) => self.wake_threshold = t,
                Err(_) => warn!(value = %v, "ignoring unparsable WAKE_THRESHOLD"),
            }
        }
        if let Some(v) = lookup("N8N_WEBHOOK_URL") {
            self.webhook_url = Some(v);
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.openai_api_key = Some(v);
        }
        if let Some(v) = lookup("LANGUAGE") {
            self.language = v;
        }
        if let Some(v) = lookup("RECOGNITION_TIMEOUT") {
            match v.trim().parse() {
                Ok(t) => self.recognition_timeout = t,
                Err(_) => warn!(value = %v, "ignoring unparsable RECOGNITION_TIMEOUT"),
            }
        }
        if let Some(v) = lookup("ANKA_PORT") {
            match v.trim().parse() {
                Ok(p) => self.port = p,
                Err(_) => warn!(value = %v, "ignoring unparsable ANKA_PORT"),
            }
        }
    }

    pub fn into_assistant_config(self) -> AssistantConfig {
        AssistantConfig {
            wake_phrase: self.wake_word,
            wake_threshold: self.wake_threshold,
            language: self.language,
            language_label: self.language_label,
            question_timeout: Duration::from_secs(self.recognition_timeout),
            webhook_url: self.webhook_url,
            openai_api_key: self.openai_api_key,
            tts_model: self.tts_model,
            tts_voice: self.tts_voice,
            transcription_model: self.transcription_model,
            input_device: self.preferred_input_device,
            phrases: Phrases {
                acknowledgement: self.acknowledgement,
                unintelligible: self.unintelligible_reply,
                dispatch_apology: self.dispatch_apology,
                ..Phrases::default()
            },
            ..AssistantConfig::default()
        }
    }
}

fn non_blank(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn default_settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os("ANKA_SETTINGS") {
        return PathBuf::from(path);
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Anka")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("anka")
            .join("settings.json")
    }
}

/// File (if present and valid), then `lookup` overrides, then normalization.
pub fn load_settings(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "ignoring malformed settings file: {e}");
            AppSettings::default()
        }),
        Err(_) => AppSettings::default(),
    };
    settings.apply_env_overrides(lookup);
    settings.normalize();
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("anka-{}-{name}", std::process::id()));
        fs::write(&path, contents).expect("write temp settings");
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(Path::new("/nonexistent/anka/settings.json"), env(&[]));
        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.wake_word, "anka");
        assert_eq!(settings.recognition_timeout, 10);
    }

    #[test]
    fn file_values_are_read_in_camel_case() {
        let path = temp_file(
            "camel.json",
            r#"{"wakeWord":"Jarvis","wakeThreshold":30,"webhookUrl":" https://hooks.example/q "}"#,
        );
        let settings = load_settings(&path, env(&[]));
        let _ = fs::remove_file(&path);

        assert_eq!(settings.wake_word, "Jarvis");
        assert_eq!(settings.wake_threshold, 30.0);
        assert_eq!(settings.webhook_url.as_deref(), Some("https://hooks.example/q"));
        assert_eq!(settings.language, "sk-SK");
    }

    #[test]
    fn environment_overrides_the_file() {
        let path = temp_file("env.json", r#"{"wakeWord":"jarvis","recognitionTimeout":4}"#);
        let settings = load_settings(
            &path,
            env(&[
                ("WAKE_WORD", "anka"),
                ("RECOGNITION_TIMEOUT", "12"),
                ("N8N_WEBHOOK_URL", "http://localhost:5678/webhook/anka"),
                ("ANKA_PORT", "8080"),
            ]),
        );
        let _ = fs::remove_file(&path);

        assert_eq!(settings.wake_word, "anka");
        assert_eq!(settings.recognition_timeout, 12);
        assert_eq!(settings.port, 8080);
        assert!(settings.webhook_url.is_some());
    }

    #[test]
    fn malformed_values_fall_back() {
        let mut settings = AppSettings::default();
        settings.apply_env_overrides(env(&[
            ("WAKE_THRESHOLD", "very"),
            ("OPENAI_API_KEY", "   "),
            ("LANGUAGE", ""),
        ]));
        settings.wake_threshold = 250.0;
        settings.normalize();

        assert_eq!(settings.wake_threshold, 100.0);
        assert_eq!(settings.openai_api_key, None);
        assert_eq!(settings.language, "sk-SK");
    }

    #[test]
    fn assistant_config_carries_the_settings() {
        let settings = AppSettings {
            wake_word: "anka".into(),
            recognition_timeout: 7,
            dispatch_apology: "Prepáč, služba nie je dostupná.".into(),
            ..AppSettings::default()
        };
        let config = settings.into_assistant_config();
        assert_eq!(config.question_timeout, Duration::from_secs(7));
        assert_eq!(config.phrases.dispatch_apology, "Prepáč, služba nie je dostupná.");
        assert_eq!(config.question_phrase_limit, Duration::from_secs(15));
    }
}
