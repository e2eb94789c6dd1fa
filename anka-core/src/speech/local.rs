//! Offline voice: the platform's own speech command, run to completion.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{SynthesisBackend, SynthesisError};
use crate::capture::transcribe::primary_language;

const POLL: Duration = Duration::from_millis(50);
/// Floor on how long a single utterance may take.
const BASE_TIMEOUT: Duration = Duration::from_secs(10);
/// Added per character of text on top of `BASE_TIMEOUT`.
const PER_CHAR: Duration = Duration::from_millis(120);

/// Environment variable carrying the text to PowerShell.
const TEXT_ENV: &str = "ANKA_SAY_TEXT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextDelivery {
    LastArgument,
    Environment,
}

#[derive(Debug, Clone)]
pub struct LocalVoice {
    name: String,
    program: String,
    args: Vec<String>,
    delivery: TextDelivery,
    timeout: Option<Duration>,
}

impl LocalVoice {
    /// `program args... -- <text>`. The `--` keeps a reply that starts
    /// with a dash from being read as an option.
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            delivery: TextDelivery::LastArgument,
            timeout: None,
        }
    }

    /// Fixed upper bound instead of the length-scaled default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// First speech command found on this machine, if any.
    pub fn platform_default(language: &str) -> Option<Self> {
        let voice = primary_language(language);
        for program in ["espeak-ng", "espeak"] {
            if which::which(program).is_ok() {
                return Some(Self::new(
                    program,
                    program,
                    vec!["-v".to_string(), voice.clone()],
                ));
            }
        }
        if cfg!(target_os = "macos") && which::which("say").is_ok() {
            return Some(Self::new("say", "say", Vec::new()));
        }
        if cfg!(windows) && which::which("powershell").is_ok() {
            let script = format!(
                "Add-Type -AssemblyName System.Speech; \
                 (New-Object System.Speech.Synthesis.SpeechSynthesizer).Speak($env:{TEXT_ENV})"
            );
            let mut voice = Self::new(
                "powershell",
                "powershell",
                vec!["-NoProfile".into(), "-Command".into(), script],
            );
            voice.delivery = TextDelivery::Environment;
            return Some(voice);
        }
        warn!("no local speech command found");
        None
    }

    fn budget(&self, text: &str) -> Duration {
        self.timeout.unwrap_or_else(|| {
            let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
            BASE_TIMEOUT.saturating_add(PER_CHAR.saturating_mul(chars))
        })
    }
}

impl SynthesisBackend for LocalVoice {
    fn name(&self) -> &str {
        &self.name
    }

    fn synthesize_and_play(&self, text: &str) -> Result<(), SynthesisError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match self.delivery {
            TextDelivery::LastArgument => {
                command.arg("--").arg(text);
            }
            TextDelivery::Environment => {
                command.env(TEXT_ENV, text);
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| SynthesisError::Unavailable(format!("{}: {e}", self.program)))?;

        let deadline = Instant::now() + self.budget(text);
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => {
                    debug!(voice = %self.name, "local speech finished");
                    return Ok(());
                }
                Ok(Some(status)) => {
                    return Err(SynthesisError::Synthesis(format!(
                        "{} exited with {status}",
                        self.program
                    )));
                }
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SynthesisError::Playback(format!(
                        "{} did not finish in time",
                        self.program
                    )));
                }
                Ok(None) => std::thread::sleep(POLL),
                Err(e) => return Err(SynthesisError::Playback(e.to_string())),
            }
        }
    }
}
