use thiserror::Error;

/// All errors produced by anka-core.
#[derive(Debug, Error)]
pub enum AnkaError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("http client error: {0}")]
    HttpClient(String),

    #[error("question is empty")]
    EmptyQuestion,

    #[error("assistant is still stopping: the previous worker has not exited yet")]
    StillStopping,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AnkaError>;
