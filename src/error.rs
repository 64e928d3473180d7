use std::path::PathBuf;

use thiserror::Error;

/// How a failure should be handled by whoever drives the visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Skip the current tick and try again on the next one.
    Transient,
    /// Setup or state is broken; stop and report.
    Fatal,
}

#[derive(Debug, Error)]
pub enum SpectralError {
    #[error("no audio output device available")]
    NoOutputDevice,
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to load sound {path:?}: {source}")]
    SoundLoad {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
    #[error("invalid sound data: {0}")]
    InvalidSound(String),
    #[error("invalid effect parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unsupported pixel format: {0} bytes per pixel")]
    PixelFormat(u8),
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
    #[error("analysis data unusable: {0}")]
    Analysis(String),
    #[error("timer thread not started: {0}")]
    Timer(String),
    #[error("window error: {0}")]
    Window(String),
}

impl SpectralError {
    pub fn severity(&self) -> Severity {
        match self {
            SpectralError::Analysis(_) => Severity::Transient,
            _ => Severity::Fatal,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.severity() == Severity::Transient
    }
}

pub type Result<T, E = SpectralError> = std::result::Result<T, E>;
