use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompanionError>;

#[derive(Error, Debug)]
pub enum CompanionError {
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Recognizer unavailable: {0}")]
    RecognizerUnavailable(String),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::dispatch::DispatchError),

    #[error("Speech synthesis error: {0}")]
    Synthesis(#[from] crate::tts::SynthesisError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::audio::capture::AudioCaptureError> for CompanionError {
    fn from(e: crate::audio::capture::AudioCaptureError) -> Self {
        CompanionError::Audio(e.to_string())
    }
}

impl From<crate::audio::playback::PlaybackError> for CompanionError {
    fn from(e: crate::audio::playback::PlaybackError) -> Self {
        CompanionError::Audio(e.to_string())
    }
}

impl From<crate::recognizer::RecognizerError> for CompanionError {
    fn from(e: crate::recognizer::RecognizerError) -> Self {
        CompanionError::RecognizerUnavailable(e.to_string())
    }
}
