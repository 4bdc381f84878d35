use thiserror::Error;

pub type Result<T> = std::result::Result<T, SynthError>;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("patch has no envelope effect")]
    MissingEnvelope,
    #[error("patch has {0} envelope effects, expected exactly one")]
    MultipleEnvelopes(usize),
    #[error("Invalid Patch Error: {0}")]
    InvalidPatch(String),
    #[error("Invalid Instrument Error: {0}")]
    InvalidInstrument(String),
    #[error("Config Error: {0}")]
    Config(String),
    #[error("Audio Error: {0}")]
    AudioError(String),
    #[error("wav encoding failed: {0}")]
    Wav(#[from] hound::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
