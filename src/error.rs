use std::fmt;

impl std::error::Error for SynthError {}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthError {
    UnknownNote(String),
    UnknownInstrument(String),
    InvalidNote(String),
    ParseError(String),
    FileError(String),
    AudioError(String),
}

impl fmt::Display for SynthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SynthError::UnknownNote(name) => write!(f, "Unknown note: {}", name),
            SynthError::UnknownInstrument(name) => write!(f, "Unknown instrument: {}", name),
            SynthError::InvalidNote(msg) => write!(f, "Invalid note: {}", msg),
            SynthError::ParseError(msg) => write!(f, "Parsing Error: {}", msg),
            SynthError::FileError(msg) => write!(f, "File Error: {}", msg),
            SynthError::AudioError(msg) => write!(f, "Audio Error: {}", msg),
        }
    }
}

impl From<std::io::Error> for SynthError {
    fn from(e: std::io::Error) -> Self {
        SynthError::FileError(e.to_string())
    }
}

impl From<serde_json::Error> for SynthError {
    fn from(e: serde_json::Error) -> Self {
        SynthError::ParseError(e.to_string())
    }
}

impl SynthError {
    /// Validation errors are caught before anything reaches the scheduler.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SynthError::UnknownNote(_)
                | SynthError::UnknownInstrument(_)
                | SynthError::InvalidNote(_)
                | SynthError::ParseError(_)
        )
    }
}
