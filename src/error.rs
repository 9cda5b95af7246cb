use thiserror::Error;

/// Failure modes of the processing pipeline. None of these abort the whole
/// run: each stage degrades its result set and hands the rest downstream.
#[derive(Error, Debug)]
pub enum Error {
    #[error("insufficient data: needed {needed} samples, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("PRN {0}: acquisition peak below threshold")]
    AcquisitionFailed(u8),

    #[error("channel {0}: no parity-valid preamble found")]
    PreambleNotFound(usize),

    #[error("PRN {0}: ephemeris incomplete or satellite unhealthy")]
    EphemerisIncomplete(u8),

    #[error("rank-deficient geometry: {0} usable satellites")]
    RankDeficient(usize),

    #[error("record too short for navigation: {0} ms")]
    RecordTooShort(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
