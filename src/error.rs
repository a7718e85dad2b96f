use crate::schema::Period;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("Unrecognized question: {0}")]
    UnrecognizedIntent(String),

    #[error("No period could be resolved for question: {0}")]
    NoPeriodResolved(String),

    #[error("Missing FX rate for {currency} in {period}")]
    MissingFxRate { currency: String, period: Period },

    #[error("No data for period {0}")]
    NoDataForPeriod(Period),

    #[error("Division undefined: {0}")]
    DivisionUndefined(String),

    #[error("Invalid {set} record #{index}: {details}")]
    InvalidRecord {
        set: String,
        index: usize,
        details: String,
    },

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CopilotError>;
