use crate::config::AlgorithmVariant;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value could not be parsed into its declared type
    #[error("{variant}: cannot parse `{key}` = {value:?} as {expected}")]
    ConfigParse {
        variant: AlgorithmVariant,
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    /// The variant is not compiled into this build or cannot be constructed
    #[error("{variant} is not available: {reason}")]
    UnsupportedVariant {
        variant: AlgorithmVariant,
        reason: String,
    },

    /// The engine rejected its resolved parameters
    #[error("invalid {variant} parameters: {reason}")]
    InvalidParameters {
        variant: AlgorithmVariant,
        reason: String,
    },

    /// Internal engine failure while processing a frame
    #[error("engine failure: {0}")]
    Engine(String),
}

impl Error {
    /// Whether the model factory should answer this error with a fallback
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedVariant { .. } | Error::InvalidParameters { .. }
        )
    }
}
