use thiserror::Error;
use vismatch_core::{ErrorKind, ImageError};
use vismatch_features::FeatureError;
use vismatch_match::MatchError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("feature extraction failed: {0}")]
    Features(#[from] FeatureError),
    #[error("matching failed: {0}")]
    Matching(#[from] MatchError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
    #[cfg(feature = "serde")]
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "serde")]
    #[error("TOML parse: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[cfg(feature = "serde")]
    #[error("TOML write: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Features(e) => e.kind(),
            PipelineError::Matching(e) => e.kind(),
            PipelineError::Image(e) => e.kind(),
            #[cfg(feature = "serde")]
            PipelineError::Json(_) | PipelineError::TomlParse(_) | PipelineError::TomlWrite(_) => {
                ErrorKind::PreconditionViolation
            }
            PipelineError::InvalidConfig(_) => ErrorKind::PreconditionViolation,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
