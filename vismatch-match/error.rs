use crate::config::DistanceMetric;
use thiserror::Error;
use vismatch_core::{DescriptorError, DescriptorKind, DeviceError, ErrorKind, ExecutionTarget};

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("descriptor width mismatch: query rows have {query} columns, train rows {train}")]
    WidthMismatch { query: usize, train: usize },
    #[error("descriptor kind mismatch: query is {query}, train is {train}")]
    KindMismatch {
        query: DescriptorKind,
        train: DescriptorKind,
    },
    #[error("{metric} distance is not defined for {kind} descriptors")]
    MetricMismatch {
        metric: DistanceMetric,
        kind: DescriptorKind,
    },
    #[error("{operation} is not available on {target}")]
    UnsupportedOperation {
        operation: &'static str,
        target: ExecutionTarget,
    },
    #[error("invalid matcher configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

impl MatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MatchError::WidthMismatch { .. }
            | MatchError::KindMismatch { .. }
            | MatchError::MetricMismatch { .. }
            | MatchError::InvalidConfig(_)
            | MatchError::Descriptor(_) => ErrorKind::PreconditionViolation,
            MatchError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            MatchError::Device(e) => e.kind(),
        }
    }
}

pub type MatchResult<T> = Result<T, MatchError>;
