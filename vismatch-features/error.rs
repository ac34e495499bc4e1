use std::fmt;
use thiserror::Error;
use vismatch_core::{DescriptorError, DeviceError, ErrorKind, ExecutionTarget, ImageError};

/// Call shape requested from a feature algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Detect,
    Compute,
    DetectAndCompute,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Detect => write!(f, "detect"),
            Operation::Compute => write!(f, "compute"),
            Operation::DetectAndCompute => write!(f, "detect-and-compute"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("{algorithm} does not support {operation} on {target}")]
    UnsupportedOperation {
        algorithm: &'static str,
        operation: Operation,
        target: ExecutionTarget,
    },
    #[error("{algorithm} {operation} kernel requires {expected}-channel input, got {actual}")]
    UnsupportedChannels {
        algorithm: &'static str,
        operation: Operation,
        expected: usize,
        actual: usize,
    },
    #[error("image {width}x{height} too small for {algorithm} (minimum {min_size}x{min_size})")]
    ImageTooSmall {
        algorithm: &'static str,
        width: usize,
        height: usize,
        min_size: usize,
    },
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("{algorithm} produced {rows} descriptor rows for {keypoints} keypoints")]
    RowCountMismatch {
        algorithm: &'static str,
        keypoints: usize,
        rows: usize,
    },
    #[error("{algorithm} panicked during {operation}: {message}")]
    Panicked {
        algorithm: &'static str,
        operation: Operation,
        message: String,
    },
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

impl FeatureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeatureError::UnsupportedOperation { .. } | FeatureError::UnsupportedChannels { .. } => {
                ErrorKind::UnsupportedOperation
            }
            FeatureError::ImageTooSmall { .. }
            | FeatureError::InvalidParameter { .. }
            | FeatureError::Image(_)
            | FeatureError::Descriptor(_) => ErrorKind::PreconditionViolation,
            FeatureError::RowCountMismatch { .. } | FeatureError::Panicked { .. } => {
                ErrorKind::Internal
            }
            FeatureError::Device(e) => e.kind(),
        }
    }

    /// Only capability mismatches may be retried through another call shape.
    pub fn is_fallback_eligible(&self) -> bool {
        self.kind() == ErrorKind::UnsupportedOperation
    }

    pub(crate) fn unsupported(
        algorithm: &'static str,
        operation: Operation,
        target: ExecutionTarget,
    ) -> Self {
        FeatureError::UnsupportedOperation {
            algorithm,
            operation,
            target,
        }
    }
}

pub type FeatureResult<T> = Result<T, FeatureError>;
