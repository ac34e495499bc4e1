use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Coarse failure taxonomy shared by every public operation.
///
/// Degenerate input (no keypoints, no descriptors) is not part of the
/// taxonomy: it yields empty results instead of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ErrorKind {
    /// The configured algorithm or execution target lacks the requested call shape.
    UnsupportedOperation,
    /// The input does not meet a structural requirement.
    PreconditionViolation,
    /// A provider or device kernel failed internally (panic, lost device).
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnsupportedOperation => write!(f, "unsupported operation"),
            ErrorKind::PreconditionViolation => write!(f, "precondition violation"),
            ErrorKind::Internal => write!(f, "internal failure"),
        }
    }
}
