use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Detected interest point. Coordinates are in level-0 image space.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Diameter of the meaningful neighbourhood, in level-0 pixels
    pub size: f32,
    /// Orientation in radians, `[-pi, pi]`
    pub angle: f32,
    pub response: f32,
    /// Pyramid level the point was detected on
    pub octave: u32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            size: 1.0,
            angle: 0.0,
            response: 0.0,
            octave: 0,
        }
    }

    pub fn with_octave(mut self, octave: u32) -> Self {
        self.octave = octave;
        self
    }

    pub fn with_angle(mut self, angle: f32) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_size(mut self, size: f32) -> Self {
        self.size = size;
        self
    }

    pub fn with_response(mut self, response: f32) -> Self {
        self.response = response;
        self
    }
}

/// Correspondence between row `query_idx` of the query set and row
/// `train_idx` of the train set. Smaller distance means more similar.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Match {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

impl Match {
    pub fn new(query_idx: usize, train_idx: usize, distance: f32) -> Self {
        Self {
            query_idx,
            train_idx,
            distance,
        }
    }
}

/// Where an engine runs its algorithms. Fixed at engine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ExecutionTarget {
    #[default]
    Cpu,
    Gpu,
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionTarget::Cpu => write!(f, "CPU"),
            ExecutionTarget::Gpu => write!(f, "GPU"),
        }
    }
}
