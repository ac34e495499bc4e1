use crate::error::{MatchError, MatchResult};
use std::fmt;
use vismatch_core::{DescriptorKind, DeviceConfig, ExecutionTarget};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Distance between two descriptor rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DistanceMetric {
    /// Sum of absolute differences
    L1,
    /// Euclidean distance
    #[default]
    L2,
    /// Number of differing bits
    Hamming,
    /// Number of differing 2-bit cells
    Hamming2,
}

impl DistanceMetric {
    /// L1 and L2 treat binary bytes as unsigned integers; the Hamming
    /// variants only apply to binary rows.
    pub fn supports(self, kind: DescriptorKind) -> bool {
        match self {
            DistanceMetric::L1 | DistanceMetric::L2 => true,
            DistanceMetric::Hamming | DistanceMetric::Hamming2 => kind == DescriptorKind::Binary,
        }
    }

    /// Conventional metric for a descriptor kind
    pub fn for_kind(kind: DescriptorKind) -> Self {
        match kind {
            DescriptorKind::Binary => DistanceMetric::Hamming,
            DescriptorKind::Float => DistanceMetric::L2,
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::L1 => write!(f, "L1"),
            DistanceMetric::L2 => write!(f, "L2"),
            DistanceMetric::Hamming => write!(f, "Hamming"),
            DistanceMetric::Hamming2 => write!(f, "Hamming2"),
        }
    }
}

/// How candidate train rows are searched on the CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SearchMode {
    /// Compare every query row with every train row
    #[default]
    BruteForce,
    /// Index the train rows in a KD-tree. L2 only; rows of a width without
    /// a tree layout are searched exhaustively.
    KdTree,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::BruteForce => write!(f, "brute force"),
            SearchMode::KdTree => write!(f, "KD-tree"),
        }
    }
}

/// Matcher settings, fixed for the lifetime of a `MatchEngine`
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MatcherConfig {
    pub metric: DistanceMetric,
    /// Keep only mutual nearest neighbours
    pub cross_check: bool,
    pub search: SearchMode,
    pub target: ExecutionTarget,
    /// Only consulted when `target` is GPU
    pub device: DeviceConfig,
}

impl MatcherConfig {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            ..Self::default()
        }
    }

    /// Hamming matching for binary descriptors
    pub fn binary() -> Self {
        Self::new(DistanceMetric::Hamming)
    }

    pub fn with_cross_check(mut self, cross_check: bool) -> Self {
        self.cross_check = cross_check;
        self
    }

    pub fn with_search(mut self, search: SearchMode) -> Self {
        self.search = search;
        self
    }

    pub fn with_target(mut self, target: ExecutionTarget) -> Self {
        self.target = target;
        self
    }

    pub fn on_gpu(self) -> Self {
        self.with_target(ExecutionTarget::Gpu)
    }

    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    pub fn validate(&self) -> MatchResult<()> {
        if self.target == ExecutionTarget::Gpu && self.device.threads == 0 {
            return Err(MatchError::InvalidConfig(
                "GPU target needs at least one device worker".to_string(),
            ));
        }
        if self.search == SearchMode::KdTree {
            if self.target == ExecutionTarget::Gpu {
                return Err(MatchError::InvalidConfig(
                    "KD-tree search runs on the CPU only".to_string(),
                ));
            }
            if self.metric != DistanceMetric::L2 {
                return Err(MatchError::InvalidConfig(format!(
                    "KD-tree search needs the L2 metric, not {}",
                    self.metric
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MatcherConfig::default();
        assert_eq!(config.metric, DistanceMetric::L2);
        assert!(!config.cross_check);
        assert_eq!(config.search, SearchMode::BruteForce);
        assert_eq!(config.target, ExecutionTarget::Cpu);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hamming_needs_binary() {
        assert!(DistanceMetric::Hamming.supports(DescriptorKind::Binary));
        assert!(!DistanceMetric::Hamming2.supports(DescriptorKind::Float));
        assert!(DistanceMetric::L1.supports(DescriptorKind::Binary));
    }

    #[test]
    fn test_gpu_without_workers_rejected() {
        let config = MatcherConfig::default().on_gpu().with_device(DeviceConfig {
            name: "none".to_string(),
            threads: 0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_kd_tree_needs_cpu_and_l2() {
        assert!(MatcherConfig::default().with_search(SearchMode::KdTree).validate().is_ok());

        let binary = MatcherConfig::binary().with_search(SearchMode::KdTree);
        assert!(matches!(binary.validate(), Err(MatchError::InvalidConfig(_))));

        let gpu = MatcherConfig::default().with_search(SearchMode::KdTree).on_gpu();
        assert!(matches!(gpu.validate(), Err(MatchError::InvalidConfig(_))));
    }
}
