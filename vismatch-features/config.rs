use crate::error::{FeatureError, FeatureResult};
use std::fmt;
use vismatch_core::{DescriptorKind, DeviceConfig, ExecutionTarget};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Call shapes an algorithm offers on one execution target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub detect: bool,
    pub compute: bool,
    pub detect_and_compute: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        detect: false,
        compute: false,
        detect_and_compute: false,
    };
    pub const EXTRACTOR: Capabilities = Capabilities {
        detect: true,
        compute: false,
        detect_and_compute: false,
    };
    pub const DESCRIPTOR: Capabilities = Capabilities {
        detect: false,
        compute: true,
        detect_and_compute: false,
    };
    pub const FULL: Capabilities = Capabilities {
        detect: true,
        compute: true,
        detect_and_compute: true,
    };
}

/// Closed set of supported extraction/description algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Algorithm {
    /// Oriented FAST corners with steered BRIEF, 32-byte binary descriptors
    Orb,
    /// Multi-scale Harris corners with a 128-D gradient orientation histogram
    Gradient,
    /// FAST-9 corners only
    Fast,
    /// Harris corners only
    Harris,
    /// Steered BRIEF descriptor only
    Brief,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Orb,
        Algorithm::Gradient,
        Algorithm::Fast,
        Algorithm::Harris,
        Algorithm::Brief,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Orb => "ORB",
            Algorithm::Gradient => "Gradient",
            Algorithm::Fast => "FAST",
            Algorithm::Harris => "Harris",
            Algorithm::Brief => "BRIEF",
        }
    }

    pub fn capabilities(self, target: ExecutionTarget) -> Capabilities {
        match (self, target) {
            (Algorithm::Orb | Algorithm::Gradient, ExecutionTarget::Cpu) => Capabilities::FULL,
            (Algorithm::Fast | Algorithm::Harris, ExecutionTarget::Cpu) => Capabilities::EXTRACTOR,
            (Algorithm::Brief, ExecutionTarget::Cpu) => Capabilities::DESCRIPTOR,
            // the ORB device kernels cannot describe externally supplied keypoints
            (Algorithm::Orb, ExecutionTarget::Gpu) => Capabilities {
                detect: true,
                compute: false,
                detect_and_compute: true,
            },
            (Algorithm::Gradient, ExecutionTarget::Gpu) => Capabilities::FULL,
            (Algorithm::Fast, ExecutionTarget::Gpu) => Capabilities::EXTRACTOR,
            (Algorithm::Harris | Algorithm::Brief, ExecutionTarget::Gpu) => Capabilities::NONE,
        }
    }

    /// Element kind and row width of the descriptors this algorithm computes
    pub fn descriptor_layout(self) -> Option<(DescriptorKind, usize)> {
        match self {
            Algorithm::Orb | Algorithm::Brief => {
                Some((DescriptorKind::Binary, crate::brief::BRIEF_BYTES))
            }
            Algorithm::Gradient => Some((DescriptorKind::Float, crate::gradient::GRADIENT_DIMS)),
            Algorithm::Fast | Algorithm::Harris => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tuning shared by every algorithm
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FeatureParams {
    /// Upper bound on keypoints kept per image, strongest first
    pub max_features: usize,
    /// FAST intensity threshold (1-127)
    pub fast_threshold: u8,
    /// Odd side length of the orientation/description patch
    pub patch_size: usize,
    /// Pyramid levels to search
    pub n_levels: usize,
    /// Downscale between consecutive pyramid levels
    pub scale_factor: f32,
    /// Minimum distance between kept keypoints on one level
    pub nms_distance: f32,
    /// Harris sensitivity `k` in `det(M) - k * trace(M)^2`
    pub harris_k: f32,
    /// Harris responses below `quality * max_response` are discarded
    pub harris_quality: f32,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            max_features: 500,
            fast_threshold: 20,
            patch_size: 31,
            n_levels: 8,
            scale_factor: 1.2,
            nms_distance: 3.0,
            harris_k: 0.04,
            harris_quality: 0.01,
        }
    }
}

impl FeatureParams {
    /// Few strong features, single scale
    pub fn fast_preset() -> Self {
        Self {
            max_features: 250,
            fast_threshold: 30,
            patch_size: 15,
            n_levels: 1,
            nms_distance: 5.0,
            ..Self::default()
        }
    }

    /// Dense multi-scale features
    pub fn quality_preset() -> Self {
        Self {
            max_features: 2000,
            fast_threshold: 12,
            patch_size: 31,
            n_levels: 8,
            scale_factor: 1.2,
            nms_distance: 2.0,
            harris_quality: 0.005,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> FeatureResult<()> {
        fn invalid(name: &'static str, reason: impl Into<String>) -> FeatureResult<()> {
            Err(FeatureError::InvalidParameter {
                name,
                reason: reason.into(),
            })
        }

        if self.fast_threshold == 0 || self.fast_threshold > 127 {
            return invalid(
                "fast_threshold",
                format!("{} (must be 1-127)", self.fast_threshold),
            );
        }
        if self.patch_size < 7 || self.patch_size % 2 == 0 {
            return invalid(
                "patch_size",
                format!("{} (must be odd and >= 7)", self.patch_size),
            );
        }
        if self.n_levels == 0 || self.n_levels > 16 {
            return invalid("n_levels", format!("{} (must be 1-16)", self.n_levels));
        }
        if !(self.scale_factor > 1.0 && self.scale_factor.is_finite()) {
            return invalid(
                "scale_factor",
                format!("{} (must be finite and > 1)", self.scale_factor),
            );
        }
        if !(self.nms_distance >= 0.0 && self.nms_distance.is_finite()) {
            return invalid(
                "nms_distance",
                format!("{} (must be finite and >= 0)", self.nms_distance),
            );
        }
        if !(self.harris_quality > 0.0 && self.harris_quality <= 1.0) {
            return invalid(
                "harris_quality",
                format!("{} (must be in (0, 1])", self.harris_quality),
            );
        }
        if !self.harris_k.is_finite() {
            return invalid("harris_k", "must be finite");
        }
        Ok(())
    }
}

/// Construction-time choice of algorithms and execution target.
/// Immutable for the lifetime of the engine built from it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureConfig {
    pub extractor: Algorithm,
    pub descriptor: Algorithm,
    #[cfg_attr(feature = "serde", serde(default))]
    pub target: ExecutionTarget,
    #[cfg_attr(feature = "serde", serde(default))]
    pub params: FeatureParams,
    /// Only consulted when `target` is GPU
    #[cfg_attr(feature = "serde", serde(default))]
    pub device: DeviceConfig,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self::orb()
    }
}

impl FeatureConfig {
    pub fn new(extractor: Algorithm, descriptor: Algorithm) -> Self {
        Self {
            extractor,
            descriptor,
            target: ExecutionTarget::Cpu,
            params: FeatureParams::default(),
            device: DeviceConfig::default(),
        }
    }

    pub fn orb() -> Self {
        Self::new(Algorithm::Orb, Algorithm::Orb)
    }

    pub fn gradient() -> Self {
        Self::new(Algorithm::Gradient, Algorithm::Gradient)
    }

    pub fn with_target(mut self, target: ExecutionTarget) -> Self {
        self.target = target;
        self
    }

    pub fn on_gpu(self) -> Self {
        self.with_target(ExecutionTarget::Gpu)
    }

    pub fn with_params(mut self, params: FeatureParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.params.max_features = max_features;
        self
    }

    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    /// Whether one algorithm covers both roles, enabling the combined path
    pub fn is_combined(&self) -> bool {
        self.extractor == self.descriptor
    }

    pub fn validate(&self) -> FeatureResult<()> {
        self.params.validate()?;
        if self.target == ExecutionTarget::Gpu && self.device.threads == 0 {
            return Err(FeatureError::InvalidParameter {
                name: "device.threads",
                reason: "GPU target needs at least one device worker".to_string(),
            });
        }
        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "FeatureConfig: extractor={}, descriptor={}, target={}, max_features={}, levels={}x{:.2}, patch={}",
            self.extractor,
            self.descriptor,
            self.target,
            self.params.max_features,
            self.params.n_levels,
            self.params.scale_factor,
            self.params.patch_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(FeatureConfig::default().validate().is_ok());
        assert!(FeatureParams::fast_preset().validate().is_ok());
        assert!(FeatureParams::quality_preset().validate().is_ok());
    }

    #[test]
    fn test_invalid_threshold() {
        let mut params = FeatureParams::default();
        params.fast_threshold = 0;
        assert!(matches!(
            params.validate(),
            Err(FeatureError::InvalidParameter {
                name: "fast_threshold",
                ..
            })
        ));
        params.fast_threshold = 200;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_invalid_patch_size() {
        let mut params = FeatureParams::default();
        params.patch_size = 16;
        assert!(params.validate().is_err());
        params.patch_size = 5;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_invalid_scale_factor() {
        let mut params = FeatureParams::default();
        params.scale_factor = 1.0;
        assert!(params.validate().is_err());
        params.scale_factor = f32::NAN;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_capability_table() {
        use ExecutionTarget::*;
        assert_eq!(Algorithm::Orb.capabilities(Cpu), Capabilities::FULL);
        assert!(!Algorithm::Orb.capabilities(Gpu).compute);
        assert!(!Algorithm::Brief.capabilities(Cpu).detect);
        assert!(!Algorithm::Fast.capabilities(Cpu).compute);
        assert_eq!(Algorithm::Harris.capabilities(Gpu), Capabilities::NONE);
    }

    #[test]
    fn test_descriptor_layouts() {
        assert_eq!(
            Algorithm::Orb.descriptor_layout(),
            Some((DescriptorKind::Binary, 32))
        );
        assert_eq!(
            Algorithm::Gradient.descriptor_layout(),
            Some((DescriptorKind::Float, 128))
        );
        assert_eq!(Algorithm::Fast.descriptor_layout(), None);
    }

    #[test]
    fn test_summary_mentions_algorithms() {
        let summary = FeatureConfig::new(Algorithm::Fast, Algorithm::Brief).summary();
        assert!(summary.contains("extractor=FAST"));
        assert!(summary.contains("descriptor=BRIEF"));
        assert!(summary.contains("target=CPU"));
    }
}
