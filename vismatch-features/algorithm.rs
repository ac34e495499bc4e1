use crate::brief::BriefDescriptor;
use crate::combined::{GradientFeatures, OrbFeatures};
use crate::config::{Algorithm, Capabilities, FeatureParams};
use crate::error::{FeatureError, FeatureResult, Operation};
use crate::fast::FastDetector;
use crate::harris::HarrisDetector;
use std::sync::Arc;
use vismatch_core::{DescriptorKind, DescriptorSet, ExecutionTarget, GrayImage, Keypoint};

/// A pluggable keypoint detector and/or descriptor.
///
/// Providers only implement the call shapes listed in `capabilities()`;
/// the defaults report `UnsupportedOperation`. `compute` must return
/// exactly one descriptor row per input keypoint, in order.
pub trait FeatureAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Kind and width of computed descriptors, `None` for extract-only providers
    fn descriptor_layout(&self) -> Option<(DescriptorKind, usize)> {
        None
    }

    fn detect(&self, _image: &GrayImage) -> FeatureResult<Vec<Keypoint>> {
        Err(FeatureError::unsupported(
            self.name(),
            Operation::Detect,
            ExecutionTarget::Cpu,
        ))
    }

    fn compute(&self, _image: &GrayImage, _keypoints: &[Keypoint]) -> FeatureResult<DescriptorSet> {
        Err(FeatureError::unsupported(
            self.name(),
            Operation::Compute,
            ExecutionTarget::Cpu,
        ))
    }

    fn detect_and_compute(&self, _image: &GrayImage) -> FeatureResult<(Vec<Keypoint>, DescriptorSet)> {
        Err(FeatureError::unsupported(
            self.name(),
            Operation::DetectAndCompute,
            ExecutionTarget::Cpu,
        ))
    }
}

/// Instantiate the CPU provider for `algorithm`.
pub fn provider(algorithm: Algorithm, params: &FeatureParams) -> Arc<dyn FeatureAlgorithm> {
    match algorithm {
        Algorithm::Orb => Arc::new(OrbFeatures::new(params)),
        Algorithm::Gradient => Arc::new(GradientFeatures::new(params)),
        Algorithm::Fast => Arc::new(FastDetector::new(params)),
        Algorithm::Harris => Arc::new(HarrisDetector::new(params)),
        Algorithm::Brief => Arc::new(BriefDescriptor::new(params)),
    }
}

/// Reject images a detector cannot scan.
pub(crate) fn require_min_size(
    algorithm: &'static str,
    image: &GrayImage,
    min_size: usize,
) -> FeatureResult<()> {
    let (width, height) = image.dimensions();
    if width < min_size || height < min_size {
        return Err(FeatureError::ImageTooSmall {
            algorithm,
            width,
            height,
            min_size,
        });
    }
    Ok(())
}
