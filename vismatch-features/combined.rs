use crate::algorithm::{require_min_size, FeatureAlgorithm};
use crate::brief::{BriefDescriptor, BRIEF_BYTES};
use crate::config::{Capabilities, FeatureParams};
use crate::error::FeatureResult;
use crate::fast::FastDetector;
use crate::gradient::{GradientDescriptor, GRADIENT_DIMS};
use crate::harris::HarrisDetector;
use crate::pyramid::ImagePyramid;
use vismatch_core::{DescriptorKind, DescriptorSet, GrayImage, Keypoint};

/// Oriented FAST keypoints with steered BRIEF descriptors.
///
/// The combined call shares one pyramid between detection and description
/// and yields exactly what `detect` followed by `compute` yields.
#[derive(Debug, Clone)]
pub struct OrbFeatures {
    params: FeatureParams,
    detector: FastDetector,
    descriptor: BriefDescriptor,
}

impl OrbFeatures {
    pub fn new(params: &FeatureParams) -> Self {
        Self {
            params: params.clone(),
            detector: FastDetector::new(params),
            descriptor: BriefDescriptor::new(params),
        }
    }
}

impl FeatureAlgorithm for OrbFeatures {
    fn name(&self) -> &'static str {
        "ORB"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::FULL
    }

    fn descriptor_layout(&self) -> Option<(DescriptorKind, usize)> {
        Some((DescriptorKind::Binary, BRIEF_BYTES))
    }

    fn detect(&self, image: &GrayImage) -> FeatureResult<Vec<Keypoint>> {
        self.detector.detect(image)
    }

    fn compute(&self, image: &GrayImage, keypoints: &[Keypoint]) -> FeatureResult<DescriptorSet> {
        self.descriptor.compute(image, keypoints)
    }

    fn detect_and_compute(&self, image: &GrayImage) -> FeatureResult<(Vec<Keypoint>, DescriptorSet)> {
        require_min_size(self.name(), image, FastDetector::MIN_SIZE)?;
        let pyramid = ImagePyramid::build(image, self.params.n_levels, self.params.scale_factor);
        let keypoints = self.detector.detect_in_pyramid(&pyramid);
        let descriptors = self
            .descriptor
            .describe_in_pyramid(&pyramid.smoothed(), &keypoints)?;
        Ok((keypoints, descriptors))
    }
}

/// Harris keypoints with 128-D gradient histogram descriptors
#[derive(Debug, Clone)]
pub struct GradientFeatures {
    params: FeatureParams,
    detector: HarrisDetector,
    descriptor: GradientDescriptor,
}

impl GradientFeatures {
    pub fn new(params: &FeatureParams) -> Self {
        Self {
            params: params.clone(),
            detector: HarrisDetector::new(params),
            descriptor: GradientDescriptor::new(params),
        }
    }
}

impl FeatureAlgorithm for GradientFeatures {
    fn name(&self) -> &'static str {
        "Gradient"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::FULL
    }

    fn descriptor_layout(&self) -> Option<(DescriptorKind, usize)> {
        Some((DescriptorKind::Float, GRADIENT_DIMS))
    }

    fn detect(&self, image: &GrayImage) -> FeatureResult<Vec<Keypoint>> {
        self.detector.detect(image)
    }

    fn compute(&self, image: &GrayImage, keypoints: &[Keypoint]) -> FeatureResult<DescriptorSet> {
        self.descriptor.compute(image, keypoints)
    }

    fn detect_and_compute(&self, image: &GrayImage) -> FeatureResult<(Vec<Keypoint>, DescriptorSet)> {
        require_min_size(self.name(), image, HarrisDetector::MIN_SIZE)?;
        let pyramid = ImagePyramid::build(image, self.params.n_levels, self.params.scale_factor);
        let keypoints = self.detector.detect_in_pyramid(&pyramid);
        let descriptors = self
            .descriptor
            .describe_in_pyramid(&pyramid.smoothed(), &keypoints)?;
        Ok((keypoints, descriptors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> GrayImage {
        GrayImage::from_fn(128, 96, |x, y| {
            let block = ((x / 12) * 37 + (y / 12) * 71) % 5;
            (block * 50 + (x % 3) as usize) as u8
        })
    }

    #[test]
    fn test_orb_combined_equals_sequential() {
        let orb = OrbFeatures::new(&FeatureParams::default());
        let img = scene();
        let (kps, desc) = orb.detect_and_compute(&img).unwrap();
        assert!(!kps.is_empty());
        let kps2 = orb.detect(&img).unwrap();
        let desc2 = orb.compute(&img, &kps2).unwrap();
        assert_eq!(kps, kps2);
        assert_eq!(desc, desc2);
        assert_eq!(desc.rows(), kps.len());
    }

    #[test]
    fn test_gradient_combined_equals_sequential() {
        let features = GradientFeatures::new(&FeatureParams::default());
        let img = scene();
        let (kps, desc) = features.detect_and_compute(&img).unwrap();
        assert!(!kps.is_empty());
        let kps2 = features.detect(&img).unwrap();
        let desc2 = features.compute(&img, &kps2).unwrap();
        assert_eq!(kps, kps2);
        assert_eq!(desc, desc2);
        assert_eq!(desc.kind(), DescriptorKind::Float);
        assert_eq!(desc.cols(), GRADIENT_DIMS);
    }

    #[test]
    fn test_flat_image_gives_empty_layout() {
        let orb = OrbFeatures::new(&FeatureParams::default());
        let img = GrayImage::from_fn(64, 64, |_, _| 90);
        let (kps, desc) = orb.detect_and_compute(&img).unwrap();
        assert!(kps.is_empty());
        assert_eq!(desc.rows(), 0);
        assert_eq!(desc.cols(), BRIEF_BYTES);
    }
}
