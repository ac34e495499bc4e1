use crate::algorithm::FeatureAlgorithm;
use crate::config::{Capabilities, FeatureParams};
use crate::error::FeatureResult;
use crate::pyramid::ImagePyramid;
use rayon::prelude::*;
use vismatch_core::{DescriptorKind, DescriptorSet, GrayImage, Keypoint};

/// Bytes per steered BRIEF descriptor
pub const BRIEF_BYTES: usize = 32;

const BRIEF_BITS: usize = BRIEF_BYTES * 8;

/// Sampling pattern seed; fixed so descriptors are comparable across runs
const PATTERN_SEED: u64 = 0x2545_f491_4f6c_dd1d;

/// Rotation-steered BRIEF over the smoothed pyramid level of each keypoint
#[derive(Debug, Clone)]
pub struct BriefDescriptor {
    params: FeatureParams,
    pairs: Vec<(i32, i32, i32, i32)>,
}

impl BriefDescriptor {
    pub fn new(params: &FeatureParams) -> Self {
        Self {
            params: params.clone(),
            pairs: sampling_pattern(params.patch_size),
        }
    }

    pub fn pairs(&self) -> &[(i32, i32, i32, i32)] {
        &self.pairs
    }

    /// Describe keypoints against an already smoothed pyramid.
    pub(crate) fn describe_in_pyramid(
        &self,
        smoothed: &ImagePyramid,
        keypoints: &[Keypoint],
    ) -> FeatureResult<DescriptorSet> {
        if keypoints.is_empty() {
            return Ok(DescriptorSet::empty(DescriptorKind::Binary, BRIEF_BYTES));
        }

        let rows: Vec<[u8; BRIEF_BYTES]> = keypoints
            .par_iter()
            .map(|kp| {
                let (level, img) = smoothed.level_for_octave(kp.octave);
                let (cx, cy) = (kp.x / level.scale, kp.y / level.scale);
                let (s, c) = kp.angle.sin_cos();
                let mut d = [0u8; BRIEF_BYTES];

                for (i, &(dx1, dy1, dx2, dy2)) in self.pairs.iter().enumerate() {
                    let (dx1, dy1, dx2, dy2) = (dx1 as f32, dy1 as f32, dx2 as f32, dy2 as f32);
                    let v1 = img.sample_bilinear(cx + c * dx1 - s * dy1, cy + s * dx1 + c * dy1);
                    let v2 = img.sample_bilinear(cx + c * dx2 - s * dy2, cy + s * dx2 + c * dy2);

                    let bit = (v1 < v2) as u8;
                    d[i / 8] |= bit << (i % 8);
                }
                d
            })
            .collect();

        Ok(DescriptorSet::from_binary_rows(&rows)?)
    }

    /// Smoothed pyramid deep enough for the highest octave in `keypoints`
    pub(crate) fn pyramid_for(&self, image: &GrayImage, keypoints: &[Keypoint]) -> ImagePyramid {
        let max_octave = keypoints.iter().map(|kp| kp.octave as usize).max().unwrap_or(0);
        let n_levels = (max_octave + 1).min(self.params.n_levels);
        ImagePyramid::build(image, n_levels, self.params.scale_factor).smoothed()
    }
}

impl FeatureAlgorithm for BriefDescriptor {
    fn name(&self) -> &'static str {
        "BRIEF"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::DESCRIPTOR
    }

    fn descriptor_layout(&self) -> Option<(DescriptorKind, usize)> {
        Some((DescriptorKind::Binary, BRIEF_BYTES))
    }

    fn compute(&self, image: &GrayImage, keypoints: &[Keypoint]) -> FeatureResult<DescriptorSet> {
        if keypoints.is_empty() {
            return Ok(DescriptorSet::empty(DescriptorKind::Binary, BRIEF_BYTES));
        }
        let smoothed = self.pyramid_for(image, keypoints);
        self.describe_in_pyramid(&smoothed, keypoints)
    }
}

/// 256 point pairs drawn from an approximate isotropic Gaussian with
/// sigma = patch / 5, clipped to the patch.
fn sampling_pattern(patch_size: usize) -> Vec<(i32, i32, i32, i32)> {
    let half = (patch_size / 2) as f32;
    let sigma = patch_size as f32 / 5.0;
    let mut rng = XorShift(PATTERN_SEED);
    let mut coord = || (rng.gaussian() * sigma).round().clamp(-half, half) as i32;

    (0..BRIEF_BITS)
        .map(|_| (coord(), coord(), coord(), coord()))
        .collect()
}

struct XorShift(u64);

impl XorShift {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn uniform(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Sum of four uniforms, rescaled to unit variance
    fn gaussian(&mut self) -> f32 {
        let sum: f32 = (0..4).map(|_| self.uniform()).sum();
        (sum - 2.0) * 3.0f32.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured() -> GrayImage {
        GrayImage::from_fn(96, 96, |x, y| ((x * 13 + y * 29 + (x * y) % 17) % 256) as u8)
    }

    #[test]
    fn test_pattern_is_deterministic_and_bounded() {
        let a = BriefDescriptor::new(&FeatureParams::default());
        let b = BriefDescriptor::new(&FeatureParams::default());
        assert_eq!(a.pairs(), b.pairs());
        assert_eq!(a.pairs().len(), 256);
        for &(x1, y1, x2, y2) in a.pairs() {
            for v in [x1, y1, x2, y2] {
                assert!(v.abs() <= 15);
            }
        }
        assert!(a.pairs().iter().any(|&(x1, y1, x2, y2)| (x1, y1) != (x2, y2)));
    }

    #[test]
    fn test_one_row_per_keypoint() {
        let brief = BriefDescriptor::new(&FeatureParams::default());
        let keypoints = vec![
            Keypoint::new(30.0, 30.0),
            Keypoint::new(50.0, 40.0).with_angle(1.0),
            Keypoint::new(60.0, 60.0).with_octave(2),
        ];
        let set = brief.compute(&textured(), &keypoints).unwrap();
        assert_eq!(set.rows(), 3);
        assert_eq!(set.cols(), BRIEF_BYTES);
        assert_eq!(set.kind(), DescriptorKind::Binary);
    }

    #[test]
    fn test_empty_keypoints_give_empty_matrix() {
        let brief = BriefDescriptor::new(&FeatureParams::default());
        let set = brief.compute(&textured(), &[]).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.cols(), BRIEF_BYTES);
    }

    #[test]
    fn test_rotation_changes_descriptor() {
        let brief = BriefDescriptor::new(&FeatureParams::default());
        let img = textured();
        let upright = brief.compute(&img, &[Keypoint::new(48.0, 48.0)]).unwrap();
        let turned = brief
            .compute(&img, &[Keypoint::new(48.0, 48.0).with_angle(1.3)])
            .unwrap();
        assert_ne!(upright.as_binary(), turned.as_binary());
    }

    #[test]
    fn test_border_keypoints_are_described() {
        let brief = BriefDescriptor::new(&FeatureParams::default());
        let set = brief
            .compute(&textured(), &[Keypoint::new(0.0, 0.0), Keypoint::new(95.0, 95.0)])
            .unwrap();
        assert_eq!(set.rows(), 2);
    }
}
