use crate::algorithm::{require_min_size, FeatureAlgorithm};
use crate::config::{Capabilities, FeatureParams};
use crate::error::FeatureResult;
use crate::pyramid::{ImagePyramid, ScaleLevel};
use crate::refinement::KeypointRefinement;
use log::trace;
use rayon::prelude::*;
use vismatch_core::{GrayImage, Keypoint};

/// Multi-scale FAST-9 corner detector
#[derive(Debug, Clone)]
pub struct FastDetector {
    params: FeatureParams,
}

impl FastDetector {
    /// Bresenham circle of radius 3, clockwise from 12 o'clock
    #[rustfmt::skip]
    pub const FAST_OFFSETS: [(i32, i32); 16] = [
        (0, -3), (1, -3), (2, -2), (3, -1),
        (3, 0), (3, 1), (2, 2), (1, 3),
        (0, 3), (-1, 3), (-2, 2), (-3, 1),
        (-3, 0), (-3, -1), (-2, -2), (-1, -3),
    ];

    /// Contiguous circle pixels required for a corner
    pub const ARC_LENGTH: usize = 9;

    /// Circle radius plus one pixel on either side
    pub const MIN_SIZE: usize = 7;

    const BORDER: usize = 3;

    pub fn new(params: &FeatureParams) -> Self {
        Self {
            params: params.clone(),
        }
    }

    /// Detect on every level of a prebuilt pyramid and keep the strongest.
    pub(crate) fn detect_in_pyramid(&self, pyramid: &ImagePyramid) -> Vec<Keypoint> {
        let levels: Vec<(&ScaleLevel, &GrayImage)> = pyramid.levels().collect();
        let mut keypoints: Vec<Keypoint> = levels
            .par_iter()
            .flat_map_iter(|&(level, image)| {
                let candidates = Self::detect_level(image, self.params.fast_threshold);
                trace!(
                    "FAST level {} ({}x{}): {} candidates",
                    level.level,
                    level.width,
                    level.height,
                    candidates.len()
                );
                KeypointRefinement::finalize_level(
                    candidates,
                    level,
                    image,
                    self.params.nms_distance,
                    self.params.patch_size,
                )
            })
            .collect();

        KeypointRefinement::retain_best(&mut keypoints, self.params.max_features);
        keypoints
    }

    /// Score map plus 3x3 suppression on a single level, in level coordinates
    fn detect_level(img: &GrayImage, threshold: u8) -> Vec<Keypoint> {
        let (width, height) = img.dimensions();
        if width < Self::MIN_SIZE || height < Self::MIN_SIZE {
            return Vec::new();
        }

        let mut scores = vec![0.0f32; width * height];
        scores
            .par_chunks_mut(width)
            .enumerate()
            .skip(Self::BORDER)
            .take(height - 2 * Self::BORDER)
            .for_each(|(y, row)| {
                for (x, score) in row
                    .iter_mut()
                    .enumerate()
                    .take(width - Self::BORDER)
                    .skip(Self::BORDER)
                {
                    *score = Self::corner_score(img, x, y, threshold);
                }
            });

        KeypointRefinement::local_maxima(&scores, width, height)
            .into_iter()
            .map(|(x, y, s)| Keypoint::new(x as f32, y as f32).with_response(s))
            .collect()
    }

    /// Mean squared contrast of the circle pixels beyond the threshold,
    /// zero when the pixel is not a corner.
    fn corner_score(img: &GrayImage, x: usize, y: usize, threshold: u8) -> f32 {
        let width = img.width();
        let data = img.as_raw();
        let center = data[y * width + x] as i32;
        let t = threshold as i32;

        let mut brighter: u16 = 0;
        let mut darker: u16 = 0;
        let mut circle = [0i32; 16];
        for (i, &(dx, dy)) in Self::FAST_OFFSETS.iter().enumerate() {
            let px = (x as i32 + dx) as usize;
            let py = (y as i32 + dy) as usize;
            let p = data[py * width + px] as i32;
            circle[i] = p;
            if p > center + t {
                brighter |= 1 << i;
            } else if p < center - t {
                darker |= 1 << i;
            }
        }

        if !has_consecutive_arc(brighter, Self::ARC_LENGTH)
            && !has_consecutive_arc(darker, Self::ARC_LENGTH)
        {
            return 0.0;
        }

        let mut sum = 0.0f32;
        let mut count = 0;
        for p in circle {
            let diff = (center - p).abs();
            if diff > t {
                sum += (diff * diff) as f32;
                count += 1;
            }
        }
        if count > 0 {
            sum / count as f32
        } else {
            0.0
        }
    }
}

impl FeatureAlgorithm for FastDetector {
    fn name(&self) -> &'static str {
        "FAST"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::EXTRACTOR
    }

    fn detect(&self, image: &GrayImage) -> FeatureResult<Vec<Keypoint>> {
        require_min_size(self.name(), image, Self::MIN_SIZE)?;
        let pyramid = ImagePyramid::build(image, self.params.n_levels, self.params.scale_factor);
        Ok(self.detect_in_pyramid(&pyramid))
    }
}

/// Whether the 16-bit circular mask holds a run of at least `run` set bits.
pub fn has_consecutive_arc(mask: u16, run: usize) -> bool {
    if run == 0 || run > 16 {
        return false;
    }
    let mut test = mask;
    for i in 1..run {
        test &= mask.rotate_left(i as u32);
        if test == 0 {
            return false;
        }
    }
    test != 0
}
