use crate::algorithm::{require_min_size, FeatureAlgorithm};
use crate::config::{Capabilities, FeatureParams};
use crate::error::FeatureResult;
use crate::pyramid::{ImagePyramid, ScaleLevel};
use crate::refinement::KeypointRefinement;
use log::trace;
use rayon::prelude::*;
use vismatch_core::{GrayImage, Keypoint};

/// Multi-scale Harris corner detector
#[derive(Debug, Clone)]
pub struct HarrisDetector {
    params: FeatureParams,
}

impl HarrisDetector {
    pub const MIN_SIZE: usize = 7;

    /// Sobel needs one pixel, the 5x5 tensor window two more
    const BORDER: usize = 3;

    pub fn new(params: &FeatureParams) -> Self {
        Self {
            params: params.clone(),
        }
    }

    pub(crate) fn detect_in_pyramid(&self, pyramid: &ImagePyramid) -> Vec<Keypoint> {
        let levels: Vec<(&ScaleLevel, &GrayImage)> = pyramid.levels().collect();
        let mut keypoints: Vec<Keypoint> = levels
            .par_iter()
            .flat_map_iter(|&(level, image)| {
                let candidates = self.detect_level(image);
                trace!(
                    "Harris level {} ({}x{}): {} candidates",
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

    fn detect_level(&self, img: &GrayImage) -> Vec<Keypoint> {
        let (width, height) = img.dimensions();
        if width < Self::MIN_SIZE || height < Self::MIN_SIZE {
            return Vec::new();
        }

        let (gx, gy) = sobel_gradients(img);
        let k = self.params.harris_k as f64;

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
                    *score = harris_response(&gx, &gy, width, x, y, k);
                }
            });

        let max_response = scores.iter().copied().fold(0.0f32, f32::max);
        if max_response <= 0.0 {
            return Vec::new();
        }
        let threshold = max_response * self.params.harris_quality;
        for s in scores.iter_mut() {
            if *s < threshold {
                *s = 0.0;
            }
        }

        KeypointRefinement::local_maxima(&scores, width, height)
            .into_iter()
            .map(|(x, y, s)| Keypoint::new(x as f32, y as f32).with_response(s))
            .collect()
    }
}

/// Normalized Sobel derivatives; border pixels are zero.
pub(crate) fn sobel_gradients(img: &GrayImage) -> (Vec<f32>, Vec<f32>) {
    let (width, height) = img.dimensions();
    let mut gx = vec![0.0f32; width * height];
    let mut gy = vec![0.0f32; width * height];
    if width < 3 || height < 3 {
        return (gx, gy);
    }

    gx.par_chunks_mut(width)
        .zip(gy.par_chunks_mut(width))
        .enumerate()
        .skip(1)
        .take(height - 2)
        .for_each(|(y, (row_x, row_y))| {
            let p = |x: usize, y: usize| img.get(x, y) as f32;
            for x in 1..width - 1 {
                // Sobel X: [-1 0 1; -2 0 2; -1 0 1]
                row_x[x] = (p(x + 1, y - 1) + 2.0 * p(x + 1, y) + p(x + 1, y + 1)
                    - p(x - 1, y - 1)
                    - 2.0 * p(x - 1, y)
                    - p(x - 1, y + 1))
                    / 8.0;
                // Sobel Y: [-1 -2 -1; 0 0 0; 1 2 1]
                row_y[x] = (p(x - 1, y + 1) + 2.0 * p(x, y + 1) + p(x + 1, y + 1)
                    - p(x - 1, y - 1)
                    - 2.0 * p(x, y - 1)
                    - p(x + 1, y - 1))
                    / 8.0;
            }
        });

    (gx, gy)
}

/// `det(M) - k * trace(M)^2` over a 5x5 window, clamped at zero
fn harris_response(gx: &[f32], gy: &[f32], width: usize, x: usize, y: usize, k: f64) -> f32 {
    let mut ixx = 0.0f64;
    let mut ixy = 0.0f64;
    let mut iyy = 0.0f64;

    for ny in y - 2..=y + 2 {
        for nx in x - 2..=x + 2 {
            let dx = gx[ny * width + nx] as f64;
            let dy = gy[ny * width + nx] as f64;
            ixx += dx * dx;
            ixy += dx * dy;
            iyy += dy * dy;
        }
    }

    let det = ixx * iyy - ixy * ixy;
    let trace = ixx + iyy;
    let r = det - k * trace * trace;
    if r > 0.0 {
        r as f32
    } else {
        0.0
    }
}

impl FeatureAlgorithm for HarrisDetector {
    fn name(&self) -> &'static str {
        "Harris"
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
