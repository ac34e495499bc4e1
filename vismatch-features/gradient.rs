use crate::config::FeatureParams;
use crate::error::FeatureResult;
use crate::pyramid::ImagePyramid;
use rayon::prelude::*;
use std::f32::consts::TAU;
use vismatch_core::{DescriptorKind, DescriptorSet, GrayImage, Keypoint};

/// Floats per gradient histogram descriptor (4x4 cells, 8 bins)
pub const GRADIENT_DIMS: usize = 128;

const GRID: usize = 16;
const CELLS: usize = 4;
const BINS: usize = 8;
const WEIGHT_SIGMA: f32 = 8.0;
const CLIP: f32 = 0.2;

/// Orientation histograms of local gradients, rotated into the keypoint frame
#[derive(Debug, Clone)]
pub struct GradientDescriptor {
    params: FeatureParams,
}

impl GradientDescriptor {
    pub fn new(params: &FeatureParams) -> Self {
        Self {
            params: params.clone(),
        }
    }

    pub(crate) fn describe_in_pyramid(
        &self,
        smoothed: &ImagePyramid,
        keypoints: &[Keypoint],
    ) -> FeatureResult<DescriptorSet> {
        if keypoints.is_empty() {
            return Ok(DescriptorSet::empty(DescriptorKind::Float, GRADIENT_DIMS));
        }

        let spacing = self.params.patch_size as f32 / GRID as f32;
        let rows: Vec<[f32; GRADIENT_DIMS]> = keypoints
            .par_iter()
            .map(|kp| {
                let (level, img) = smoothed.level_for_octave(kp.octave);
                describe_one(img, kp.x / level.scale, kp.y / level.scale, kp.angle, spacing)
            })
            .collect();

        Ok(DescriptorSet::from_float_rows(&rows)?)
    }

    pub(crate) fn compute(&self, image: &GrayImage, keypoints: &[Keypoint]) -> FeatureResult<DescriptorSet> {
        if keypoints.is_empty() {
            return Ok(DescriptorSet::empty(DescriptorKind::Float, GRADIENT_DIMS));
        }
        let max_octave = keypoints.iter().map(|kp| kp.octave as usize).max().unwrap_or(0);
        let n_levels = (max_octave + 1).min(self.params.n_levels);
        let smoothed = ImagePyramid::build(image, n_levels, self.params.scale_factor).smoothed();
        self.describe_in_pyramid(&smoothed, keypoints)
    }
}

fn describe_one(img: &GrayImage, cx: f32, cy: f32, angle: f32, spacing: f32) -> [f32; GRADIENT_DIMS] {
    let (s, c) = angle.sin_cos();
    // unit steps along the rotated u and v axes
    let (ux, uy) = (c, s);
    let (vx, vy) = (-s, c);
    let mut hist = [0.0f32; GRADIENT_DIMS];
    let center = (GRID as f32 - 1.0) / 2.0;

    for i in 0..GRID {
        for j in 0..GRID {
            let gu = j as f32 - center;
            let gv = i as f32 - center;
            let px = cx + (gu * ux + gv * vx) * spacing;
            let py = cy + (gu * uy + gv * vy) * spacing;

            let du = (img.sample_bilinear(px + ux, py + uy) - img.sample_bilinear(px - ux, py - uy)) / 2.0;
            let dv = (img.sample_bilinear(px + vx, py + vy) - img.sample_bilinear(px - vx, py - vy)) / 2.0;
            let magnitude = (du * du + dv * dv).sqrt();
            if magnitude == 0.0 {
                continue;
            }

            // bins are centred on multiples of 45 degrees
            let theta = dv.atan2(du).rem_euclid(TAU);
            let bin = ((theta / TAU * BINS as f32 + 0.5) as usize) % BINS;
            let weight = (-(gu * gu + gv * gv) / (2.0 * WEIGHT_SIGMA * WEIGHT_SIGMA)).exp();
            let cell = (i / CELLS) * CELLS + j / CELLS;
            hist[cell * BINS + bin] += magnitude * weight;
        }
    }

    normalize(&mut hist);
    for v in hist.iter_mut() {
        *v = v.min(CLIP);
    }
    normalize(&mut hist);
    hist
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured() -> GrayImage {
        GrayImage::from_fn(96, 96, |x, y| ((x * 7 + y * 11 + (x * y) % 23) % 256) as u8)
    }

    #[test]
    fn test_unit_norm_and_clipped() {
        let desc = GradientDescriptor::new(&FeatureParams::default());
        let set = desc.compute(&textured(), &[Keypoint::new(48.0, 48.0)]).unwrap();
        let row = set.as_float().unwrap();
        assert_eq!(row.len(), GRADIENT_DIMS);
        let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
        assert!(row.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_flat_patch_is_zero() {
        let desc = GradientDescriptor::new(&FeatureParams::default());
        let img = GrayImage::from_fn(64, 64, |_, _| 100);
        let set = desc.compute(&img, &[Keypoint::new(32.0, 32.0)]).unwrap();
        assert!(set.as_float().unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_descriptor_follows_rotation() {
        // a horizontal ramp seen upright and through a quarter turn
        let img = GrayImage::from_fn(80, 80, |x, _| (x * 3) as u8);
        let desc = GradientDescriptor::new(&FeatureParams::default());
        let upright = desc.compute(&img, &[Keypoint::new(40.0, 40.0)]).unwrap();
        let row = upright.as_float().unwrap();
        // all energy in bin 0 of every cell
        let bin0: f32 = (0..16).map(|cell| row[cell * BINS]).sum();
        assert!(bin0 > 0.9 * row.iter().sum::<f32>());

        let turned = desc
            .compute(&img, &[Keypoint::new(40.0, 40.0).with_angle(std::f32::consts::FRAC_PI_2)])
            .unwrap();
        let row = turned.as_float().unwrap();
        // the same ramp now points along -v, bin 6 of 8
        let bin6: f32 = (0..16).map(|cell| row[cell * BINS + 6]).sum();
        assert!(bin6 > 0.9 * row.iter().sum::<f32>());
    }
}
