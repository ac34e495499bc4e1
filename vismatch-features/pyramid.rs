use rayon::prelude::*;
use vismatch_core::GrayImage;

/// Scale information for pyramid levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleLevel {
    pub level: usize,
    pub scale: f32,
    pub width: usize,
    pub height: usize,
}

/// Image pyramid for multi-scale feature detection.
///
/// Every level is resampled directly from the base image, so a pyramid with
/// fewer levels is always a prefix of a deeper one built from the same image.
#[derive(Debug, Clone)]
pub struct ImagePyramid {
    levels: Vec<ScaleLevel>,
    images: Vec<GrayImage>,
}

impl ImagePyramid {
    /// Levels below this size (after the base) are not generated
    pub const MIN_LEVEL_SIZE: usize = 32;

    /// Generate scale levels; level 0 is always present.
    pub fn generate_scale_levels(
        width: usize,
        height: usize,
        n_levels: usize,
        scale_factor: f32,
    ) -> Vec<ScaleLevel> {
        let mut levels = vec![ScaleLevel {
            level: 0,
            scale: 1.0,
            width,
            height,
        }];
        let mut current_scale = 1.0f32;

        for level in 1..n_levels {
            current_scale *= scale_factor;
            let scaled_width = ((width as f32) / current_scale) as usize;
            let scaled_height = ((height as f32) / current_scale) as usize;

            // Stop when image becomes too small for meaningful detection
            if scaled_width < Self::MIN_LEVEL_SIZE || scaled_height < Self::MIN_LEVEL_SIZE {
                break;
            }

            levels.push(ScaleLevel {
                level,
                scale: current_scale,
                width: scaled_width,
                height: scaled_height,
            });
        }

        levels
    }

    pub fn build(image: &GrayImage, n_levels: usize, scale_factor: f32) -> Self {
        let levels =
            Self::generate_scale_levels(image.width(), image.height(), n_levels, scale_factor);
        let images = levels
            .par_iter()
            .map(|l| {
                if l.level == 0 {
                    image.clone()
                } else {
                    image.resize_bilinear(l.width, l.height)
                }
            })
            .collect();
        Self { levels, images }
    }

    /// Same geometry with every level box-filtered
    pub fn smoothed(&self) -> Self {
        Self {
            levels: self.levels.clone(),
            images: self.images.par_iter().map(|img| img.box_blur3()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> impl Iterator<Item = (&ScaleLevel, &GrayImage)> {
        self.levels.iter().zip(self.images.iter())
    }

    /// Level for `octave`, clamped to the deepest level available
    pub fn level_for_octave(&self, octave: u32) -> (&ScaleLevel, &GrayImage) {
        let idx = (octave as usize).min(self.levels.len() - 1);
        (&self.levels[idx], &self.images[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_shrink() {
        let levels = ImagePyramid::generate_scale_levels(640, 480, 8, 1.2);
        assert_eq!(levels.len(), 8);
        assert_eq!(levels[0].scale, 1.0);
        for pair in levels.windows(2) {
            assert!(pair[1].width < pair[0].width);
            assert!(pair[1].scale > pair[0].scale);
        }
    }

    #[test]
    fn test_small_image_keeps_base() {
        let levels = ImagePyramid::generate_scale_levels(20, 20, 8, 1.2);
        assert_eq!(levels.len(), 1);
        assert_eq!((levels[0].width, levels[0].height), (20, 20));
    }

    #[test]
    fn test_shallow_pyramid_is_prefix() {
        let img = GrayImage::from_fn(96, 80, |x, y| ((x * 7 + y * 3) % 251) as u8);
        let deep = ImagePyramid::build(&img, 6, 1.3);
        let shallow = ImagePyramid::build(&img, 3, 1.3);
        for ((la, ia), (lb, ib)) in deep.levels().zip(shallow.levels()) {
            assert_eq!(la, lb);
            assert_eq!(ia, ib);
        }
    }

    #[test]
    fn test_octave_clamped() {
        let img = GrayImage::from_fn(40, 40, |_, _| 1);
        let pyramid = ImagePyramid::build(&img, 2, 1.2);
        let (level, _) = pyramid.level_for_octave(7);
        assert_eq!(level.level, pyramid.len() - 1);
    }
}
