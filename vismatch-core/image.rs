use crate::error::ErrorKind;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("invalid image dimensions: {width}x{height} (must be > 0)")]
    ZeroSize { width: usize, height: usize },
    #[error("image dimensions {width}x{height} overflow the addressable buffer size")]
    TooLarge { width: usize, height: usize },
    #[error("unsupported channel count {0} (expected 1, 3 or 4)")]
    UnsupportedChannels(usize),
    #[error("image data length mismatch: expected {expected} bytes, got {actual}")]
    DataLength { expected: usize, actual: usize },
    #[error("unsupported pixel depth {0:?}: 8-bit samples required")]
    UnsupportedDepth(PixelDepth),
}

impl ImageError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PreconditionViolation
    }
}

pub type ImageResult<T> = Result<T, ImageError>;

/// Storage size of a single channel sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PixelDepth {
    U8,
    /// Native-endian 16-bit samples, two bytes each
    U16,
}

impl PixelDepth {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            PixelDepth::U8 => 1,
            PixelDepth::U16 => 2,
        }
    }
}

/// Decoded, row-major, interleaved pixel buffer.
///
/// Channel order for color images is R, G, B(, A).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: usize,
    height: usize,
    channels: usize,
    depth: PixelDepth,
    data: Vec<u8>,
}

impl Image {
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        depth: PixelDepth,
        data: Vec<u8>,
    ) -> ImageResult<Self> {
        if width == 0 || height == 0 {
            return Err(ImageError::ZeroSize { width, height });
        }
        if !matches!(channels, 1 | 3 | 4) {
            return Err(ImageError::UnsupportedChannels(channels));
        }
        let expected = buffer_len(width, height, channels * depth.bytes_per_sample())?;
        if data.len() != expected {
            return Err(ImageError::DataLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            depth,
            data,
        })
    }

    /// 8-bit single channel image
    pub fn gray(width: usize, height: usize, data: Vec<u8>) -> ImageResult<Self> {
        Self::new(width, height, 1, PixelDepth::U8, data)
    }

    /// 8-bit interleaved RGB image
    pub fn rgb(width: usize, height: usize, data: Vec<u8>) -> ImageResult<Self> {
        Self::new(width, height, 3, PixelDepth::U8, data)
    }

    /// 8-bit interleaved RGBA image
    pub fn rgba(width: usize, height: usize, data: Vec<u8>) -> ImageResult<Self> {
        Self::new(width, height, 4, PixelDepth::U8, data)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn depth(&self) -> PixelDepth {
        self.depth
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Convert to the 8-bit luma image every detector works on.
    pub fn to_gray(&self) -> ImageResult<GrayImage> {
        if self.depth != PixelDepth::U8 {
            return Err(ImageError::UnsupportedDepth(self.depth));
        }
        let data = match self.channels {
            1 => self.data.clone(),
            3 | 4 => self
                .data
                .chunks_exact(self.channels)
                .map(|px| luma(px[0], px[1], px[2]))
                .collect(),
            n => return Err(ImageError::UnsupportedChannels(n)),
        };
        GrayImage::new(self.width, self.height, data)
    }
}

fn buffer_len(width: usize, height: usize, bytes_per_pixel: usize) -> ImageResult<usize> {
    width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(bytes_per_pixel))
        .ok_or(ImageError::TooLarge { width, height })
}

/// Rec. 601 luma in 8.8 fixed point
#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
}

/// Row-major 8-bit grayscale working image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayImage {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> ImageResult<Self> {
        if width == 0 || height == 0 {
            return Err(ImageError::ZeroSize { width, height });
        }
        let expected = buffer_len(width, height, 1)?;
        if data.len() != expected {
            return Err(ImageError::DataLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    ///
    /// Zero dimensions are raised to one pixel so the image is never empty.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> u8) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Pixel access with coordinates clamped to the image border
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> u8 {
        let cx = x.clamp(0, self.width as i64 - 1) as usize;
        let cy = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[cy * self.width + cx]
    }

    /// Bilinear interpolation for subpixel sampling, clamped at the border
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let x1 = x0 + 1.0;
        let y1 = y0 + 1.0;

        if x0 < 0.0 || y0 < 0.0 || x1 >= self.width as f32 || y1 >= self.height as f32 {
            return self.get_clamped(x.round() as i64, y.round() as i64) as f32;
        }

        let dx = x - x0;
        let dy = y - y0;
        let (x0, y0, x1, y1) = (x0 as usize, y0 as usize, x1 as usize, y1 as usize);

        let p00 = self.get(x0, y0) as f32;
        let p10 = self.get(x1, y0) as f32;
        let p01 = self.get(x0, y1) as f32;
        let p11 = self.get(x1, y1) as f32;

        let top = p00 * (1.0 - dx) + p10 * dx;
        let bottom = p01 * (1.0 - dx) + p11 * dx;
        top * (1.0 - dy) + bottom * dy
    }

    /// 3x3 box filter with replicated borders
    pub fn box_blur3(&self) -> GrayImage {
        let mut out = vec![0u8; self.data.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                let mut sum = 0u32;
                for dy in -1..=1i64 {
                    for dx in -1..=1i64 {
                        sum += self.get_clamped(x as i64 + dx, y as i64 + dy) as u32;
                    }
                }
                out[y * self.width + x] = ((sum + 4) / 9) as u8;
            }
        }
        GrayImage {
            width: self.width,
            height: self.height,
            data: out,
        }
    }

    /// Resample to `target_width` x `target_height` with bilinear interpolation
    pub fn resize_bilinear(&self, target_width: usize, target_height: usize) -> GrayImage {
        let target_width = target_width.max(1);
        let target_height = target_height.max(1);
        let x_ratio = self.width as f32 / target_width as f32;
        let y_ratio = self.height as f32 / target_height as f32;

        let mut data = Vec::with_capacity(target_width * target_height);
        for y in 0..target_height {
            for x in 0..target_width {
                let v = self.sample_bilinear(x as f32 * x_ratio, y as f32 * y_ratio);
                data.push(v.round().clamp(0.0, 255.0) as u8);
            }
        }
        GrayImage {
            width: target_width,
            height: target_height,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_size() {
        assert!(matches!(
            Image::gray(0, 10, vec![]),
            Err(ImageError::ZeroSize { .. })
        ));
    }

    #[test]
    fn test_rejects_overflowing_dimensions() {
        assert!(matches!(
            Image::new(usize::MAX / 2, 3, 3, PixelDepth::U8, vec![]),
            Err(ImageError::TooLarge { height: 3, .. })
        ));
        assert!(matches!(
            Image::new(1 << 40, 1 << 30, 1, PixelDepth::U16, vec![]),
            Err(ImageError::TooLarge { .. })
        ));
        let err = GrayImage::new(usize::MAX, 2, vec![]).unwrap_err();
        assert_eq!(err, ImageError::TooLarge { width: usize::MAX, height: 2 });
        assert_eq!(err.kind(), ErrorKind::PreconditionViolation);
    }

    #[test]
    fn test_from_fn_never_builds_an_empty_image() {
        let img = GrayImage::from_fn(0, 5, |_, y| y as u8);
        assert_eq!(img.dimensions(), (1, 5));
        assert_eq!(img.get_clamped(-4, 9), 4);
        assert_eq!(img.sample_bilinear(3.0, 2.0), 2.0);
        assert_eq!(GrayImage::from_fn(0, 0, |_, _| 7).as_raw(), &[7]);
    }

    #[test]
    fn test_rejects_short_buffer() {
        let result = Image::rgb(4, 4, vec![0; 47]);
        assert!(matches!(
            result,
            Err(ImageError::DataLength {
                expected: 48,
                actual: 47
            })
        ));
    }

    #[test]
    fn test_rejects_two_channels() {
        let result = Image::new(2, 2, 2, PixelDepth::U8, vec![0; 8]);
        assert!(matches!(result, Err(ImageError::UnsupportedChannels(2))));
    }

    #[test]
    fn test_rgb_to_gray() {
        let img = Image::rgb(2, 1, vec![255, 255, 255, 255, 0, 0]).unwrap();
        let gray = img.to_gray().unwrap();
        assert_eq!(gray.as_raw()[0], 255);
        assert_eq!(gray.as_raw()[1], 77);
    }

    #[test]
    fn test_rgba_ignores_alpha() {
        let rgb = Image::rgb(1, 1, vec![10, 200, 30]).unwrap();
        let rgba = Image::rgba(1, 1, vec![10, 200, 30, 0]).unwrap();
        assert_eq!(rgb.to_gray().unwrap(), rgba.to_gray().unwrap());
    }

    #[test]
    fn test_sixteen_bit_is_not_convertible() {
        let img = Image::new(2, 2, 1, PixelDepth::U16, vec![0; 8]).unwrap();
        assert!(matches!(
            img.to_gray(),
            Err(ImageError::UnsupportedDepth(PixelDepth::U16))
        ));
    }

    #[test]
    fn test_bilinear_midpoint() {
        let img = GrayImage::new(2, 2, vec![0, 100, 0, 100]).unwrap();
        let v = img.sample_bilinear(0.5, 0.0);
        assert!((v - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_bilinear_clamps_outside() {
        let img = GrayImage::from_fn(4, 4, |x, _| (x * 10) as u8);
        assert_eq!(img.sample_bilinear(-3.0, 1.0), 0.0);
        assert_eq!(img.sample_bilinear(10.0, 1.0), 30.0);
    }

    #[test]
    fn test_resize_halves() {
        let img = GrayImage::from_fn(8, 6, |_, _| 42);
        let small = img.resize_bilinear(4, 3);
        assert_eq!(small.dimensions(), (4, 3));
        assert!(small.as_raw().iter().all(|&v| v == 42));
    }

    #[test]
    fn test_box_blur_preserves_flat() {
        let img = GrayImage::from_fn(5, 5, |_, _| 99);
        assert_eq!(img.box_blur3(), img);
    }
}
