//! Conversion from decoded `image` crate buffers.

use image::DynamicImage;
use vismatch_core::{Image, ImageResult, PixelDepth};

/// Copy a decoded image into an [`Image`].
///
/// 8 and 16-bit gray, RGB and RGBA layouts are kept as they are. Gray with
/// alpha drops the alpha channel and floating point images are quantized to
/// 8 bits.
pub fn image_from_dynamic(image: &DynamicImage) -> ImageResult<Image> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    match image {
        DynamicImage::ImageLuma8(buf) => Image::gray(width, height, buf.as_raw().clone()),
        DynamicImage::ImageRgb8(buf) => Image::rgb(width, height, buf.as_raw().clone()),
        DynamicImage::ImageRgba8(buf) => Image::rgba(width, height, buf.as_raw().clone()),
        DynamicImage::ImageLumaA8(_) => Image::gray(width, height, image.to_luma8().into_raw()),
        DynamicImage::ImageLuma16(buf) => wide(width, height, 1, buf.as_raw()),
        DynamicImage::ImageLumaA16(_) => wide(width, height, 1, image.to_luma16().as_raw()),
        DynamicImage::ImageRgb16(buf) => wide(width, height, 3, buf.as_raw()),
        DynamicImage::ImageRgba16(buf) => wide(width, height, 4, buf.as_raw()),
        DynamicImage::ImageRgb32F(_) => Image::rgb(width, height, image.to_rgb8().into_raw()),
        _ => Image::rgba(width, height, image.to_rgba8().into_raw()),
    }
}

fn wide(width: usize, height: usize, channels: usize, samples: &[u16]) -> ImageResult<Image> {
    let data = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
    Image::new(width, height, channels, PixelDepth::U16, data)
}
