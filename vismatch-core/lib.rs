//! Shared data model for the vismatch feature pipeline.
//!
//! Everything that crosses the boundary between feature extraction and
//! descriptor matching lives here: decoded images, keypoints, descriptor
//! matrices, matches, and the accelerator device both engines can target.

pub mod descriptor;
pub mod device;
pub mod error;
pub mod image;
pub mod types;

pub use descriptor::{
    DescriptorError, DescriptorKind, DescriptorSet, DescriptorView, DeviceDescriptors, RowRef,
};
pub use device::{
    Device, DeviceBuffer, DeviceConfig, DeviceError, DeviceResult, KernelContext, Pending,
    TransferStats,
};
pub use error::ErrorKind;
pub use image::{GrayImage, Image, ImageError, ImageResult, PixelDepth};
pub use types::{ExecutionTarget, Keypoint, Match};

/// Initialize the global Rayon thread pool used by the CPU providers.
///
/// May only succeed once per process; later calls return the build error.
pub fn init_thread_pool(n_threads: usize) -> Result<(), rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build_global()
}
