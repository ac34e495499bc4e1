//! Device-side feature kernels.
//!
//! Kernels run the CPU providers on the device's own worker pool, reading
//! their input from device buffers and leaving their output resident on the
//! device. Only the call shapes in the GPU capability table are offered.

use crate::algorithm::{provider, FeatureAlgorithm};
use crate::config::{Algorithm, Capabilities, FeatureParams};
use crate::error::{FeatureError, FeatureResult, Operation};
use log::debug;
use std::sync::Arc;
use vismatch_core::{
    DescriptorKind, DescriptorSet, Device, DeviceBuffer, DeviceDescriptors, ExecutionTarget,
    GrayImage, KernelContext, Keypoint, Pending,
};

/// Channel count the combined detect-and-compute kernels accept
pub const COMBINED_KERNEL_CHANNELS: usize = 3;

/// Grayscale image resident on a device, remembering the channel count of
/// the host image it was converted from.
#[derive(Debug, Clone)]
pub struct DeviceImage {
    buffer: DeviceBuffer<u8>,
    width: usize,
    height: usize,
    source_channels: usize,
}

impl DeviceImage {
    pub fn upload(device: &Device, image: &GrayImage, source_channels: usize) -> Self {
        debug!(
            "uploading {}x{} image to device {}",
            image.width(),
            image.height(),
            device.name()
        );
        Self {
            buffer: device.upload(image.as_raw()),
            width: image.width(),
            height: image.height(),
            source_channels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn source_channels(&self) -> usize {
        self.source_channels
    }

    fn to_gray(&self, ctx: &KernelContext) -> FeatureResult<GrayImage> {
        let pixels = self.buffer.view(ctx)?;
        Ok(GrayImage::new(self.width, self.height, pixels.to_vec())?)
    }
}

pub type DeviceKeypoints = DeviceBuffer<Keypoint>;

/// An algorithm bound to its device kernels
#[derive(Clone)]
pub struct DeviceAlgorithm {
    algorithm: Algorithm,
    inner: Arc<dyn FeatureAlgorithm>,
    kernels: Capabilities,
}

impl DeviceAlgorithm {
    pub fn new(algorithm: Algorithm, params: &FeatureParams) -> Self {
        Self {
            algorithm,
            inner: provider(algorithm, params),
            kernels: algorithm.capabilities(ExecutionTarget::Gpu),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn capabilities(&self) -> Capabilities {
        self.kernels
    }

    fn unsupported(&self, operation: Operation) -> FeatureError {
        FeatureError::unsupported(self.algorithm.name(), operation, ExecutionTarget::Gpu)
    }

    pub fn detect_async(
        &self,
        device: &Device,
        image: &DeviceImage,
    ) -> FeatureResult<Pending<DeviceKeypoints, FeatureError>> {
        if !self.kernels.detect {
            return Err(self.unsupported(Operation::Detect));
        }
        device.check(&image.buffer)?;

        let inner = Arc::clone(&self.inner);
        let image = image.clone();
        Ok(device.launch(move |ctx: &KernelContext| {
            let gray = image.to_gray(ctx)?;
            let keypoints = inner.detect(&gray)?;
            Ok(ctx.alloc(keypoints))
        }))
    }

    pub fn compute_async(
        &self,
        device: &Device,
        image: &DeviceImage,
        keypoints: &DeviceKeypoints,
    ) -> FeatureResult<Pending<DeviceDescriptors, FeatureError>> {
        if !self.kernels.compute {
            return Err(self.unsupported(Operation::Compute));
        }
        device.check(&image.buffer)?;
        device.check(keypoints)?;

        let inner = Arc::clone(&self.inner);
        let layout = self.algorithm.descriptor_layout();
        let image = image.clone();
        let keypoints = keypoints.clone();
        Ok(device.launch(move |ctx: &KernelContext| {
            let kps = keypoints.view(ctx)?;
            let set = if kps.is_empty() {
                let (kind, cols) = layout.unwrap_or((DescriptorKind::Float, 0));
                DescriptorSet::empty(kind, cols)
            } else {
                let gray = image.to_gray(ctx)?;
                inner.compute(&gray, kps)?
            };
            Ok(DeviceDescriptors::alloc(ctx, set))
        }))
    }

    /// Fused kernel; rejects images that were not three-channel on the host.
    pub fn detect_and_compute_async(
        &self,
        device: &Device,
        image: &DeviceImage,
    ) -> FeatureResult<Pending<(DeviceKeypoints, DeviceDescriptors), FeatureError>> {
        if !self.kernels.detect_and_compute {
            return Err(self.unsupported(Operation::DetectAndCompute));
        }
        if image.source_channels != COMBINED_KERNEL_CHANNELS {
            return Err(FeatureError::UnsupportedChannels {
                algorithm: self.algorithm.name(),
                operation: Operation::DetectAndCompute,
                expected: COMBINED_KERNEL_CHANNELS,
                actual: image.source_channels,
            });
        }
        device.check(&image.buffer)?;

        let inner = Arc::clone(&self.inner);
        let image = image.clone();
        Ok(device.launch(move |ctx: &KernelContext| {
            let gray = image.to_gray(ctx)?;
            let (keypoints, descriptors) = inner.detect_and_compute(&gray)?;
            Ok((ctx.alloc(keypoints), DeviceDescriptors::alloc(ctx, descriptors)))
        }))
    }
}
