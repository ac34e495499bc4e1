use crate::algorithm::{provider, FeatureAlgorithm};
use crate::config::FeatureConfig;
use crate::error::{FeatureError, FeatureResult, Operation};
use crate::gpu::{DeviceAlgorithm, DeviceImage, DeviceKeypoints};
use log::{debug, warn};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use vismatch_core::device::panic_message;
use vismatch_core::{
    DescriptorKind, DescriptorSet, Device, DeviceDescriptors, ExecutionTarget, GrayImage, Image,
    Keypoint,
};

/// Progress of the engine's working buffers for the current image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Constructed,
    KeypointsReady,
    DescriptorsReady,
}

struct HostBackend {
    extractor: Arc<dyn FeatureAlgorithm>,
    descriptor: Arc<dyn FeatureAlgorithm>,
    /// One provider serves both roles, so its combined call may be tried
    combined: bool,
}

struct DeviceBackend {
    device: Device,
    extractor: DeviceAlgorithm,
    descriptor: DeviceAlgorithm,
    combined: bool,
    keypoints: Option<DeviceKeypoints>,
    descriptors: Option<DeviceDescriptors>,
}

enum Backend {
    Host(HostBackend),
    Device(DeviceBackend),
}

/// Keypoint extraction and description for one image at a time.
///
/// The algorithms and execution target are fixed at construction. Results
/// live in buffers owned by the engine and are overwritten by the next call,
/// so copy out what you need before reusing it.
///
/// On a GPU engine, keypoints and descriptors stay on the device until
/// [`sync_from_device`](Self::sync_from_device) is called; until then the
/// host accessors return empty collections.
pub struct FeatureEngine {
    target: ExecutionTarget,
    backend: Backend,
    layout: (DescriptorKind, usize),
    names: (&'static str, &'static str),
    keypoints: Vec<Keypoint>,
    descriptors: DescriptorSet,
    state: EngineState,
}

impl fmt::Debug for FeatureEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureEngine")
            .field("target", &self.target)
            .field("extractor", &self.names.0)
            .field("descriptor", &self.names.1)
            .field("state", &self.state)
            .field("keypoints", &self.keypoint_count())
            .finish()
    }
}

impl FeatureEngine {
    pub fn new(config: FeatureConfig) -> FeatureResult<Self> {
        config.validate()?;
        match config.target {
            ExecutionTarget::Cpu => {
                let extractor = provider(config.extractor, &config.params);
                let descriptor = if config.is_combined() {
                    Arc::clone(&extractor)
                } else {
                    provider(config.descriptor, &config.params)
                };
                debug!("{}", config.summary());
                Ok(Self::with_providers(extractor, descriptor))
            }
            ExecutionTarget::Gpu => {
                let device = Device::new(&config.device)?;
                Self::with_device(config, device)
            }
        }
    }

    /// GPU engine on an existing device, e.g. one shared with a matcher.
    pub fn with_device(config: FeatureConfig, device: Device) -> FeatureResult<Self> {
        let config = config.with_target(ExecutionTarget::Gpu);
        config.validate()?;
        debug!("{} on device {}", config.summary(), device.name());

        let extractor = DeviceAlgorithm::new(config.extractor, &config.params);
        let descriptor = if config.is_combined() {
            extractor.clone()
        } else {
            DeviceAlgorithm::new(config.descriptor, &config.params)
        };
        let layout = config
            .descriptor
            .descriptor_layout()
            .unwrap_or((DescriptorKind::Float, 0));

        Ok(Self {
            target: ExecutionTarget::Gpu,
            backend: Backend::Device(DeviceBackend {
                device,
                extractor,
                descriptor,
                combined: config.is_combined(),
                keypoints: None,
                descriptors: None,
            }),
            layout,
            names: (config.extractor.name(), config.descriptor.name()),
            keypoints: Vec::new(),
            descriptors: DescriptorSet::empty(layout.0, layout.1),
            state: EngineState::Constructed,
        })
    }

    /// CPU engine over caller-supplied providers.
    ///
    /// Passing the same `Arc` for both roles enables the combined path.
    pub fn with_providers(
        extractor: Arc<dyn FeatureAlgorithm>,
        descriptor: Arc<dyn FeatureAlgorithm>,
    ) -> Self {
        let layout = descriptor
            .descriptor_layout()
            .unwrap_or((DescriptorKind::Float, 0));
        let names = (extractor.name(), descriptor.name());
        let combined = Arc::ptr_eq(&extractor, &descriptor);
        Self {
            target: ExecutionTarget::Cpu,
            backend: Backend::Host(HostBackend {
                extractor,
                descriptor,
                combined,
            }),
            layout,
            names,
            keypoints: Vec::new(),
            descriptors: DescriptorSet::empty(layout.0, layout.1),
            state: EngineState::Constructed,
        }
    }

    pub fn target(&self) -> ExecutionTarget {
        self.target
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Host keypoints; empty on a GPU engine until synced
    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Host descriptors; empty on a GPU engine until synced
    pub fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }

    /// Keypoints produced by the last extraction, wherever they live
    pub fn keypoint_count(&self) -> usize {
        match &self.backend {
            Backend::Host(_) => self.keypoints.len(),
            Backend::Device(dev) => dev.keypoints.as_ref().map_or(0, |k| k.len()),
        }
    }

    pub fn device(&self) -> Option<&Device> {
        match &self.backend {
            Backend::Device(dev) => Some(&dev.device),
            Backend::Host(_) => None,
        }
    }

    pub fn device_keypoints(&self) -> Option<&DeviceKeypoints> {
        match &self.backend {
            Backend::Device(dev) => dev.keypoints.as_ref(),
            Backend::Host(_) => None,
        }
    }

    pub fn device_descriptors(&self) -> Option<&DeviceDescriptors> {
        match &self.backend {
            Backend::Device(dev) => dev.descriptors.as_ref(),
            Backend::Host(_) => None,
        }
    }

    /// Detect keypoints, discarding previous keypoints and descriptors.
    ///
    /// Returns the number of keypoints found. On failure the keypoint
    /// collection is left empty.
    pub fn extract(&mut self, image: &Image) -> FeatureResult<usize> {
        self.reset();
        match self.run_extract(image) {
            Ok(count) => {
                self.state = EngineState::KeypointsReady;
                Ok(count)
            }
            Err(err) => Err(self.fail(self.names.0, Operation::Detect, err)),
        }
    }

    /// Describe the keypoints currently held.
    ///
    /// With no keypoints this yields an empty matrix of the descriptor's
    /// layout. On failure the keypoints are kept and descriptors cleared.
    pub fn describe(&mut self, image: &Image) -> FeatureResult<usize> {
        self.clear_descriptors();
        match self.run_describe(image) {
            Ok(rows) => {
                self.state = EngineState::DescriptorsReady;
                Ok(rows)
            }
            Err(err) => {
                if self.state == EngineState::DescriptorsReady {
                    self.state = EngineState::KeypointsReady;
                }
                Err(self.fail(self.names.1, Operation::Compute, err))
            }
        }
    }

    /// Detect and describe in one pass when the algorithm allows it,
    /// otherwise (or when the combined call reports a capability mismatch)
    /// via [`extract`](Self::extract) then [`describe`](Self::describe).
    pub fn extract_and_describe(&mut self, image: &Image) -> FeatureResult<usize> {
        if self.is_combined() {
            self.reset();
            match self.run_combined(image) {
                Ok(count) => {
                    self.state = EngineState::DescriptorsReady;
                    return Ok(count);
                }
                Err(err) if err.is_fallback_eligible() => {
                    debug!(
                        "{} combined path unavailable ({}); falling back to extract + describe",
                        self.names.0, err
                    );
                }
                Err(err) => return Err(self.fail(self.names.0, Operation::DetectAndCompute, err)),
            }
        }

        self.extract(image)?;
        self.describe(image)?;
        Ok(self.keypoint_count())
    }

    /// Copy device keypoints to the host; no-op on a CPU engine.
    pub fn sync_keypoints_from_device(&mut self) -> FeatureResult<()> {
        if let Backend::Device(dev) = &self.backend {
            self.keypoints = match &dev.keypoints {
                Some(buffer) => {
                    debug!("downloading {} keypoints from {}", buffer.len(), dev.device.name());
                    dev.device.download(buffer)?
                }
                None => Vec::new(),
            };
        }
        Ok(())
    }

    /// Copy device descriptors to the host; no-op on a CPU engine.
    pub fn sync_descriptors_from_device(&mut self) -> FeatureResult<()> {
        if let Backend::Device(dev) = &self.backend {
            self.descriptors = match &dev.descriptors {
                Some(buffer) => {
                    debug!(
                        "downloading {}x{} descriptors from {}",
                        buffer.rows(),
                        buffer.cols(),
                        dev.device.name()
                    );
                    buffer.download(&dev.device)?
                }
                None => DescriptorSet::empty(self.layout.0, self.layout.1),
            };
        }
        Ok(())
    }

    pub fn sync_from_device(&mut self) -> FeatureResult<()> {
        self.sync_keypoints_from_device()?;
        self.sync_descriptors_from_device()
    }

    fn is_combined(&self) -> bool {
        match &self.backend {
            Backend::Host(host) => host.combined,
            Backend::Device(dev) => dev.combined,
        }
    }

    fn reset(&mut self) {
        self.keypoints.clear();
        if let Backend::Device(dev) = &mut self.backend {
            dev.keypoints = None;
        }
        self.clear_descriptors();
        self.state = EngineState::Constructed;
    }

    fn clear_descriptors(&mut self) {
        self.descriptors = DescriptorSet::empty(self.layout.0, self.layout.1);
        if let Backend::Device(dev) = &mut self.backend {
            dev.descriptors = None;
        }
    }

    fn fail(&mut self, algorithm: &'static str, operation: Operation, err: FeatureError) -> FeatureError {
        warn!("{} {} on {} failed: {}", algorithm, operation, self.target, err);
        if operation != Operation::Compute {
            self.reset();
        }
        err
    }

    fn run_extract(&mut self, image: &Image) -> FeatureResult<usize> {
        match &mut self.backend {
            Backend::Host(host) => {
                if !host.extractor.capabilities().detect {
                    return Err(FeatureError::unsupported(
                        host.extractor.name(),
                        Operation::Detect,
                        ExecutionTarget::Cpu,
                    ));
                }
                let gray = image.to_gray()?;
                let extractor = &host.extractor;
                self.keypoints = guarded(extractor.name(), Operation::Detect, || {
                    extractor.detect(&gray)
                })?;
                Ok(self.keypoints.len())
            }
            Backend::Device(dev) => {
                if !dev.extractor.capabilities().detect {
                    return Err(FeatureError::unsupported(
                        dev.extractor.algorithm().name(),
                        Operation::Detect,
                        ExecutionTarget::Gpu,
                    ));
                }
                let image = upload_gray(&dev.device, image)?;
                let keypoints = dev.extractor.detect_async(&dev.device, &image)?.wait()?;
                let count = keypoints.len();
                dev.keypoints = Some(keypoints);
                Ok(count)
            }
        }
    }

    fn run_describe(&mut self, image: &Image) -> FeatureResult<usize> {
        let layout = self.layout;
        match &mut self.backend {
            Backend::Host(host) => {
                let descriptor = &host.descriptor;
                if !descriptor.capabilities().compute {
                    return Err(FeatureError::unsupported(
                        descriptor.name(),
                        Operation::Compute,
                        ExecutionTarget::Cpu,
                    ));
                }
                if self.keypoints.is_empty() {
                    return Ok(0);
                }
                let gray = image.to_gray()?;
                let keypoints = &self.keypoints;
                let set = guarded(descriptor.name(), Operation::Compute, || {
                    descriptor.compute(&gray, keypoints)
                })?;
                check_rows(descriptor.name(), keypoints.len(), set.rows())?;
                self.descriptors = set;
                Ok(self.descriptors.rows())
            }
            Backend::Device(dev) => {
                if !dev.descriptor.capabilities().compute {
                    return Err(FeatureError::unsupported(
                        dev.descriptor.algorithm().name(),
                        Operation::Compute,
                        ExecutionTarget::Gpu,
                    ));
                }
                let keypoints = match &dev.keypoints {
                    Some(k) if !k.is_empty() => k.clone(),
                    _ => {
                        let empty = DescriptorSet::empty(layout.0, layout.1);
                        dev.descriptors = Some(empty.upload(&dev.device));
                        return Ok(0);
                    }
                };
                let image = upload_gray(&dev.device, image)?;
                let set = dev
                    .descriptor
                    .compute_async(&dev.device, &image, &keypoints)?
                    .wait()?;
                check_rows(dev.descriptor.algorithm().name(), keypoints.len(), set.rows())?;
                let rows = set.rows();
                dev.descriptors = Some(set);
                Ok(rows)
            }
        }
    }

    fn run_combined(&mut self, image: &Image) -> FeatureResult<usize> {
        match &mut self.backend {
            Backend::Host(host) => {
                let algorithm = &host.extractor;
                if !algorithm.capabilities().detect_and_compute {
                    return Err(FeatureError::unsupported(
                        algorithm.name(),
                        Operation::DetectAndCompute,
                        ExecutionTarget::Cpu,
                    ));
                }
                let gray = image.to_gray()?;
                let (keypoints, descriptors) =
                    guarded(algorithm.name(), Operation::DetectAndCompute, || {
                        algorithm.detect_and_compute(&gray)
                    })?;
                check_rows(algorithm.name(), keypoints.len(), descriptors.rows())?;
                self.keypoints = keypoints;
                self.descriptors = descriptors;
                Ok(self.keypoints.len())
            }
            Backend::Device(dev) => {
                if !dev.extractor.capabilities().detect_and_compute {
                    return Err(FeatureError::unsupported(
                        dev.extractor.algorithm().name(),
                        Operation::DetectAndCompute,
                        ExecutionTarget::Gpu,
                    ));
                }
                let image = upload_gray(&dev.device, image)?;
                let (keypoints, descriptors) = dev
                    .extractor
                    .detect_and_compute_async(&dev.device, &image)?
                    .wait()?;
                check_rows(
                    dev.extractor.algorithm().name(),
                    keypoints.len(),
                    descriptors.rows(),
                )?;
                let count = keypoints.len();
                dev.keypoints = Some(keypoints);
                dev.descriptors = Some(descriptors);
                Ok(count)
            }
        }
    }
}

/// Convert to gray on the host, then upload.
fn upload_gray(device: &Device, image: &Image) -> FeatureResult<DeviceImage> {
    let gray: GrayImage = image.to_gray()?;
    Ok(DeviceImage::upload(device, &gray, image.channels()))
}

fn check_rows(algorithm: &'static str, keypoints: usize, rows: usize) -> FeatureResult<()> {
    if keypoints != rows {
        return Err(FeatureError::RowCountMismatch {
            algorithm,
            keypoints,
            rows,
        });
    }
    Ok(())
}

/// Run a provider call, turning a panic into `FeatureError::Panicked`.
fn guarded<T>(
    algorithm: &'static str,
    operation: Operation,
    call: impl FnOnce() -> FeatureResult<T>,
) -> FeatureResult<T> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        Err(FeatureError::Panicked {
            algorithm,
            operation,
            message: panic_message(payload.as_ref()),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brief::BRIEF_BYTES;
    use crate::combined::OrbFeatures;
    use crate::config::{Algorithm, Capabilities, FeatureParams};
    use crate::gradient::GRADIENT_DIMS;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vismatch_core::{DeviceConfig, ErrorKind, PixelDepth};

    fn scene_gray(width: usize, height: usize) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let block = ((x / 10) * 31 + (y / 10) * 17) % 6;
            (block * 40 + 5) as u8
        })
    }

    fn scene_rgb(width: usize, height: usize) -> Image {
        let gray = scene_gray(width, height);
        let data = gray.as_raw().iter().flat_map(|&v| [v, v, v]).collect();
        Image::rgb(width, height, data).unwrap()
    }

    fn scene(width: usize, height: usize) -> Image {
        Image::gray(width, height, scene_gray(width, height).into_raw()).unwrap()
    }

    fn small_device() -> DeviceConfig {
        DeviceConfig {
            name: "engine-test".to_string(),
            threads: 2,
        }
    }

    /// ORB whose combined call reports a capability mismatch
    struct NoCombined {
        inner: OrbFeatures,
        combined_calls: AtomicUsize,
    }

    impl FeatureAlgorithm for NoCombined {
        fn name(&self) -> &'static str {
            "NoCombined"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::FULL
        }
        fn descriptor_layout(&self) -> Option<(DescriptorKind, usize)> {
            Some((DescriptorKind::Binary, BRIEF_BYTES))
        }
        fn detect(&self, image: &GrayImage) -> FeatureResult<Vec<Keypoint>> {
            self.inner.detect(image)
        }
        fn compute(&self, image: &GrayImage, keypoints: &[Keypoint]) -> FeatureResult<DescriptorSet> {
            self.inner.compute(image, keypoints)
        }
        fn detect_and_compute(&self, _image: &GrayImage) -> FeatureResult<(Vec<Keypoint>, DescriptorSet)> {
            self.combined_calls.fetch_add(1, Ordering::SeqCst);
            Err(FeatureError::unsupported(
                self.name(),
                Operation::DetectAndCompute,
                ExecutionTarget::Cpu,
            ))
        }
    }

    /// Combined call fails a structural precondition; detect counts calls
    struct BrokenInput {
        detect_calls: AtomicUsize,
    }

    impl FeatureAlgorithm for BrokenInput {
        fn name(&self) -> &'static str {
            "BrokenInput"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::FULL
        }
        fn detect(&self, _image: &GrayImage) -> FeatureResult<Vec<Keypoint>> {
            self.detect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        fn detect_and_compute(&self, image: &GrayImage) -> FeatureResult<(Vec<Keypoint>, DescriptorSet)> {
            Err(FeatureError::ImageTooSmall {
                algorithm: self.name(),
                width: image.width(),
                height: image.height(),
                min_size: 10_000,
            })
        }
    }

    struct Panicky;

    impl FeatureAlgorithm for Panicky {
        fn name(&self) -> &'static str {
            "Panicky"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::EXTRACTOR
        }
        fn detect(&self, _image: &GrayImage) -> FeatureResult<Vec<Keypoint>> {
            panic!("detector exploded")
        }
    }

    /// Always emits a single row
    struct ShortRows;

    impl FeatureAlgorithm for ShortRows {
        fn name(&self) -> &'static str {
            "ShortRows"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::DESCRIPTOR
        }
        fn compute(&self, _image: &GrayImage, _keypoints: &[Keypoint]) -> FeatureResult<DescriptorSet> {
            Ok(DescriptorSet::from_binary_rows(&[[0u8; 4]])?)
        }
    }

    #[test]
    fn test_extract_then_describe_rows_match() {
        let mut engine = FeatureEngine::new(FeatureConfig::orb()).unwrap();
        let image = scene(120, 90);
        let count = engine.extract(&image).unwrap();
        assert!(count > 0);
        assert_eq!(engine.state(), EngineState::KeypointsReady);
        let rows = engine.describe(&image).unwrap();
        assert_eq!(rows, count);
        assert_eq!(engine.descriptors().rows(), engine.keypoints().len());
        assert_eq!(engine.state(), EngineState::DescriptorsReady);
    }

    #[test]
    fn test_combined_equals_sequential() {
        for config in [FeatureConfig::orb(), FeatureConfig::gradient()] {
            let image = scene(120, 90);
            let mut combined = FeatureEngine::new(config.clone()).unwrap();
            combined.extract_and_describe(&image).unwrap();

            let mut sequential = FeatureEngine::new(config).unwrap();
            sequential.extract(&image).unwrap();
            sequential.describe(&image).unwrap();

            assert_eq!(combined.keypoints(), sequential.keypoints());
            assert_eq!(combined.descriptors(), sequential.descriptors());
        }
    }

    #[test]
    fn test_simulated_combined_failure_falls_back() {
        let flaky = Arc::new(NoCombined {
            inner: OrbFeatures::new(&FeatureParams::default()),
            combined_calls: AtomicUsize::new(0),
        });
        let mut engine = FeatureEngine::with_providers(flaky.clone(), flaky.clone());
        let image = scene(120, 90);
        let count = engine.extract_and_describe(&image).unwrap();
        assert_eq!(flaky.combined_calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state(), EngineState::DescriptorsReady);

        let mut reference = FeatureEngine::new(FeatureConfig::orb()).unwrap();
        assert_eq!(reference.extract_and_describe(&image).unwrap(), count);
        assert_eq!(engine.keypoints(), reference.keypoints());
        assert_eq!(engine.descriptors(), reference.descriptors());
    }

    #[test]
    fn test_precondition_failure_not_retried() {
        let broken = Arc::new(BrokenInput {
            detect_calls: AtomicUsize::new(0),
        });
        let mut engine = FeatureEngine::with_providers(broken.clone(), broken.clone());
        let err = engine.extract_and_describe(&scene(40, 40)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionViolation);
        assert_eq!(broken.detect_calls.load(Ordering::SeqCst), 0);
        assert!(engine.keypoints().is_empty());
        assert_eq!(engine.state(), EngineState::Constructed);
    }

    #[test]
    fn test_separate_algorithms_use_sequential_path() {
        let config = FeatureConfig::new(Algorithm::Fast, Algorithm::Brief);
        let mut engine = FeatureEngine::new(config).unwrap();
        let count = engine.extract_and_describe(&scene(120, 90)).unwrap();
        assert!(count > 0);
        assert_eq!(engine.descriptors().rows(), count);
        assert_eq!(engine.descriptors().cols(), BRIEF_BYTES);
    }

    #[test]
    fn test_describe_before_extract_is_empty() {
        let mut engine = FeatureEngine::new(FeatureConfig::gradient()).unwrap();
        assert_eq!(engine.describe(&scene(64, 64)).unwrap(), 0);
        assert!(engine.descriptors().is_empty());
        assert_eq!(engine.descriptors().kind(), DescriptorKind::Float);
        assert_eq!(engine.descriptors().cols(), GRADIENT_DIMS);
    }

    #[test]
    fn test_descriptor_only_algorithm_cannot_extract() {
        let config = FeatureConfig::new(Algorithm::Brief, Algorithm::Brief);
        let mut engine = FeatureEngine::new(config).unwrap();
        let err = engine.extract(&scene(64, 64)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        assert!(engine.keypoints().is_empty());
    }

    #[test]
    fn test_sixteen_bit_image_rejected() {
        let mut engine = FeatureEngine::new(FeatureConfig::orb()).unwrap();
        let image = Image::new(32, 32, 1, PixelDepth::U16, vec![0; 32 * 32 * 2]).unwrap();
        let err = engine.extract_and_describe(&image).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionViolation);
        assert!(engine.keypoints().is_empty());
    }

    #[test]
    fn test_provider_panic_is_contained() {
        let mut engine = FeatureEngine::with_providers(Arc::new(Panicky), Arc::new(ShortRows));
        let err = engine.extract(&scene(32, 32)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(matches!(err, FeatureError::Panicked { .. }));
        assert!(engine.keypoints().is_empty());
    }

    #[test]
    fn test_row_count_mismatch_reported() {
        let orb: Arc<dyn FeatureAlgorithm> = Arc::new(OrbFeatures::new(&FeatureParams::default()));
        let mut engine = FeatureEngine::with_providers(orb, Arc::new(ShortRows));
        let image = scene(120, 90);
        let count = engine.extract(&image).unwrap();
        assert!(count > 1);
        let err = engine.describe(&image).unwrap_err();
        assert!(matches!(err, FeatureError::RowCountMismatch { rows: 1, .. }));
        // keypoints survive a failed describe
        assert_eq!(engine.keypoints().len(), count);
        assert_eq!(engine.state(), EngineState::KeypointsReady);
    }

    #[test]
    fn test_new_extract_discards_descriptors() {
        let mut engine = FeatureEngine::new(FeatureConfig::orb()).unwrap();
        engine.extract_and_describe(&scene(120, 90)).unwrap();
        engine.extract(&scene(64, 64)).unwrap();
        assert!(engine.descriptors().is_empty());
        assert_eq!(engine.state(), EngineState::KeypointsReady);
    }

    #[test]
    fn test_cpu_sync_is_noop() {
        let mut engine = FeatureEngine::new(FeatureConfig::orb()).unwrap();
        engine.extract_and_describe(&scene(120, 90)).unwrap();
        let before = engine.keypoints().to_vec();
        engine.sync_from_device().unwrap();
        assert_eq!(engine.keypoints(), before.as_slice());
        assert!(engine.device_keypoints().is_none());
    }

    #[test]
    fn test_gpu_results_stay_on_device_until_sync() {
        let config = FeatureConfig::orb().on_gpu().with_device(small_device());
        let mut engine = FeatureEngine::new(config).unwrap();
        let image = scene_rgb(120, 90);
        let count = engine.extract_and_describe(&image).unwrap();
        assert!(count > 0);
        assert!(engine.keypoints().is_empty());
        assert!(engine.descriptors().is_empty());
        assert_eq!(engine.keypoint_count(), count);

        let stats = engine.device().unwrap().stats();
        assert_eq!(stats.downloads, 0);

        engine.sync_from_device().unwrap();
        assert_eq!(engine.keypoints().len(), count);
        assert_eq!(engine.descriptors().rows(), count);
        assert_eq!(engine.device().unwrap().stats().downloads, 2);
    }

    #[test]
    fn test_gpu_matches_cpu_after_sync() {
        let image = scene_rgb(120, 90);
        let mut cpu = FeatureEngine::new(FeatureConfig::orb()).unwrap();
        cpu.extract_and_describe(&image).unwrap();

        let gpu_config = FeatureConfig::orb().on_gpu().with_device(small_device());
        let mut gpu = FeatureEngine::new(gpu_config).unwrap();
        gpu.extract_and_describe(&image).unwrap();
        gpu.sync_from_device().unwrap();

        assert_eq!(gpu.keypoints(), cpu.keypoints());
        assert_eq!(gpu.descriptors(), cpu.descriptors());
    }

    #[test]
    fn test_gpu_gray_input_falls_back() {
        // gray input fails the three-channel combined kernel; the fallback
        // works for Gradient, which has a device compute kernel
        let config = FeatureConfig::gradient().on_gpu().with_device(small_device());
        let mut engine = FeatureEngine::new(config).unwrap();
        let count = engine.extract_and_describe(&scene(120, 90)).unwrap();
        engine.sync_from_device().unwrap();
        assert_eq!(engine.keypoints().len(), count);
        assert_eq!(engine.descriptors().rows(), count);
        assert_eq!(engine.state(), EngineState::DescriptorsReady);
    }

    #[test]
    fn test_gpu_orb_gray_fallback_reports_missing_compute() {
        let config = FeatureConfig::orb().on_gpu().with_device(small_device());
        let mut engine = FeatureEngine::new(config).unwrap();
        let err = engine.extract_and_describe(&scene(120, 90)).unwrap_err();
        assert!(matches!(
            err,
            FeatureError::UnsupportedOperation {
                operation: Operation::Compute,
                target: ExecutionTarget::Gpu,
                ..
            }
        ));
        // extraction from the fallback survives
        assert!(engine.keypoint_count() > 0);
        assert_eq!(engine.state(), EngineState::KeypointsReady);
    }

    #[test]
    fn test_gpu_orb_describe_unsupported() {
        let config = FeatureConfig::orb().on_gpu().with_device(small_device());
        let mut engine = FeatureEngine::new(config).unwrap();
        let err = engine.describe(&scene_rgb(64, 64)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn test_engine_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FeatureEngine>();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_describe_rows_equal_keypoints(seed in 0u32..1000, width in 40usize..96, height in 40usize..96) {
            let gray = GrayImage::from_fn(width, height, |x, y| {
                let v = (x as u32 * 31 + y as u32 * 57 + seed * 13) ^ (x as u32 * y as u32 + seed);
                (v % 251) as u8
            });
            let image = Image::gray(width, height, gray.into_raw()).unwrap();
            let mut engine = FeatureEngine::new(FeatureConfig::orb()).unwrap();
            let count = engine.extract(&image).unwrap();
            let rows = engine.describe(&image).unwrap();
            prop_assert_eq!(rows, count);
            prop_assert_eq!(engine.descriptors().rows(), engine.keypoints().len());
        }
    }
}
