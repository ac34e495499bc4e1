//! Keypoint extraction and description.
//!
//! [`FeatureEngine`] runs one configured algorithm over an image on the CPU
//! or on an accelerator [`Device`](vismatch_core::Device), and hides whether
//! that algorithm detects and describes in one pass or in two.
//!
//! ```no_run
//! use vismatch_core::Image;
//! use vismatch_features::{FeatureConfig, FeatureEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let image = Image::gray(640, 480, vec![0; 640 * 480])?;
//! let mut engine = FeatureEngine::new(FeatureConfig::orb().with_max_features(1000))?;
//! let count = engine.extract_and_describe(&image)?;
//! assert_eq!(engine.descriptors().rows(), count);
//! # Ok(())
//! # }
//! ```

pub mod algorithm;
pub mod brief;
pub mod combined;
pub mod config;
pub mod engine;
pub mod error;
pub mod fast;
pub mod gpu;
pub mod gradient;
pub mod harris;
pub mod pyramid;
pub mod refinement;

pub use algorithm::{provider, FeatureAlgorithm};
pub use brief::{BriefDescriptor, BRIEF_BYTES};
pub use combined::{GradientFeatures, OrbFeatures};
pub use config::{Algorithm, Capabilities, FeatureConfig, FeatureParams};
pub use engine::{EngineState, FeatureEngine};
pub use error::{FeatureError, FeatureResult, Operation};
pub use fast::FastDetector;
pub use gpu::{DeviceAlgorithm, DeviceImage, DeviceKeypoints, COMBINED_KERNEL_CHANNELS};
pub use gradient::{GradientDescriptor, GRADIENT_DIMS};
pub use harris::HarrisDetector;
pub use pyramid::{ImagePyramid, ScaleLevel};
pub use refinement::KeypointRefinement;
