//! Feature extraction and descriptor matching in one place.
//!
//! The engines live in their own crates; this crate re-exports them and adds
//! [`Pipeline`], which drives a [`FeatureEngine`] and a [`MatchEngine`]
//! together for the common "find correspondences between two images" case.
//!
//! ```no_run
//! use vismatch::{image_from_dynamic, Pipeline, PipelineConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let query = image_from_dynamic(&image::open("left.png")?)?;
//! let train = image_from_dynamic(&image::open("right.png")?)?;
//!
//! let mut pipeline = Pipeline::new(PipelineConfig::orb())?;
//! let correspondences = pipeline.correspond(&query, &train)?;
//! for (q, t, m) in correspondences.pairs() {
//!     println!("({:.1}, {:.1}) -> ({:.1}, {:.1}) d={}", q.x, q.y, t.x, t.y, m.distance);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod interop;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use interop::image_from_dynamic;
pub use pipeline::{Correspondences, ImageFeatures, Pipeline};

pub use vismatch_core::{
    init_thread_pool, DescriptorKind, DescriptorSet, Device, DeviceConfig, ErrorKind,
    ExecutionTarget, Image, ImageResult, Keypoint, Match,
};
pub use vismatch_features::{Algorithm, FeatureConfig, FeatureEngine, FeatureParams};
pub use vismatch_match::{DistanceMetric, MatchEngine, MatcherConfig, SearchMode};
