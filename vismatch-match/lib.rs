//! Descriptor matching.
//!
//! [`MatchEngine`] pairs query descriptor rows with train rows under a fixed
//! [`DistanceMetric`], optionally keeping only mutual nearest neighbours or
//! filtering ambiguous matches with Lowe's ratio test. CPU searches are
//! exhaustive by default; [`SearchMode::KdTree`] indexes L2 train rows in a
//! KD-tree instead.

pub mod brute_force;
pub mod config;
pub mod distance;
pub mod engine;
pub mod error;
pub mod kdtree;

pub use brute_force::{NearestPair, LOWE_RATIO};
pub use config::{DistanceMetric, MatcherConfig, SearchMode};
pub use engine::{MatchEngine, MatchStrategy};
pub use error::{MatchError, MatchResult};
