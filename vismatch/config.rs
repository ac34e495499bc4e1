use crate::error::{PipelineError, PipelineResult};
use vismatch_features::FeatureConfig;
use vismatch_match::{DistanceMetric, MatcherConfig};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Settings for both engines of a [`Pipeline`](crate::Pipeline)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// Apply Lowe's ratio test when the matcher is not cross-checking
    pub use_ratio_filter: bool,
    pub features: FeatureConfig,
    pub matcher: MatcherConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::orb()
    }
}

impl PipelineConfig {
    /// Build a pipeline config whose metric suits the descriptor algorithm
    pub fn new(features: FeatureConfig) -> Self {
        let metric = features
            .descriptor
            .descriptor_layout()
            .map(|(kind, _)| DistanceMetric::for_kind(kind))
            .unwrap_or_default();
        Self {
            use_ratio_filter: true,
            features,
            matcher: MatcherConfig::new(metric),
        }
    }

    /// ORB features matched by Hamming distance
    pub fn orb() -> Self {
        Self::new(FeatureConfig::orb())
    }

    /// Gradient-histogram features matched by L2 distance
    pub fn gradient() -> Self {
        Self::new(FeatureConfig::gradient())
    }

    pub fn with_matcher(mut self, matcher: MatcherConfig) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_ratio_filter(mut self, use_ratio_filter: bool) -> Self {
        self.use_ratio_filter = use_ratio_filter;
        self
    }

    /// Run both engines on the GPU target
    pub fn on_gpu(mut self) -> Self {
        self.features = self.features.on_gpu();
        self.matcher = self.matcher.on_gpu();
        self
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.features.validate()?;
        self.matcher.validate()?;
        let (kind, _) = self.features.descriptor.descriptor_layout().ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "{} does not compute descriptors",
                self.features.descriptor
            ))
        })?;
        if !self.matcher.metric.supports(kind) {
            return Err(PipelineError::InvalidConfig(format!(
                "{} distance cannot compare {} descriptors from {}",
                self.matcher.metric, kind, self.features.descriptor
            )));
        }
        Ok(())
    }

    /// Serialize to JSON string
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON string
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML string
    #[cfg(feature = "serde")]
    pub fn to_toml(&self) -> PipelineResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Deserialize from TOML string
    #[cfg(feature = "serde")]
    pub fn from_toml(toml_str: &str) -> PipelineResult<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }
}
