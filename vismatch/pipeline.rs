use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use log::debug;
use vismatch_core::{DescriptorSet, DeviceDescriptors, ExecutionTarget, Image, Keypoint, Match};
use vismatch_features::FeatureEngine;
use vismatch_match::MatchEngine;

/// Keypoints of one image and their descriptor rows, row `i` describing
/// keypoint `i`
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFeatures {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: DescriptorSet,
}

impl ImageFeatures {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Matches between two images together with the keypoints they index
#[derive(Debug, Clone, PartialEq)]
pub struct Correspondences {
    pub query_keypoints: Vec<Keypoint>,
    pub train_keypoints: Vec<Keypoint>,
    pub matches: Vec<Match>,
}

impl Correspondences {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Matched keypoint pairs in match order. The fields are public, so
    /// matches indexing past either keypoint list are skipped.
    pub fn pairs(&self) -> impl Iterator<Item = (&Keypoint, &Keypoint, &Match)> + '_ {
        self.matches.iter().filter_map(move |m| {
            Some((
                self.query_keypoints.get(m.query_idx)?,
                self.train_keypoints.get(m.train_idx)?,
                m,
            ))
        })
    }
}

/// A feature engine and a match engine driven together.
///
/// When both run on the GPU they share one device, and descriptors are
/// matched where they were computed.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    features: FeatureEngine,
    matcher: MatchEngine,
    shared_device: bool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        let features = FeatureEngine::new(config.features.clone())?;
        let (matcher, shared_device) = match (config.matcher.target, features.device()) {
            (ExecutionTarget::Gpu, Some(device)) => (
                MatchEngine::with_device(config.matcher.clone(), device.clone())?,
                true,
            ),
            _ => (MatchEngine::new(config.matcher.clone())?, false),
        };
        debug!(
            "pipeline: {}; matcher {} on {}{}",
            config.features.summary(),
            config.matcher.metric,
            config.matcher.target,
            if shared_device { " (shared device)" } else { "" }
        );
        Ok(Self {
            config,
            features,
            matcher,
            shared_device,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn feature_engine(&self) -> &FeatureEngine {
        &self.features
    }

    pub fn match_engine(&self) -> &MatchEngine {
        &self.matcher
    }

    /// Extract and describe `image`, copying the results out of the engine.
    pub fn describe_image(&mut self, image: &Image) -> PipelineResult<ImageFeatures> {
        let (features, _) = self.run_features(image)?;
        Ok(features)
    }

    /// Match two sets of descriptors with the configured matcher
    pub fn match_features(&mut self, query: &ImageFeatures, train: &ImageFeatures) -> PipelineResult<Vec<Match>> {
        let matches = self.matcher.match_descriptors(
            &query.descriptors,
            &train.descriptors,
            self.config.use_ratio_filter,
        )?;
        Ok(matches.to_vec())
    }

    /// Describe both images and match query descriptors against train
    /// descriptors.
    pub fn correspond(&mut self, query: &Image, train: &Image) -> PipelineResult<Correspondences> {
        let (q, q_device) = self.run_features(query)?;
        let (t, t_device) = self.run_features(train)?;

        let matches = match (q_device, t_device) {
            (Some(q_device), Some(t_device)) if self.shared_device => {
                self.matcher.match_on_device(&q_device, &t_device)?.to_vec()
            }
            _ => self.match_features(&q, &t)?,
        };
        debug!(
            "{} correspondences between {} and {} keypoints",
            matches.len(),
            q.len(),
            t.len()
        );

        Ok(Correspondences {
            query_keypoints: q.keypoints,
            train_keypoints: t.keypoints,
            matches,
        })
    }

    fn run_features(&mut self, image: &Image) -> PipelineResult<(ImageFeatures, Option<DeviceDescriptors>)> {
        self.features.extract_and_describe(image)?;
        self.features.sync_from_device()?;
        let resident = self.features.device_descriptors().cloned();
        Ok((
            ImageFeatures {
                keypoints: self.features.keypoints().to_vec(),
                descriptors: self.features.descriptors().clone(),
            },
            resident,
        ))
    }
}
