use crate::brute_force::{self, LOWE_RATIO};
use crate::config::{DistanceMetric, MatcherConfig, SearchMode};
use crate::kdtree;
use crate::error::{MatchError, MatchResult};
use log::{debug, warn};
use std::fmt;
use vismatch_core::{
    DescriptorKind, DescriptorSet, Device, DeviceDescriptors, ExecutionTarget, KernelContext, Match,
};

/// How a `match_descriptors` call will pair rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStrategy {
    /// Single nearest neighbour computed on the device
    DeviceNearest,
    /// Mutual nearest neighbours
    CrossCheck,
    /// Two nearest neighbours filtered by Lowe's ratio
    RatioTest,
    /// Single nearest neighbour, unfiltered
    Nearest,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStrategy::DeviceNearest => write!(f, "device nearest-neighbour"),
            MatchStrategy::CrossCheck => write!(f, "cross-check"),
            MatchStrategy::RatioTest => write!(f, "ratio test ({})", LOWE_RATIO),
            MatchStrategy::Nearest => write!(f, "nearest-neighbour"),
        }
    }
}

/// Descriptor matcher with a fixed metric, cross-check flag and target.
///
/// The match buffer is owned by the engine and replaced on every call.
pub struct MatchEngine {
    config: MatcherConfig,
    device: Option<Device>,
    matches: Vec<Match>,
}

impl fmt::Debug for MatchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchEngine")
            .field("config", &self.config)
            .field("matches", &self.matches.len())
            .finish()
    }
}

impl MatchEngine {
    pub fn new(config: MatcherConfig) -> MatchResult<Self> {
        config.validate()?;
        let device = match config.target {
            ExecutionTarget::Gpu => Some(Device::new(&config.device)?),
            ExecutionTarget::Cpu => None,
        };
        debug!(
            "match engine: metric={}, cross_check={}, search={}, target={}",
            config.metric, config.cross_check, config.search, config.target
        );
        Ok(Self {
            config,
            device,
            matches: Vec::new(),
        })
    }

    /// GPU engine on an existing device, e.g. the one features were
    /// extracted on.
    pub fn with_device(config: MatcherConfig, device: Device) -> MatchResult<Self> {
        let config = config.with_target(ExecutionTarget::Gpu);
        config.validate()?;
        Ok(Self {
            config,
            device: Some(device),
            matches: Vec::new(),
        })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// Matches from the last call
    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    /// Move the last result out, leaving the engine's buffer empty.
    pub fn take_matches(&mut self) -> Vec<Match> {
        std::mem::take(&mut self.matches)
    }

    /// Strategy a call with `use_ratio_filter` would use, by priority:
    /// device, cross-check, ratio test, plain nearest neighbour.
    pub fn strategy(&self, use_ratio_filter: bool) -> MatchStrategy {
        if self.device.is_some() {
            MatchStrategy::DeviceNearest
        } else if self.config.cross_check {
            MatchStrategy::CrossCheck
        } else if use_ratio_filter {
            MatchStrategy::RatioTest
        } else {
            MatchStrategy::Nearest
        }
    }

    /// Match `query` rows against `train` rows.
    ///
    /// Either side empty yields no matches. Rows must agree in kind and
    /// width and the metric must support their kind. The device path
    /// ignores `use_ratio_filter` and the cross-check flag.
    pub fn match_descriptors(
        &mut self,
        query: &DescriptorSet,
        train: &DescriptorSet,
        use_ratio_filter: bool,
    ) -> MatchResult<&[Match]> {
        self.matches.clear();
        if query.is_empty() || train.is_empty() {
            return Ok(&self.matches);
        }

        let strategy = self.strategy(use_ratio_filter);
        debug!(
            "matching {} query rows against {} train rows: {}",
            query.rows(),
            train.rows(),
            strategy
        );

        let outcome = check_compatible(
            self.config.metric,
            (query.kind(), query.cols()),
            (train.kind(), train.cols()),
        )
        .and_then(|()| self.run(strategy, query, train));

        match outcome {
            Ok(matches) => {
                self.matches = matches;
                Ok(&self.matches)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Match descriptors that already live on this engine's device, without
    /// uploading anything. Single nearest neighbour only.
    pub fn match_on_device(
        &mut self,
        query: &DeviceDescriptors,
        train: &DeviceDescriptors,
    ) -> MatchResult<&[Match]> {
        self.matches.clear();
        let device = match &self.device {
            Some(device) => device.clone(),
            None => {
                return Err(self.fail(MatchError::UnsupportedOperation {
                    operation: "matching device-resident descriptors",
                    target: self.config.target,
                }))
            }
        };
        if query.is_empty() || train.is_empty() {
            return Ok(&self.matches);
        }

        let outcome = check_compatible(
            self.config.metric,
            (query.kind(), query.cols()),
            (train.kind(), train.cols()),
        )
        .and_then(|()| nearest_on_device(&device, self.config.metric, query.clone(), train.clone()));

        match outcome {
            Ok(matches) => {
                self.matches = matches;
                Ok(&self.matches)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn run(&self, strategy: MatchStrategy, query: &DescriptorSet, train: &DescriptorSet) -> MatchResult<Vec<Match>> {
        let metric = self.config.metric;
        if self.config.search == SearchMode::KdTree && strategy != MatchStrategy::DeviceNearest {
            if let Some(matches) = tree_search(strategy, query, train) {
                return Ok(matches);
            }
            debug!(
                "no KD-tree layout for {} {}-column rows, searching exhaustively",
                train.rows(),
                train.cols()
            );
        }
        match strategy {
            MatchStrategy::DeviceNearest => {
                let device = self.device.as_ref().ok_or(MatchError::UnsupportedOperation {
                    operation: "device matching",
                    target: self.config.target,
                })?;
                let (q, t) = (query.upload(device), train.upload(device));
                nearest_on_device(device, metric, q, t)
            }
            MatchStrategy::CrossCheck => Ok(brute_force::cross_check(metric, query.view(), train.view())),
            MatchStrategy::RatioTest => Ok(brute_force::ratio_test(
                metric,
                query.view(),
                train.view(),
                LOWE_RATIO,
            )),
            MatchStrategy::Nearest => Ok(brute_force::nearest(metric, query.view(), train.view())),
        }
    }

    fn fail(&self, err: MatchError) -> MatchError {
        warn!("descriptor matching on {} failed: {}", self.config.target, err);
        err
    }
}

/// `None` when the train rows cannot be indexed
fn tree_search(strategy: MatchStrategy, query: &DescriptorSet, train: &DescriptorSet) -> Option<Vec<Match>> {
    let (query, train) = (query.view(), train.view());
    match strategy {
        MatchStrategy::CrossCheck => kdtree::cross_check(query, train),
        MatchStrategy::RatioTest => kdtree::ratio_test(query, train, LOWE_RATIO),
        MatchStrategy::Nearest => kdtree::nearest(query, train),
        MatchStrategy::DeviceNearest => None,
    }
}

fn check_compatible(
    metric: DistanceMetric,
    query: (DescriptorKind, usize),
    train: (DescriptorKind, usize),
) -> MatchResult<()> {
    if query.0 != train.0 {
        return Err(MatchError::KindMismatch {
            query: query.0,
            train: train.0,
        });
    }
    if query.1 != train.1 {
        return Err(MatchError::WidthMismatch {
            query: query.1,
            train: train.1,
        });
    }
    if !metric.supports(query.0) {
        return Err(MatchError::MetricMismatch {
            metric,
            kind: query.0,
        });
    }
    Ok(())
}

/// Nearest-neighbour kernel over device-resident sets; the result is
/// downloaded once the kernel completes.
fn nearest_on_device(
    device: &Device,
    metric: DistanceMetric,
    query: DeviceDescriptors,
    train: DeviceDescriptors,
) -> MatchResult<Vec<Match>> {
    let pending = device.launch(move |ctx: &KernelContext| -> MatchResult<_> {
        let matches = brute_force::nearest(metric, query.view(ctx)?, train.view(ctx)?);
        Ok(ctx.alloc(matches))
    });
    let buffer = pending.wait()?;
    debug!("downloading {} matches from {}", buffer.len(), device.name());
    Ok(device.download(&buffer)?)
}
