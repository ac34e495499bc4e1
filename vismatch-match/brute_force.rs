//! Exhaustive search over descriptor views.
//!
//! Every function compares each query row with every train row under one
//! metric. Ties always resolve to the lowest train (or query) index, so the
//! output depends only on the inputs.

use crate::config::DistanceMetric;
use crate::distance::distance;
use rayon::prelude::*;
use vismatch_core::{DescriptorView, Match};

/// Lowe's ratio threshold for rejecting ambiguous matches
pub const LOWE_RATIO: f32 = 0.75;

/// The two closest train rows for one query row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPair {
    pub best: Match,
    pub second: Option<Match>,
}

impl NearestPair {
    /// The best match if it passes Lowe's test at `ratio`
    pub fn accept(&self, ratio: f32) -> Option<Match> {
        let second = self.second?;
        (second.distance > 0.0 && self.best.distance / second.distance < ratio).then_some(self.best)
    }
}

fn nearest_in(metric: DistanceMetric, row: usize, from: DescriptorView<'_>, to: DescriptorView<'_>) -> Option<Match> {
    let q = from.row(row);
    let mut best: Option<Match> = None;
    for t in 0..to.rows() {
        let d = distance(metric, q, to.row(t));
        if best.map_or(true, |b| d < b.distance) {
            best = Some(Match::new(row, t, d));
        }
    }
    best
}

/// Single nearest train row for every query row
pub fn nearest(metric: DistanceMetric, query: DescriptorView<'_>, train: DescriptorView<'_>) -> Vec<Match> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }
    (0..query.rows())
        .into_par_iter()
        .filter_map(|q| nearest_in(metric, q, query, train))
        .collect()
}

/// Two nearest train rows for every query row (k = 2)
pub fn nearest_two(
    metric: DistanceMetric,
    query: DescriptorView<'_>,
    train: DescriptorView<'_>,
) -> Vec<NearestPair> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }
    (0..query.rows())
        .into_par_iter()
        .filter_map(|qi| {
            let q = query.row(qi);
            let mut best: Option<Match> = None;
            let mut second: Option<Match> = None;
            for ti in 0..train.rows() {
                let m = Match::new(qi, ti, distance(metric, q, train.row(ti)));
                if best.map_or(true, |b| m.distance < b.distance) {
                    second = best;
                    best = Some(m);
                } else if second.map_or(true, |s| m.distance < s.distance) {
                    second = Some(m);
                }
            }
            best.map(|best| NearestPair { best, second })
        })
        .collect()
}

/// Nearest neighbours accepted only when `best / second < ratio`.
///
/// Query rows with no second candidate are skipped. A zero second distance
/// means two exact duplicates in the train set and is rejected.
pub fn ratio_test(
    metric: DistanceMetric,
    query: DescriptorView<'_>,
    train: DescriptorView<'_>,
    ratio: f32,
) -> Vec<Match> {
    if train.rows() < 2 {
        return Vec::new();
    }
    nearest_two(metric, query, train)
        .into_iter()
        .filter_map(|pair| pair.accept(ratio))
        .collect()
}

/// Mutual nearest neighbours: `(q, t)` survives only if `t` is nearest to
/// `q` and `q` is nearest to `t`.
pub fn cross_check(metric: DistanceMetric, query: DescriptorView<'_>, train: DescriptorView<'_>) -> Vec<Match> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }
    let forward = nearest(metric, query, train);
    let backward: Vec<Option<usize>> = (0..train.rows())
        .into_par_iter()
        .map(|t| nearest_in(metric, t, train, query).map(|m| m.train_idx))
        .collect();

    forward
        .into_iter()
        .filter(|m| backward[m.train_idx] == Some(m.query_idx))
        .collect()
}
