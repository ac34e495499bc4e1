//! KD-tree nearest-neighbour search under the L2 metric.
//!
//! Trees are compiled for a fixed set of row widths. Every function returns
//! `None` when the rows cannot be indexed (unsupported width, or an axis with
//! more equal values than a leaf bucket holds) and the caller searches
//! exhaustively instead. Candidate distances are recomputed with the same
//! kernel the exhaustive search uses, so results agree with it exactly.

use crate::brute_force::NearestPair;
use crate::config::DistanceMetric;
use crate::distance::distance;
use kiddo::{KdTree, SquaredEuclidean};
use rayon::prelude::*;
use vismatch_core::{DescriptorView, Match, RowRef};

/// Leaf capacity of `kiddo::KdTree`. A leaf whose points all share one
/// coordinate on its split axis cannot be split.
const BUCKET_SIZE: usize = 32;

/// Row widths with a tree layout
pub const TREE_WIDTHS: [usize; 9] = [1, 2, 3, 4, 8, 16, 32, 64, 128];

macro_rules! for_width {
    ($cols:expr, $search:ident($($arg:expr),*)) => {
        match $cols {
            1 => $search::<1>($($arg),*),
            2 => $search::<2>($($arg),*),
            3 => $search::<3>($($arg),*),
            4 => $search::<4>($($arg),*),
            8 => $search::<8>($($arg),*),
            16 => $search::<16>($($arg),*),
            32 => $search::<32>($($arg),*),
            64 => $search::<64>($($arg),*),
            128 => $search::<128>($($arg),*),
            _ => None,
        }
    };
}

fn point<const K: usize>(row: RowRef<'_>) -> [f32; K] {
    let mut p = [0.0; K];
    match row {
        RowRef::Float(r) => p.iter_mut().zip(r).for_each(|(p, &v)| *p = v),
        RowRef::Binary(r) => p.iter_mut().zip(r).for_each(|(p, &v)| *p = v as f32),
    }
    p
}

fn value(row: RowRef<'_>, col: usize) -> f32 {
    let v = match row {
        RowRef::Float(r) => r[col],
        RowRef::Binary(r) => r[col] as f32,
    };
    // -0.0 and 0.0 are one position in the tree
    v + 0.0
}

/// No axis repeats a value more often than a leaf can hold.
fn fits_buckets(rows: DescriptorView<'_>) -> bool {
    if rows.rows() <= BUCKET_SIZE {
        return true;
    }
    (0..rows.cols()).into_par_iter().all(|col| {
        let mut column: Vec<f32> = (0..rows.rows()).map(|r| value(rows.row(r), col)).collect();
        column.sort_by(f32::total_cmp);
        let mut run = 0;
        let mut prev = None;
        for v in column {
            run = if prev == Some(v) { run + 1 } else { 1 };
            if run > BUCKET_SIZE {
                return false;
            }
            prev = Some(v);
        }
        true
    })
}

/// Up to `k` nearest `train` rows for every `query` row, closest first,
/// ties by lowest train index.
fn knn_with<const K: usize>(query: DescriptorView<'_>, train: DescriptorView<'_>, k: usize) -> Option<Vec<Vec<Match>>> {
    if !fits_buckets(train) {
        return None;
    }
    let mut tree: KdTree<f32, K> = KdTree::new();
    for t in 0..train.rows() {
        tree.add(&point::<K>(train.row(t)), t as u64);
    }

    let neighbours = (0..query.rows())
        .into_par_iter()
        .map(|qi| {
            let q = query.row(qi);
            let mut found: Vec<Match> = tree
                .nearest_n::<SquaredEuclidean>(&point::<K>(q), k)
                .into_iter()
                .map(|n| {
                    let ti = n.item as usize;
                    Match::new(qi, ti, distance(DistanceMetric::L2, q, train.row(ti)))
                })
                .collect();
            found.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.train_idx.cmp(&b.train_idx)));
            found
        })
        .collect();
    Some(neighbours)
}

fn knn(query: DescriptorView<'_>, train: DescriptorView<'_>, k: usize) -> Option<Vec<Vec<Match>>> {
    if query.is_empty() || train.is_empty() {
        return Some(Vec::new());
    }
    for_width!(train.cols(), knn_with(query, train, k))
}

/// Whether rows of `cols` columns can be indexed under `metric`
pub fn supports(metric: DistanceMetric, cols: usize) -> bool {
    metric == DistanceMetric::L2 && TREE_WIDTHS.contains(&cols)
}

/// Single nearest train row for every query row
pub fn nearest(query: DescriptorView<'_>, train: DescriptorView<'_>) -> Option<Vec<Match>> {
    let found = knn(query, train, 1)?;
    Some(found.into_iter().filter_map(|n| n.first().copied()).collect())
}

/// Two nearest train rows for every query row (k = 2)
pub fn nearest_two(query: DescriptorView<'_>, train: DescriptorView<'_>) -> Option<Vec<NearestPair>> {
    let found = knn(query, train, 2)?;
    Some(
        found
            .into_iter()
            .filter_map(|n| {
                let best = *n.first()?;
                Some(NearestPair {
                    best,
                    second: n.get(1).copied(),
                })
            })
            .collect(),
    )
}

/// Nearest neighbours accepted only when `best / second < ratio`
pub fn ratio_test(query: DescriptorView<'_>, train: DescriptorView<'_>, ratio: f32) -> Option<Vec<Match>> {
    if train.rows() < 2 {
        return Some(Vec::new());
    }
    let pairs = nearest_two(query, train)?;
    Some(pairs.into_iter().filter_map(|pair| pair.accept(ratio)).collect())
}

/// Mutual nearest neighbours, one tree per direction
pub fn cross_check(query: DescriptorView<'_>, train: DescriptorView<'_>) -> Option<Vec<Match>> {
    let forward = nearest(query, train)?;
    let mut backward = vec![None; train.rows()];
    for m in nearest(train, query)? {
        backward[m.query_idx] = Some(m.train_idx);
    }
    Some(
        forward
            .into_iter()
            .filter(|m| backward[m.train_idx] == Some(m.query_idx))
            .collect(),
    )
}
