use crate::config::DistanceMetric;
use vismatch_core::RowRef;

/// Distance between two rows of the same kind and width.
///
/// Callers validate kind, width and metric support up front; a pairing
/// that slips through (Hamming on float rows, mixed kinds) is reported as
/// infinitely far so it can never be selected.
#[inline]
pub fn distance(metric: DistanceMetric, a: RowRef<'_>, b: RowRef<'_>) -> f32 {
    match (a, b) {
        (RowRef::Binary(a), RowRef::Binary(b)) => match metric {
            DistanceMetric::L1 => l1_u8(a, b),
            DistanceMetric::L2 => l2_u8(a, b),
            DistanceMetric::Hamming => hamming(a, b) as f32,
            DistanceMetric::Hamming2 => hamming2(a, b) as f32,
        },
        (RowRef::Float(a), RowRef::Float(b)) => match metric {
            DistanceMetric::L1 => l1_f32(a, b),
            DistanceMetric::L2 => l2_f32(a, b),
            DistanceMetric::Hamming | DistanceMetric::Hamming2 => f32::INFINITY,
        },
        _ => f32::INFINITY,
    }
}

pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Bits are grouped in pairs; a pair counts once if either bit differs.
pub fn hamming2(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let v = x ^ y;
            ((v | (v >> 1)) & 0x55).count_ones()
        })
        .sum()
}

fn l1_u8(a: &[u8], b: &[u8]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| x.abs_diff(y) as u32)
        .sum::<u32>() as f32
}

fn l2_u8(a: &[u8], b: &[u8]) -> f32 {
    let sq: u32 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x.abs_diff(y) as u32;
            d * d
        })
        .sum();
    (sq as f32).sqrt()
}

fn l1_f32(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

fn l2_f32(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hamming_counts_bits() {
        assert_eq!(hamming(&[0b1010_1010], &[0b0101_0101]), 8);
        assert_eq!(hamming(&[0xff, 0x00], &[0xff, 0x01]), 1);
    }

    #[test]
    fn test_hamming2_counts_cells() {
        // both bits of one cell differ: one cell
        assert_eq!(hamming2(&[0b0000_0011], &[0]), 1);
        // one bit in each of two cells
        assert_eq!(hamming2(&[0b0000_0110], &[0]), 2);
        assert_eq!(hamming2(&[0xff], &[0]), 4);
    }

    #[test]
    fn test_float_metrics() {
        let a = RowRef::Float(&[0.0, 0.0]);
        let b = RowRef::Float(&[3.0, 4.0]);
        assert_eq!(distance(DistanceMetric::L2, a, b), 5.0);
        assert_eq!(distance(DistanceMetric::L1, a, b), 7.0);
        assert_eq!(distance(DistanceMetric::Hamming, a, b), f32::INFINITY);
    }

    #[test]
    fn test_binary_l2_uses_byte_values() {
        let a = RowRef::Binary(&[0, 10]);
        let b = RowRef::Binary(&[3, 14]);
        assert_eq!(distance(DistanceMetric::L2, a, b), 5.0);
        assert_eq!(distance(DistanceMetric::L1, a, b), 7.0);
    }

    proptest! {
        #[test]
        fn prop_binary_distances_symmetric(a in prop::collection::vec(any::<u8>(), 32), b in prop::collection::vec(any::<u8>(), 32)) {
            for metric in [DistanceMetric::L1, DistanceMetric::L2, DistanceMetric::Hamming, DistanceMetric::Hamming2] {
                let ab = distance(metric, RowRef::Binary(&a), RowRef::Binary(&b));
                let ba = distance(metric, RowRef::Binary(&b), RowRef::Binary(&a));
                prop_assert_eq!(ab, ba);
                prop_assert!(ab >= 0.0);
            }
            prop_assert_eq!(distance(DistanceMetric::Hamming, RowRef::Binary(&a), RowRef::Binary(&a)), 0.0);
        }

        #[test]
        fn prop_float_distances_symmetric(a in prop::collection::vec(-100.0f32..100.0, 8), b in prop::collection::vec(-100.0f32..100.0, 8)) {
            for metric in [DistanceMetric::L1, DistanceMetric::L2] {
                let ab = distance(metric, RowRef::Float(&a), RowRef::Float(&b));
                let ba = distance(metric, RowRef::Float(&b), RowRef::Float(&a));
                prop_assert!((ab - ba).abs() <= 1e-4 * ab.max(1.0));
                prop_assert!(ab >= 0.0);
            }
        }
    }
}
