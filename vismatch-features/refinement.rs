use crate::pyramid::ScaleLevel;
use std::cmp::Ordering;
use std::collections::HashMap;
use vismatch_core::{GrayImage, Keypoint};

/// Keypoint selection and orientation shared by the detectors
pub struct KeypointRefinement;

impl KeypointRefinement {
    /// Greedy non-maximum suppression: strongest first, dropping any point
    /// closer than `min_distance` to one already kept.
    pub fn non_maximum_suppression(keypoints: &[Keypoint], min_distance: f32) -> Vec<Keypoint> {
        if keypoints.is_empty() {
            return Vec::new();
        }

        let mut sorted = keypoints.to_vec();
        sorted.sort_by(Self::by_strength);
        if min_distance <= 0.0 {
            return sorted;
        }

        let min_distance_sq = min_distance * min_distance;
        let cell_of = |kp: &Keypoint| {
            (
                (kp.x / min_distance).floor() as i64,
                (kp.y / min_distance).floor() as i64,
            )
        };

        // Grid of kept points; a suppressor is always within one cell.
        let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        let mut kept: Vec<Keypoint> = Vec::new();

        for candidate in sorted {
            let (cx, cy) = cell_of(&candidate);
            let suppressed = (-1..=1).any(|dy| {
                (-1..=1).any(|dx| {
                    grid.get(&(cx + dx, cy + dy)).is_some_and(|ids| {
                        ids.iter().any(|&i| {
                            let ddx = candidate.x - kept[i].x;
                            let ddy = candidate.y - kept[i].y;
                            ddx * ddx + ddy * ddy < min_distance_sq
                        })
                    })
                })
            });

            if !suppressed {
                grid.entry((cx, cy)).or_default().push(kept.len());
                kept.push(candidate);
            }
        }

        kept
    }

    /// Keep the `n` strongest keypoints in a deterministic order.
    pub fn retain_best(keypoints: &mut Vec<Keypoint>, n: usize) {
        keypoints.sort_by(Self::by_strength);
        keypoints.truncate(n);
    }

    /// Descending response; ties broken by octave then raster position
    fn by_strength(a: &Keypoint, b: &Keypoint) -> Ordering {
        b.response
            .total_cmp(&a.response)
            .then(a.octave.cmp(&b.octave))
            .then(a.y.total_cmp(&b.y))
            .then(a.x.total_cmp(&b.x))
    }

    /// Keep pixels whose score beats every 8-neighbour.
    ///
    /// `scores` is a row-major map of `width * height`; zero means "no
    /// candidate". Plateaus resolve to their first pixel in raster order.
    pub fn local_maxima(scores: &[f32], width: usize, height: usize) -> Vec<(usize, usize, f32)> {
        let mut maxima = Vec::new();
        if width < 3 || height < 3 {
            return maxima;
        }
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let s = scores[y * width + x];
                if s <= 0.0 {
                    continue;
                }
                let mut is_max = true;
                'window: for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let ny = (y as i64 + dy) as usize;
                        let nx = (x as i64 + dx) as usize;
                        let n = scores[ny * width + nx];
                        let earlier = dy < 0 || (dy == 0 && dx < 0);
                        if n > s || (n == s && earlier) {
                            is_max = false;
                            break 'window;
                        }
                    }
                }
                if is_max {
                    maxima.push((x, y, s));
                }
            }
        }
        maxima
    }

    /// Turn one level's candidates (level coordinates) into oriented
    /// keypoints expressed in base-image coordinates.
    pub fn finalize_level(
        candidates: Vec<Keypoint>,
        level: &ScaleLevel,
        image: &GrayImage,
        nms_distance: f32,
        patch_size: usize,
    ) -> Vec<Keypoint> {
        Self::non_maximum_suppression(&candidates, nms_distance)
            .into_iter()
            .map(|kp| {
                let angle = Self::compute_orientation(image, kp.x, kp.y, patch_size);
                Keypoint::new(kp.x * level.scale, kp.y * level.scale)
                    .with_octave(level.level as u32)
                    .with_size(patch_size as f32 * level.scale)
                    .with_angle(angle)
                    .with_response(kp.response)
            })
            .collect()
    }

    /// Orientation by the intensity centroid of a circular patch.
    pub fn compute_orientation(img: &GrayImage, x: f32, y: f32, patch_size: usize) -> f32 {
        let half = (patch_size / 2) as i64;
        let radius_sq = half * half;
        let (cx, cy) = (x.round() as i64, y.round() as i64);
        let mut m10 = 0i64;
        let mut m01 = 0i64;

        for dy in -half..=half {
            for dx in -half..=half {
                if dx * dx + dy * dy > radius_sq {
                    continue;
                }
                let v = img.get_clamped(cx + dx, cy + dy) as i64;
                m10 += dx * v;
                m01 += dy * v;
            }
        }

        if m10 == 0 && m01 == 0 {
            0.0
        } else {
            (m01 as f32).atan2(m10 as f32)
        }
    }
}
