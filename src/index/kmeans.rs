//! Lloyd k-means used by the coarse quantizer and the product quantizer

use super::{dot, normalize, IndexError};
use rand::rngs::StdRng;
use rand::seq::index::sample;

/// How points are compared to centroids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Metric {
    /// Spherical k-means: max inner product, centroids kept unit length
    InnerProduct,
    /// Classic k-means on squared euclidean distance
    L2,
}

/// Fit up to `k` centroids to `points`
///
/// `k` is clamped to the number of points. Initial centroids are distinct
/// points drawn with `rng`; a centroid whose cluster empties keeps its previous
/// position.
pub(crate) fn train(
    points: &[&[f32]],
    k: usize,
    iterations: usize,
    metric: Metric,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f32>>, IndexError> {
    if points.is_empty() || k == 0 {
        return Err(IndexError::NotEnoughTrainingData {
            needed: 1,
            got: points.len(),
        });
    }

    let dimension = points[0].len();
    let k = k.min(points.len());

    let mut centroids: Vec<Vec<f32>> = sample(rng, points.len(), k)
        .into_iter()
        .map(|i| points[i].to_vec())
        .collect();

    let mut assignment = vec![usize::MAX; points.len()];

    for iteration in 0..iterations.max(1) {
        let mut changed = false;
        for (slot, point) in assignment.iter_mut().zip(points) {
            let nearest = nearest(&centroids, point, metric);
            if *slot != nearest {
                *slot = nearest;
                changed = true;
            }
        }

        if !changed && iteration > 0 {
            break;
        }

        let mut sums = vec![vec![0.0f32; dimension]; k];
        let mut counts = vec![0usize; k];
        for (&cluster, point) in assignment.iter().zip(points) {
            counts[cluster] += 1;
            for (s, v) in sums[cluster].iter_mut().zip(point.iter()) {
                *s += v;
            }
        }

        for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
            if count == 0 {
                continue;
            }
            *centroid = sum.into_iter().map(|s| s / count as f32).collect();
            if metric == Metric::InnerProduct {
                normalize(centroid);
            }
        }
    }

    Ok(centroids)
}

/// Index of the closest centroid, lowest index on ties
pub(crate) fn nearest(centroids: &[Vec<f32>], point: &[f32], metric: Metric) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let score = match metric {
            Metric::InnerProduct => dot(centroid, point),
            Metric::L2 => -squared_l2(centroid, point),
        };
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    best
}

#[inline]
pub(crate) fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}
