//! Seeded k-means clustering and silhouette evaluation
//!
//! k-means++ seeding and Lloyd iterations over standardized profile
//! features. All randomness comes from a caller-supplied seed, and the
//! parallel kernels only map over points in order, so a fixed seed and
//! input always give the same assignment.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Maximum Lloyd iterations per fit
const MAX_ITERATIONS: usize = 100;

/// Result of one k-means fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansFit {
    pub k: usize,
    pub centroids: Vec<Vec<f64>>,
    pub assignments: Vec<usize>,
    pub inertia: f64,
    pub iterations: usize,
}

/// Euclidean distance between two vectors
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same length");
    squared_distance(a, b).sqrt()
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_distance(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// k-means++ initial centroids
fn seed_centroids(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].clone());

    let mut dist: Vec<f64> = points
        .iter()
        .map(|p| squared_distance(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = dist.iter().sum();
        let idx = if total <= 0.0 {
            // every point coincides with a centroid
            rng.gen_range(0..points.len())
        } else {
            let mut target = rng.gen_range(0.0..total);
            let mut chosen = points.len() - 1;
            for (i, d) in dist.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        };
        let next = points[idx].clone();
        for (d, p) in dist.iter_mut().zip(points) {
            *d = d.min(squared_distance(p, &next));
        }
        centroids.push(next);
    }
    centroids
}

/// Fit k-means with k-means++ seeding.
///
/// `points` must be non-empty and `k` at least 1; `k` is clamped to the
/// number of points.
pub fn kmeans(points: &[Vec<f64>], k: usize, seed: u64) -> KMeansFit {
    let k = k.clamp(1, points.len().max(1));
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = seed_centroids(points, k, &mut rng);
    let mut assignments = vec![usize::MAX; points.len()];
    let mut iterations = 0;

    while iterations < MAX_ITERATIONS {
        iterations += 1;
        let next: Vec<usize> = points
            .par_iter()
            .map(|p| nearest(p, &centroids).0)
            .collect();
        let changed = next != assignments;
        assignments = next;
        if !changed {
            break;
        }

        let dim = points[0].len();
        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (p, &c) in points.iter().zip(&assignments) {
            counts[c] += 1;
            for (s, v) in sums[c].iter_mut().zip(p) {
                *s += v;
            }
        }
        for c in 0..k {
            if counts[c] == 0 {
                // Re-seed an empty cluster at the point farthest from its centroid
                let far = points
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (i, squared_distance(p, &centroids[assignments[i]])))
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                centroids[c] = points[far].clone();
            } else {
                centroids[c] = sums[c].iter().map(|s| s / counts[c] as f64).collect();
            }
        }
    }

    let inertia = points
        .par_iter()
        .zip(assignments.par_iter())
        .map(|(p, &c)| squared_distance(p, &centroids[c]))
        .sum();

    KMeansFit {
        k,
        centroids,
        assignments,
        inertia,
        iterations,
    }
}

/// Indices evaluated by [`silhouette`]; all points when below `max_sample`.
pub fn silhouette_sample(n: usize, max_sample: usize, seed: u64) -> Vec<usize> {
    if n <= max_sample {
        return (0..n).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut idx = rand::seq::index::sample(&mut rng, n, max_sample).into_vec();
    idx.sort_unstable();
    idx
}

/// Mean silhouette coefficient over `sample`, in [-1, 1].
///
/// Points alone in their cluster (within the sample) score 0. Fewer than two
/// populated clusters gives 0.
pub fn silhouette(points: &[Vec<f64>], assignments: &[usize], k: usize, sample: &[usize]) -> f64 {
    if sample.len() < 2 {
        return 0.0;
    }
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
    for &i in sample {
        members[assignments[i]].push(i);
    }
    if members.iter().filter(|m| !m.is_empty()).count() < 2 {
        return 0.0;
    }

    let scores: Vec<f64> = sample
        .par_iter()
        .map(|&i| {
            let own = assignments[i];
            if members[own].len() < 2 {
                return 0.0;
            }
            let mut a = 0.0;
            let mut b = f64::INFINITY;
            for (c, group) in members.iter().enumerate() {
                if group.is_empty() {
                    continue;
                }
                let total: f64 = group
                    .iter()
                    .filter(|&&j| j != i)
                    .map(|&j| euclidean_distance(&points[i], &points[j]))
                    .sum();
                if c == own {
                    a = total / (group.len() - 1) as f64;
                } else {
                    b = b.min(total / group.len() as f64);
                }
            }
            let denom = a.max(b);
            if denom <= 0.0 || !b.is_finite() {
                0.0
            } else {
                (b - a) / denom
            }
        })
        .collect();

    scores.iter().sum::<f64>() / scores.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<Vec<f64>> {
        let mut points = Vec::new();
        for (cx, cy) in [(0.0, 0.0), (10.0, 10.0), (0.0, 10.0)] {
            for i in 0..20 {
                let jitter = (i as f64 * 0.37).sin() * 0.3;
                points.push(vec![cx + jitter, cy - jitter]);
            }
        }
        points
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_kmeans_recovers_blobs() {
        let points = blobs();
        let fit = kmeans(&points, 3, 7);
        // each ground-truth blob maps to exactly one cluster
        for blob in 0..3 {
            let first = fit.assignments[blob * 20];
            assert!(fit.assignments[blob * 20..(blob + 1) * 20]
                .iter()
                .all(|&a| a == first));
        }
        let distinct: std::collections::BTreeSet<_> = fit.assignments.iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_kmeans_deterministic_for_seed() {
        let points = blobs();
        let a = kmeans(&points, 3, 42);
        let b = kmeans(&points, 3, 42);
        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.centroids, b.centroids);
    }

    #[test]
    fn test_kmeans_clamps_k() {
        let points = vec![vec![0.0], vec![1.0]];
        let fit = kmeans(&points, 5, 1);
        assert_eq!(fit.k, 2);
    }

    #[test]
    fn test_silhouette_high_for_separated_blobs() {
        let points = blobs();
        let fit = kmeans(&points, 3, 7);
        let sample = silhouette_sample(points.len(), 1000, 0);
        let s = silhouette(&points, &fit.assignments, fit.k, &sample);
        assert!(s > 0.9, "silhouette {s}");
    }

    #[test]
    fn test_silhouette_single_cluster_is_zero() {
        let points = blobs();
        let assignments = vec![0; points.len()];
        let sample = silhouette_sample(points.len(), 1000, 0);
        assert_eq!(silhouette(&points, &assignments, 1, &sample), 0.0);
    }

    #[test]
    fn test_silhouette_sample_capped_and_sorted() {
        let s = silhouette_sample(10_000, 100, 3);
        assert_eq!(s.len(), 100);
        assert!(s.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(s, silhouette_sample(10_000, 100, 3));
    }
}
