//! k-means clustering of geographic points.
//!
//! Lloyd relocation in degree space with k-means++ seeding. Every returned
//! group is non-empty: a cluster that loses all members is reseeded with the
//! point farthest from its current centre (taken from a cluster that can
//! spare it).
//!
//! ```
//! use shift_algo::cluster::{kmeans, KMeansConfig};
//! use shift_core::GeoPoint;
//!
//! let points = vec![
//!     GeoPoint::new(0.0, 0.0),
//!     GeoPoint::new(0.0, 0.001),
//!     GeoPoint::new(1.0, 1.0),
//!     GeoPoint::new(1.0, 1.001),
//! ];
//! let groups = kmeans(&points, &KMeansConfig::new(2).with_seed(7))?;
//! assert_eq!(groups.len(), 2);
//! assert!(groups.iter().all(|g| g.len() == 2));
//! # Ok::<(), shift_core::ShiftError>(())
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use shift_core::{ClusterGroup, GeoPoint, ShiftError, ShiftResult};
use tracing::debug;

/// Parameters for [`kmeans`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansConfig {
    /// Requested number of clusters, clamped to the number of points.
    pub k: usize,
    pub max_iterations: usize,
    /// Stop once no centre moves farther than this (degrees).
    pub tolerance: f64,
    /// Fixed seed for reproducible runs; entropy when `None`.
    pub seed: Option<u64>,
}

impl KMeansConfig {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iterations: 300,
            tolerance: 1e-9,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// How the number of clusters is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterSizing {
    /// A fixed cluster count.
    Count(usize),
    /// Aim for this many points per cluster.
    TargetSize(usize),
}

/// Resolve a [`ClusterSizing`] into a cluster count for `n_points` points.
pub fn cluster_count_for(n_points: usize, sizing: ClusterSizing) -> ShiftResult<usize> {
    if n_points == 0 {
        return Err(ShiftError::InvalidInput(
            "cannot size clusters for an empty point set".to_string(),
        ));
    }
    match sizing {
        ClusterSizing::Count(0) | ClusterSizing::TargetSize(0) => Err(ShiftError::InvalidInput(
            format!("cluster sizing must be positive, got {sizing:?}"),
        )),
        ClusterSizing::Count(k) => Ok(k.min(n_points)),
        ClusterSizing::TargetSize(size) => Ok(n_points.div_ceil(size)),
    }
}

/// Labels and centres produced by [`kmeans_labels`].
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    pub centers: Vec<GeoPoint>,
    /// Cluster index for each input point.
    pub labels: Vec<usize>,
}

impl Clustering {
    /// Materialise the clustering as groups of member points.
    pub fn into_groups(self, points: &[GeoPoint]) -> Vec<ClusterGroup> {
        let mut members: Vec<Vec<GeoPoint>> = vec![Vec::new(); self.centers.len()];
        for (point, &label) in points.iter().zip(&self.labels) {
            members[label].push(*point);
        }
        self.centers
            .into_iter()
            .zip(members)
            .map(|(center, points)| ClusterGroup::new(center, points))
            .collect()
    }
}

/// Partition `points` into non-empty groups.
pub fn kmeans(points: &[GeoPoint], config: &KMeansConfig) -> ShiftResult<Vec<ClusterGroup>> {
    Ok(kmeans_labels(points, config)?.into_groups(points))
}

/// Run k-means and return per-point labels alongside the centres.
pub fn kmeans_labels(points: &[GeoPoint], config: &KMeansConfig) -> ShiftResult<Clustering> {
    if points.is_empty() {
        return Err(ShiftError::InvalidInput(
            "cannot cluster an empty point set".to_string(),
        ));
    }
    if config.k == 0 {
        return Err(ShiftError::InvalidInput(
            "cluster count must be at least 1".to_string(),
        ));
    }
    let k = config.k.min(points.len());
    let mut rng = config
        .seed
        .map(StdRng::seed_from_u64)
        .unwrap_or_else(StdRng::from_entropy);

    let mut centers = init_plus_plus(points, k, &mut rng);
    let mut labels = vec![usize::MAX; points.len()];
    let tol_sq = config.tolerance * config.tolerance;

    for iteration in 0..config.max_iterations.max(1) {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let label = closest_center(p, &centers);
            if labels[i] != label {
                labels[i] = label;
                changed = true;
            }
        }
        reseed_empty(points, &centers, &mut labels, k);

        let updated = centroids(points, &labels, k);
        let shift = centers
            .iter()
            .zip(&updated)
            .map(|(a, b)| a.distance_sq_deg(b))
            .fold(0.0, f64::max);
        centers = updated;

        if !changed || shift <= tol_sq {
            debug!(iteration, k, "k-means converged");
            break;
        }
    }

    Ok(Clustering { centers, labels })
}

fn closest_center(p: &GeoPoint, centers: &[GeoPoint]) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (c, center) in centers.iter().enumerate() {
        let d = p.distance_sq_deg(center);
        if d < best_d {
            best = c;
            best_d = d;
        }
    }
    best
}

/// k-means++: the first centre uniformly, the rest with probability
/// proportional to squared distance from the nearest chosen centre.
fn init_plus_plus(points: &[GeoPoint], k: usize, rng: &mut StdRng) -> Vec<GeoPoint> {
    let mut centers = Vec::with_capacity(k);
    centers.push(points[rng.gen_range(0..points.len())]);
    let mut dist: Vec<f64> = points.iter().map(|p| p.distance_sq_deg(&centers[0])).collect();

    while centers.len() < k {
        let total: f64 = dist.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut pick = points.len() - 1;
            for (i, d) in dist.iter().enumerate() {
                if target < *d {
                    pick = i;
                    break;
                }
                target -= d;
            }
            pick
        } else {
            // all remaining points coincide with a centre
            rng.gen_range(0..points.len())
        };
        let center = points[chosen];
        for (d, p) in dist.iter_mut().zip(points) {
            *d = d.min(p.distance_sq_deg(&center));
        }
        centers.push(center);
    }
    centers
}

fn reseed_empty(points: &[GeoPoint], centers: &[GeoPoint], labels: &mut [usize], k: usize) {
    let mut counts = vec![0usize; k];
    for &l in labels.iter() {
        counts[l] += 1;
    }
    for empty in 0..k {
        if counts[empty] > 0 {
            continue;
        }
        let donor = labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| counts[l] > 1)
            .map(|(i, &l)| (i, points[i].distance_sq_deg(&centers[l])))
            .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
                Some((_, bd)) if bd >= d => best,
                _ => Some((i, d)),
            });
        if let Some((i, _)) = donor {
            counts[labels[i]] -= 1;
            labels[i] = empty;
            counts[empty] = 1;
        }
    }
}

fn centroids(points: &[GeoPoint], labels: &[usize], k: usize) -> Vec<GeoPoint> {
    let mut sums = vec![(0.0, 0.0, 0usize); k];
    for (p, &l) in points.iter().zip(labels) {
        sums[l].0 += p.longitude;
        sums[l].1 += p.latitude;
        sums[l].2 += 1;
    }
    sums.into_iter()
        .map(|(x, y, n)| {
            let n = n.max(1) as f64;
            GeoPoint::new(x / n, y / n)
        })
        .collect()
}
