//! Nearest-neighbour snapping over an R-tree.
//!
//! Distances are planar (degree space); ties resolve to the lowest index in
//! the indexed point set so repeated runs snap identically.

use rstar::primitives::GeomWithData;
use rstar::RTree;
use shift_core::{GeoPoint, ShiftError, ShiftResult};

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// The closest indexed point to a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestMatch {
    /// Position of the match in the indexed slice.
    pub index: usize,
    pub point: GeoPoint,
    /// Squared planar distance in degrees².
    pub distance_sq: f64,
}

/// Bulk-loaded R-tree over a fixed point set.
pub struct PointIndex {
    tree: RTree<IndexedPoint>,
    points: Vec<GeoPoint>,
}

impl PointIndex {
    pub fn new(points: &[GeoPoint]) -> Self {
        let entries = points
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedPoint::new(p.to_array(), i))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
            points: points.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Closest indexed point, lowest index among equidistant candidates.
    pub fn nearest(&self, query: &GeoPoint) -> Option<NearestMatch> {
        let q = query.to_array();
        let mut candidates = self.tree.nearest_neighbor_iter_with_distance_2(&q);
        let (first, best) = candidates.next()?;
        let mut index = first.data;
        for (candidate, distance_sq) in candidates {
            if distance_sq > best {
                break;
            }
            index = index.min(candidate.data);
        }
        Some(NearestMatch {
            index,
            point: self.points[index],
            distance_sq: best,
        })
    }
}

/// For every target, the closest point of `source`.
///
/// Fails with [`ShiftError::EmptyGraph`] when `source` is empty and targets exist.
pub fn nearest(source: &[GeoPoint], targets: &[GeoPoint]) -> ShiftResult<Vec<NearestMatch>> {
    if targets.is_empty() {
        return Ok(Vec::new());
    }
    if source.is_empty() {
        return Err(ShiftError::EmptyGraph(format!(
            "no source points to match {} targets against",
            targets.len()
        )));
    }
    let index = PointIndex::new(source);
    targets
        .iter()
        .map(|t| {
            index.nearest(t).ok_or_else(|| {
                ShiftError::EmptyGraph("nearest-neighbour index is empty".to_string())
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_basic() {
        let source = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(10.0, 0.0),
            GeoPoint::new(0.0, 10.0),
        ];
        let targets = vec![GeoPoint::new(9.0, 1.0), GeoPoint::new(1.0, 8.0)];
        let matches = nearest(&source, &targets).unwrap();
        assert_eq!(matches[0].index, 1);
        assert_eq!(matches[1].index, 2);
        assert!((matches[0].distance_sq - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_tie_prefers_lowest_index() {
        let source = vec![
            GeoPoint::new(2.0, 0.0),
            GeoPoint::new(-1.0, 0.0),
            GeoPoint::new(1.0, 0.0),
        ];
        let matches = nearest(&source, &[GeoPoint::new(0.0, 0.0)]).unwrap();
        // -1 and 1 are both at distance 1
        assert_eq!(matches[0].index, 1);
    }

    #[test]
    fn test_duplicate_points_tie() {
        let p = GeoPoint::new(3.0, 3.0);
        let source = vec![GeoPoint::new(9.0, 9.0), p, p, p];
        let matches = nearest(&source, &[p]).unwrap();
        assert_eq!(matches[0].index, 1);
        assert_eq!(matches[0].distance_sq, 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(nearest(&[GeoPoint::new(0.0, 0.0)], &[]).unwrap().is_empty());
        let err = nearest(&[], &[GeoPoint::new(0.0, 0.0)]).unwrap_err();
        assert!(matches!(err, ShiftError::EmptyGraph(_)));
    }
}
