//! Geographic value types shared by clustering, the builder and the graph.
//!
//! Two distance notions are used on purpose:
//! - **planar** (`distance_sq_deg`): squared Euclidean distance in degree
//!   space. Clustering and nearest-neighbour snapping work in this space.
//! - **geodesic** (`haversine`): metres on the sphere, used for edge lengths
//!   and metric thresholds.

use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

use crate::error::{ShiftError, ShiftResult};
use crate::units::Meters;

/// A (longitude, latitude) pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    #[inline]
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Construct a point, rejecting coordinates outside the WGS84 range.
    pub fn try_new(longitude: f64, latitude: f64) -> ShiftResult<Self> {
        if !(-180.0..=180.0).contains(&longitude) || !(-90.0..=90.0).contains(&latitude) {
            return Err(ShiftError::InvalidInput(format!(
                "coordinate ({longitude}, {latitude}) is outside lon [-180, 180] / lat [-90, 90]"
            )));
        }
        Ok(Self::new(longitude, latitude))
    }

    /// Both coordinates are finite numbers.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.longitude.is_finite() && self.latitude.is_finite()
    }

    #[inline]
    pub fn to_array(self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }

    #[inline]
    pub fn from_array(coords: [f64; 2]) -> Self {
        Self::new(coords[0], coords[1])
    }

    /// Squared Euclidean distance in degree space.
    #[inline]
    pub fn distance_sq_deg(&self, other: &GeoPoint) -> f64 {
        let dx = self.longitude - other.longitude;
        let dy = self.latitude - other.latitude;
        dx * dx + dy * dy
    }

    /// Great-circle distance in metres.
    pub fn haversine(&self, other: &GeoPoint) -> Meters {
        let a = Point::new(self.longitude, self.latitude);
        let b = Point::new(other.longitude, other.latitude);
        Meters(Haversine.distance(a, b))
    }

    /// Point at fraction `t` along the straight segment `self -> other`.
    pub fn lerp(&self, other: &GeoPoint, t: f64) -> GeoPoint {
        GeoPoint::new(
            self.longitude + (other.longitude - self.longitude) * t,
            self.latitude + (other.latitude - self.latitude) * t,
        )
    }

    /// Arithmetic mean of a set of points. `None` for an empty slice.
    pub fn centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let (sx, sy) = points
            .iter()
            .fold((0.0, 0.0), |(x, y), p| (x + p.longitude, y + p.latitude));
        Some(GeoPoint::new(sx / n, sy / n))
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.longitude, self.latitude)
    }
}

/// Project `p` onto segment `a -> b` in degree space.
///
/// Returns the clamped projection and its parameter `t` in `[0, 1]`.
pub fn project_onto_segment(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> (GeoPoint, f64) {
    let dx = b.longitude - a.longitude;
    let dy = b.latitude - a.latitude;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return (*a, 0.0);
    }
    let t = (((p.longitude - a.longitude) * dx + (p.latitude - a.latitude) * dy) / len_sq)
        .clamp(0.0, 1.0);
    (a.lerp(b, t), t)
}

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: GeoPoint,
    pub max: GeoPoint,
}

impl BoundingBox {
    /// Smallest box containing every point. `None` for an empty slice.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut min = *first;
        let mut max = *first;
        for p in &points[1..] {
            min.longitude = min.longitude.min(p.longitude);
            min.latitude = min.latitude.min(p.latitude);
            max.longitude = max.longitude.max(p.longitude);
            max.latitude = max.latitude.max(p.latitude);
        }
        Some(Self { min, max })
    }

    /// Grow the box on every side by a metric buffer.
    pub fn buffered(&self, buffer: Meters) -> Self {
        let d = buffer.to_degrees();
        Self {
            min: GeoPoint::new(self.min.longitude - d, self.min.latitude - d),
            max: GeoPoint::new(self.max.longitude + d, self.max.latitude + d),
        }
    }

    pub fn contains(&self, p: &GeoPoint) -> bool {
        (self.min.longitude..=self.max.longitude).contains(&p.longitude)
            && (self.min.latitude..=self.max.latitude).contains(&p.latitude)
    }

    pub fn width_deg(&self) -> f64 {
        self.max.longitude - self.min.longitude
    }

    pub fn height_deg(&self) -> f64 {
        self.max.latitude - self.min.latitude
    }
}

/// Geometry of a parcel as delivered by the data-acquisition side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParcelGeometry {
    Point(GeoPoint),
    Polygon(Vec<GeoPoint>),
}

/// A building footprint or lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub name: String,
    pub geometry: ParcelGeometry,
}

impl Parcel {
    pub fn new(name: impl Into<String>, geometry: ParcelGeometry) -> Self {
        Self {
            name: name.into(),
            geometry,
        }
    }

    /// The single point used for clustering: the point itself, or the polygon's vertex centroid.
    pub fn representative_point(&self) -> ShiftResult<GeoPoint> {
        match &self.geometry {
            ParcelGeometry::Point(p) => Ok(*p),
            ParcelGeometry::Polygon(ring) => GeoPoint::centroid(ring).ok_or_else(|| {
                ShiftError::InvalidInput(format!("parcel '{}' has an empty polygon", self.name))
            }),
        }
    }
}

/// Representative points for a parcel list, failing on the first empty polygon.
pub fn parcel_points(parcels: &[Parcel]) -> ShiftResult<Vec<GeoPoint>> {
    parcels.iter().map(Parcel::representative_point).collect()
}

/// A group of points served by one transformer site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterGroup {
    pub center: GeoPoint,
    pub points: Vec<GeoPoint>,
}

impl ClusterGroup {
    pub fn new(center: GeoPoint, points: Vec<GeoPoint>) -> Self {
        Self { center, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_new_rejects_out_of_range() {
        assert!(GeoPoint::try_new(-97.33, 32.75).is_ok());
        assert!(matches!(
            GeoPoint::try_new(200.0, 0.0),
            Err(ShiftError::InvalidInput(_))
        ));
        assert!(GeoPoint::try_new(0.0, -91.0).is_err());
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 1.0);
        let d = a.haversine(&b).value();
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");
    }

    #[test]
    fn test_projection_clamps() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);

        let (p, t) = project_onto_segment(&GeoPoint::new(0.25, 0.5), &a, &b);
        assert!((t - 0.25).abs() < 1e-12);
        assert_eq!(p, GeoPoint::new(0.25, 0.0));

        let (p, t) = project_onto_segment(&GeoPoint::new(-3.0, 1.0), &a, &b);
        assert_eq!(t, 0.0);
        assert_eq!(p, a);
    }

    #[test]
    fn test_bounding_box_buffer() {
        let pts = [GeoPoint::new(1.0, 2.0), GeoPoint::new(3.0, 1.0)];
        let bbox = BoundingBox::from_points(&pts).unwrap();
        assert_eq!(bbox.min, GeoPoint::new(1.0, 1.0));
        assert_eq!(bbox.max, GeoPoint::new(3.0, 2.0));

        let grown = bbox.buffered(Meters(crate::units::METERS_PER_DEGREE));
        assert!((grown.min.longitude - 0.0).abs() < 1e-12);
        assert!((grown.max.latitude - 3.0).abs() < 1e-12);
        assert!(BoundingBox::from_points(&[]).is_none());
    }

    #[test]
    fn test_parcel_representative_point() {
        let square = Parcel::new(
            "lot-1",
            ParcelGeometry::Polygon(vec![
                GeoPoint::new(0.0, 0.0),
                GeoPoint::new(2.0, 0.0),
                GeoPoint::new(2.0, 2.0),
                GeoPoint::new(0.0, 2.0),
            ]),
        );
        assert_eq!(square.representative_point().unwrap(), GeoPoint::new(1.0, 1.0));

        let empty = Parcel::new("lot-2", ParcelGeometry::Polygon(vec![]));
        assert!(matches!(
            parcel_points(&[square, empty]),
            Err(ShiftError::InvalidInput(msg)) if msg.contains("lot-2")
        ));
    }

    #[test]
    fn test_parcel_geometry_untagged_json() {
        let parcel: Parcel =
            serde_json::from_str(r#"{"name":"p","geometry":{"longitude":1.0,"latitude":2.0}}"#)
                .unwrap();
        assert_eq!(parcel.geometry, ParcelGeometry::Point(GeoPoint::new(1.0, 2.0)));
    }
}
