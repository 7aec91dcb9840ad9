//! Local planar projection for metric distance comparisons.

use geo::Coord;

use crate::models::GeoPoint;

/// Mean Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Spherical azimuthal equidistant projection around a fixed center.
///
/// Distances from the center are exact and distances between points a few
/// kilometers apart are accurate to well under a meter, which is all the
/// short-radius matching needs. Output coordinates are meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalProjection {
    center: GeoPoint,
    sin_lat0: f64,
    cos_lat0: f64,
}

impl LocalProjection {
    pub fn new(center: GeoPoint) -> Self {
        let lat0 = center.lat.to_radians();
        Self {
            center,
            sin_lat0: lat0.sin(),
            cos_lat0: lat0.cos(),
        }
    }

    /// Center at the mean of `points`, or (0, 0) when empty
    pub fn centered_on<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a GeoPoint>,
    {
        let (mut lat, mut lon, mut n) = (0.0, 0.0, 0usize);
        for p in points {
            lat += p.lat;
            lon += p.lon;
            n += 1;
        }
        if n == 0 {
            return Self::new(GeoPoint::new(0.0, 0.0));
        }
        Self::new(GeoPoint::new(lat / n as f64, lon / n as f64))
    }

    pub fn center(&self) -> GeoPoint {
        self.center
    }

    /// Project a lon/lat coordinate (x = lon, y = lat) to planar meters
    pub fn project_coord(&self, c: Coord<f64>) -> Coord<f64> {
        let lat = c.y.to_radians();
        let dlon = (c.x - self.center.lon).to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let cos_dlon = dlon.cos();

        let cos_c = (self.sin_lat0 * sin_lat + self.cos_lat0 * cos_lat * cos_dlon).clamp(-1.0, 1.0);
        let c_ang = cos_c.acos();
        let k = if c_ang.abs() < 1e-12 {
            1.0
        } else {
            c_ang / c_ang.sin()
        };

        Coord {
            x: EARTH_RADIUS_M * k * cos_lat * dlon.sin(),
            y: EARTH_RADIUS_M * k * (self.cos_lat0 * sin_lat - self.sin_lat0 * cos_lat * cos_dlon),
        }
    }

    pub fn project(&self, p: GeoPoint) -> Coord<f64> {
        self.project_coord(Coord { x: p.lon, y: p.lat })
    }

    /// Project a whole batch of points in one pass
    pub fn project_batch(&self, points: &[GeoPoint]) -> Vec<Coord<f64>> {
        points.iter().map(|p| self.project(*p)).collect()
    }
}

#[cfg(test)]
/// Great-circle distance in meters
fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planar(a: Coord<f64>, b: Coord<f64>) -> f64 {
        (a.x - b.x).hypot(a.y - b.y)
    }

    #[test]
    fn test_center_projects_to_origin() {
        let proj = LocalProjection::new(GeoPoint::new(48.8566, 2.3522));
        let c = proj.project(GeoPoint::new(48.8566, 2.3522));
        assert!(c.x.abs() < 1e-6 && c.y.abs() < 1e-6);
    }

    #[test]
    fn test_short_distances_match_haversine() {
        let proj = LocalProjection::new(GeoPoint::new(48.8566, 2.3522));
        let a = GeoPoint::new(48.8584, 2.2945);
        let b = GeoPoint::new(48.8585, 2.2947);

        let projected = planar(proj.project(a), proj.project(b));
        let geodesic = haversine_m(a, b);
        assert!((projected - geodesic).abs() < 0.05, "{} vs {}", projected, geodesic);
        assert!(geodesic > 15.0 && geodesic < 25.0);
    }

    #[test]
    fn test_batch_matches_single() {
        let proj = LocalProjection::centered_on(&[GeoPoint::new(10.0, 10.0), GeoPoint::new(10.2, 10.2)]);
        assert!((proj.center().lat - 10.1).abs() < 1e-9);
        assert!((proj.center().lon - 10.1).abs() < 1e-9);
        let points = [GeoPoint::new(10.0, 10.0), GeoPoint::new(10.05, 10.1)];
        let batch = proj.project_batch(&points);
        assert_eq!(batch[1], proj.project(points[1]));
    }
}
