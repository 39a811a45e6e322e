//! Geodesy primitives: ellipsoid, geographic points, tangent frames, extents.
//!
//! The simulation grid is a flat square laid on a local east-north-up (ENU)
//! tangent plane. Everything the kernel needs to move between grid offsets
//! and longitude/latitude lives here.

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

/// Reference ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    /// Semi-major axis (m)
    pub a: f64,
    /// Flattening
    pub f: f64,
}

impl Ellipsoid {
    /// WGS84 (a = 6378137 m, f = 1/298.257223563).
    pub const WGS84: Self = Self {
        a: 6_378_137.0,
        f: 1.0 / 298.257_223_563,
    };

    /// Semi-minor axis b = a(1-f).
    #[inline]
    #[must_use]
    pub fn b(&self) -> f64 {
        self.a * (1.0 - self.f)
    }

    /// First eccentricity squared e² = 2f - f².
    #[inline]
    #[must_use]
    pub fn e2(&self) -> f64 {
        self.f * (2.0 - self.f)
    }

    /// Prime vertical radius of curvature N = a / √(1 - e² sin²φ).
    #[inline]
    #[must_use]
    pub fn prime_vertical_radius(&self, lat_rad: f64) -> f64 {
        let sin_lat = lat_rad.sin();
        self.a / (1.0 - self.e2() * sin_lat * sin_lat).sqrt()
    }

    /// Outward unit normal of the ellipsoid at `point`'s longitude and latitude.
    #[must_use]
    pub fn normal(&self, point: GeoPoint) -> DVec3 {
        let (sin_lat, cos_lat) = point.lat.to_radians().sin_cos();
        let (sin_lon, cos_lon) = point.lon.to_radians().sin_cos();
        DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat)
    }

    /// Converts a geodetic point to Earth-centered, Earth-fixed coordinates.
    #[must_use]
    pub fn geodetic_to_ecef(&self, point: GeoPoint) -> DVec3 {
        let lat = point.lat.to_radians();
        let lon = point.lon.to_radians();
        let n = self.prime_vertical_radius(lat);
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        DVec3::new(
            (n + point.height) * cos_lat * cos_lon,
            (n + point.height) * cos_lat * sin_lon,
            (n * (1.0 - self.e2()) + point.height) * sin_lat,
        )
    }

    /// Converts ECEF coordinates back to a geodetic point.
    ///
    /// Fixed-point iteration on latitude; converges to ~1e-15 rad within a
    /// handful of steps for points near the surface.
    #[must_use]
    pub fn ecef_to_geodetic(&self, ecef: DVec3) -> GeoPoint {
        let e2 = self.e2();
        let p = ecef.x.hypot(ecef.y);
        let lon = ecef.y.atan2(ecef.x);

        if p < 1e-9 {
            let lat = if ecef.z >= 0.0 { 90.0 } else { -90.0 };
            return GeoPoint::new(lon.to_degrees(), lat, ecef.z.abs() - self.b());
        }

        let mut lat = ecef.z.atan2(p * (1.0 - e2));
        for _ in 0..16 {
            let n = self.prime_vertical_radius(lat);
            let height = p / lat.cos() - n;
            let next = ecef.z.atan2(p * (1.0 - e2 * n / (n + height)));
            let converged = (next - lat).abs() < 1e-15;
            lat = next;
            if converged {
                break;
            }
        }

        let height = p / lat.cos() - self.prime_vertical_radius(lat);
        GeoPoint::new(lon.to_degrees(), lat.to_degrees(), height)
    }
}

/// Geographic position in degrees, with ellipsoidal height in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Longitude (degrees, east positive)
    pub lon: f64,
    /// Latitude (degrees, north positive)
    pub lat: f64,
    /// Height above the ellipsoid (m)
    pub height: f64,
}

impl GeoPoint {
    /// Creates a new geographic point.
    #[must_use]
    pub const fn new(lon: f64, lat: f64, height: f64) -> Self {
        Self { lon, lat, height }
    }

    /// Creates a point on the ellipsoid surface.
    #[must_use]
    pub const fn surface(lon: f64, lat: f64) -> Self {
        Self::new(lon, lat, 0.0)
    }
}

/// Local east-north-up frame anchored at a geographic point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TangentFrame {
    /// Anchor point
    anchor: GeoPoint,
    /// Anchor in ECEF
    origin: DVec3,
    /// Columns are the east, north and up unit vectors in ECEF
    basis: DMat3,
    /// Ellipsoid used for conversions
    ellipsoid: Ellipsoid,
}

impl TangentFrame {
    /// Creates a WGS84 tangent frame at `anchor`.
    #[must_use]
    pub fn new(anchor: GeoPoint) -> Self {
        Self::with_ellipsoid(anchor, Ellipsoid::WGS84)
    }

    /// Creates a tangent frame on a specific ellipsoid.
    #[must_use]
    pub fn with_ellipsoid(anchor: GeoPoint, ellipsoid: Ellipsoid) -> Self {
        let (sin_lat, cos_lat) = anchor.lat.to_radians().sin_cos();
        let (sin_lon, cos_lon) = anchor.lon.to_radians().sin_cos();

        let east = DVec3::new(-sin_lon, cos_lon, 0.0);
        let north = DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
        let up = ellipsoid.normal(anchor);

        Self {
            anchor,
            origin: ellipsoid.geodetic_to_ecef(anchor),
            basis: DMat3::from_cols(east, north, up),
            ellipsoid,
        }
    }

    /// Returns the anchor point.
    #[must_use]
    pub const fn anchor(&self) -> GeoPoint {
        self.anchor
    }

    /// Local ENU offset (m) to ECEF.
    #[must_use]
    pub fn local_to_ecef(&self, local: DVec3) -> DVec3 {
        self.origin + self.basis * local
    }

    /// ECEF to local ENU offset (m).
    #[must_use]
    pub fn ecef_to_local(&self, ecef: DVec3) -> DVec3 {
        self.basis.transpose() * (ecef - self.origin)
    }

    /// Converts an (east, north) offset on the tangent plane to a geographic point.
    #[must_use]
    pub fn local_to_geodetic(&self, east: f64, north: f64) -> GeoPoint {
        self.ellipsoid
            .ecef_to_geodetic(self.local_to_ecef(DVec3::new(east, north, 0.0)))
    }

    /// Projects a geographic point onto the tangent plane along its ellipsoid
    /// normal, returning (east, north).
    ///
    /// Height is ignored: every point on the normal through `(lon, lat)` lands
    /// on the same plane offset, so this inverts
    /// [`local_to_geodetic`](Self::local_to_geodetic) even though that
    /// returns a point above the surface.
    #[must_use]
    pub fn geodetic_to_local(&self, point: GeoPoint) -> (f64, f64) {
        let ecef = self.ellipsoid.geodetic_to_ecef(point);
        let normal = self.ellipsoid.normal(point);
        let up = self.basis.z_axis;
        let t = -(ecef - self.origin).dot(up) / normal.dot(up);
        let local = self.ecef_to_local(ecef + normal * t);
        (local.x, local.y)
    }

    /// Geographic bounding rectangle of the square `[-half, half]²` on the plane.
    #[must_use]
    pub fn square_extent(&self, half: f64) -> Extent {
        let corners = [(-half, -half), (half, -half), (half, half), (-half, half)];
        Extent::from_points(
            corners
                .iter()
                .map(|&(east, north)| self.local_to_geodetic(east, north)),
        )
    }
}

/// Axis-aligned geographic bounding rectangle (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    /// Western bound
    pub min_lon: f64,
    /// Southern bound
    pub min_lat: f64,
    /// Eastern bound
    pub max_lon: f64,
    /// Northern bound
    pub max_lat: f64,
}

impl Extent {
    /// Creates an extent from explicit bounds.
    #[must_use]
    pub const fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Smallest extent containing every point.
    #[must_use]
    pub fn from_points(points: impl IntoIterator<Item = GeoPoint>) -> Self {
        points.into_iter().fold(
            Self::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |e, p| {
                Self::new(
                    e.min_lon.min(p.lon),
                    e.min_lat.min(p.lat),
                    e.max_lon.max(p.lon),
                    e.max_lat.max(p.lat),
                )
            },
        )
    }

    /// Inclusive containment test.
    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// The extent grown by `margin` degrees on every side.
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        Self::new(
            self.min_lon - margin,
            self.min_lat - margin,
            self.max_lon + margin,
            self.max_lat + margin,
        )
    }

    /// Width in degrees of longitude.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    /// Height in degrees of latitude.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Midpoint of the rectangle.
    #[must_use]
    pub fn center(&self) -> GeoPoint {
        GeoPoint::surface(
            (self.min_lon + self.max_lon) * 0.5,
            (self.min_lat + self.max_lat) * 0.5,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ecef_equator_prime_meridian() {
        let ecef = Ellipsoid::WGS84.geodetic_to_ecef(GeoPoint::surface(0.0, 0.0));
        assert!((ecef.x - 6_378_137.0).abs() < 1e-6);
        assert!(ecef.y.abs() < 1e-6);
        assert!(ecef.z.abs() < 1e-6);
    }

    #[test]
    fn test_ecef_pole() {
        let wgs = Ellipsoid::WGS84;
        let p = wgs.ecef_to_geodetic(DVec3::new(0.0, 0.0, wgs.b()));
        assert_eq!(p.lat, 90.0);
        assert!(p.height.abs() < 1e-6);
    }

    #[test]
    fn test_frame_axes_orthonormal() {
        let frame = TangentFrame::new(GeoPoint::surface(-73.98, 40.75));
        let b = frame.basis;
        assert!((b.x_axis.length() - 1.0).abs() < 1e-12);
        assert!(b.x_axis.dot(b.y_axis).abs() < 1e-12);
        assert!(b.y_axis.dot(b.z_axis).abs() < 1e-12);
    }

    #[test]
    fn test_east_offset_increases_longitude() {
        let frame = TangentFrame::new(GeoPoint::surface(10.0, 45.0));
        let east = frame.local_to_geodetic(100.0, 0.0);
        let north = frame.local_to_geodetic(0.0, 100.0);
        assert!(east.lon > 10.0);
        assert!((east.lat - 45.0).abs() < 1e-5);
        assert!(north.lat > 45.0);
        assert!((north.lon - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_anchor_maps_to_origin() {
        let anchor = GeoPoint::surface(139.69, 35.69);
        let frame = TangentFrame::new(anchor);
        let (east, north) = frame.geodetic_to_local(anchor);
        assert_eq!(east, 0.0);
        assert_eq!(north, 0.0);
    }

    #[test]
    fn test_square_extent_brackets_anchor() {
        let frame = TangentFrame::new(GeoPoint::surface(2.35, 48.85));
        let extent = frame.square_extent(256.0);
        assert!(extent.contains(2.35, 48.85));
        assert!(extent.width() > 0.0 && extent.height() > 0.0);
        let c = extent.center();
        assert!((c.lon - 2.35).abs() < 1e-6);
        assert!((c.lat - 48.85).abs() < 1e-6);
    }

    #[test]
    fn test_expanded_includes_margin() {
        let e = Extent::new(0.0, 0.0, 1.0, 1.0);
        assert!(!e.contains(1.05, 0.5));
        assert!(e.expanded(0.1).contains(1.05, 0.5));
        assert!(e.expanded(0.1).contains(-0.1, -0.1));
    }

    #[test]
    fn test_projection_ignores_height() {
        let frame = TangentFrame::new(GeoPoint::surface(10.0, 45.0));
        let low = frame.geodetic_to_local(GeoPoint::new(10.3, 45.2, 0.0));
        let high = frame.geodetic_to_local(GeoPoint::new(10.3, 45.2, 2500.0));
        assert!((low.0 - high.0).abs() < 1e-6);
        assert!((low.1 - high.1).abs() < 1e-6);
    }

    #[test]
    fn test_surface_point_inverts_far_plane_offsets() {
        // 200 km out the plane sits kilometres above the ellipsoid.
        let frame = TangentFrame::new(GeoPoint::surface(0.0, 45.0));
        for (east, north) in [(204_775.0, 204_775.0), (-204_775.0, -204_775.0), (204_775.0, 0.0)] {
            let p = frame.local_to_geodetic(east, north);
            assert!(p.height > 1000.0);
            let (e, n) = frame.geodetic_to_local(GeoPoint::surface(p.lon, p.lat));
            assert!((e - east).abs() < 1e-4, "east {e} vs {east}");
            assert!((n - north).abs() < 1e-4, "north {n} vs {north}");
        }
    }

    proptest! {
        #[test]
        fn prop_geodetic_round_trip(
            lon in -179.0f64..179.0,
            lat in -85.0f64..85.0,
            h in -100.0f64..5000.0,
        ) {
            let wgs = Ellipsoid::WGS84;
            let back = wgs.ecef_to_geodetic(wgs.geodetic_to_ecef(GeoPoint::new(lon, lat, h)));
            prop_assert!((back.lon - lon).abs() < 1e-9);
            prop_assert!((back.lat - lat).abs() < 1e-9);
            prop_assert!((back.height - h).abs() < 1e-5);
        }

        #[test]
        fn prop_local_round_trip(east in -5000.0f64..5000.0, north in -5000.0f64..5000.0) {
            let frame = TangentFrame::new(GeoPoint::surface(-122.42, 37.77));
            let (e, n) = frame.geodetic_to_local(frame.local_to_geodetic(east, north));
            prop_assert!((e - east).abs() < 1e-6);
            prop_assert!((n - north).abs() < 1e-6);
        }
    }
}
