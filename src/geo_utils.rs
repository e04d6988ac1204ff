//! Geographic utilities: great-circle distance and proximity checks.

use crate::{Coordinate, ProximityTarget};

/// Spherical Earth radius in meters used for all distance math.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters spanned by one degree of latitude on the spherical model.
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;

/// Great-circle distance between two coordinates using the haversine formula.
///
/// Symmetric, zero for identical coordinates, and well-defined at the poles
/// and for antipodal points (the intermediate term is clamped to `[0, 1]`).
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// True when `current` lies within the target radius (boundary inclusive).
pub fn is_near(current: &Coordinate, target: &ProximityTarget) -> bool {
    distance_meters(current, &target.coordinates) <= target.radius_meters
}

/// Human-readable distance: whole meters below 1 km, one decimal km above.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{}m", meters.round() as i64)
    } else {
        format!("{:.1}km", meters / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_symmetric_and_zero() {
        let pairs = [
            (Coordinate::new(51.5074, -0.1278), Coordinate::new(48.8566, 2.3522)),
            (Coordinate::new(-33.8688, 151.2093), Coordinate::new(40.7128, -74.0060)),
            (Coordinate::new(0.0, 179.9), Coordinate::new(0.0, -179.9)),
        ];
        for (a, b) in pairs {
            assert_eq!(distance_meters(&a, &b), distance_meters(&b, &a));
            assert_eq!(distance_meters(&a, &a), 0.0);
            assert!(distance_meters(&a, &b) > 0.0);
        }
    }

    #[test]
    fn test_london_paris() {
        let london = Coordinate::new(51.5074, -0.1278);
        let paris = Coordinate::new(48.8566, 2.3522);
        let d = distance_meters(&london, &paris);
        // ~343 km
        assert!((d - 343_500.0).abs() < 2_000.0, "got {}", d);
    }

    #[test]
    fn test_distance_monotonic() {
        let origin = Coordinate::new(10.0, 10.0);
        let mut last = 0.0;
        for i in 1..20 {
            let d = distance_meters(&origin, &Coordinate::new(10.0, 10.0 + i as f64 * 0.5));
            assert!(d > last);
            last = d;
        }
    }

    #[test]
    fn test_antipodal_and_poles() {
        let d = distance_meters(&Coordinate::new(0.0, 0.0), &Coordinate::new(0.0, 180.0));
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_METERS).abs() < 1.0);

        let north = Coordinate::new(90.0, 0.0);
        let north_other_lng = Coordinate::new(90.0, 123.0);
        let d = distance_meters(&north, &north_other_lng);
        assert!(d.is_finite());
        assert!(d < 1e-6);

        let south = Coordinate::new(-90.0, 45.0);
        let d = distance_meters(&north, &south);
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_METERS).abs() < 1.0);
    }

    #[test]
    fn test_is_near_thresholds() {
        let target = ProximityTarget::new(Coordinate::new(0.0, 0.0), 100.0);
        // ~111 m away
        assert!(!is_near(&Coordinate::new(0.0, 0.001), &target));
        // ~55 m away
        assert!(is_near(&Coordinate::new(0.0, 0.0005), &target));
    }

    #[test]
    fn test_is_near_boundary_inclusive() {
        let center = Coordinate::new(45.0, 7.0);
        let edge = Coordinate::new(45.001, 7.0);
        let radius = distance_meters(&edge, &center);
        let target = ProximityTarget::new(center, radius);
        assert!(is_near(&edge, &target));

        let tighter = ProximityTarget::new(center, radius - 0.01);
        assert!(!is_near(&edge, &tighter));
    }

    #[test]
    fn test_zero_radius() {
        let center = Coordinate::new(12.0, 34.0);
        let target = ProximityTarget::new(center, 0.0);
        assert!(is_near(&center, &target));
        assert!(!is_near(&Coordinate::new(12.0, 34.000001), &target));
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(42.4), "42m");
        assert_eq!(format_distance(999.4), "999m");
        assert_eq!(format_distance(1234.0), "1.2km");
        assert_eq!(format_distance(15_000.0), "15.0km");
    }
}
