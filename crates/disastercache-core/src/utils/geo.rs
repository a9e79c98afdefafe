//! Great-circle distance helpers for "near me" filtering.

const EARTH_RADIUS_KM: f64 = 6371.0;

const MILES_PER_KM: f64 = 0.621371;

/// Haversine distance in kilometres between two lat/long points in degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let d_lat = lat2 - lat1;
    let d_lon = lon2 - lon1;

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

pub fn km_to_miles(km: f64) -> f64 {
    km * MILES_PER_KM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // Los Angeles to San Francisco is roughly 559 km
        let d = haversine_km(34.0522, -118.2437, 37.7749, -122.4194);
        assert!((d - 559.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn test_haversine_same_point() {
        assert!(haversine_km(40.0, -100.0, 40.0, -100.0).abs() < 1e-9);
    }

    #[test]
    fn test_km_to_miles() {
        assert!((km_to_miles(10.0) - 6.21371).abs() < 1e-9);
    }
}
