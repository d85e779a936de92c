//! Geodesic helpers: haversine distance, object centroids, per-track radius.
//!
//! All distances are great-circle kilometres. The centroid is the plain
//! arithmetic mean of member cell coordinates; the track radius it feeds is a
//! scale factor for the normalized frame, not an invariant quantity, so no
//! spherical mean is needed.

use crate::label::Blob;
use crate::tracker::Track;

/// Mean earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in km between two points given as degrees
/// `(lon, lat)`.
pub fn haversine_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64, radius_km: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    // clamp guards antipodal rounding
    2.0 * radius_km * a.sqrt().clamp(0.0, 1.0).asin()
}

/// Unweighted mean `(lon, lat)` of a blob's member cells on a
/// longitude-latitude grid with coordinate vectors `lon` and `lat`.
pub fn blob_centroid(blob: &Blob, lon: &[f64], lat: &[f64]) -> (f64, f64) {
    let mut lon_sum = 0.0;
    let mut lat_sum = 0.0;
    for cell in blob.cells() {
        lon_sum += lon[cell.i as usize];
        lat_sum += lat[cell.j as usize];
    }
    let n = blob.len() as f64;
    (lon_sum / n, lat_sum / n)
}

/// Largest cell-to-centroid distance of one blob, in km.
pub fn blob_radius_km(blob: &Blob, lon: &[f64], lat: &[f64], radius_km: f64) -> f64 {
    let (lon_c, lat_c) = blob_centroid(blob, lon, lat);
    blob.cells()
        .iter()
        .map(|cell| haversine_km(lon_c, lat_c, lon[cell.i as usize], lat[cell.j as usize], radius_km))
        .fold(0.0, f64::max)
}

/// Largest cell-to-centroid distance observed over a track's lifetime, in
/// km. Each day is measured against that day's own centroid.
pub fn track_radius_km(track: &Track, lon: &[f64], lat: &[f64], radius_km: f64) -> f64 {
    track
        .objects()
        .iter()
        .map(|blob| blob_radius_km(blob, lon, lat, radius_km))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Cell;
    use approx::assert_relative_eq;

    #[test]
    fn haversine_matches_known_distances() {
        // one degree of longitude at the equator
        let d = haversine_km(0.0, 0.0, 1.0, 0.0, EARTH_RADIUS_KM);
        assert_relative_eq!(d, EARTH_RADIUS_KM.to_radians(), max_relative = 1e-12);

        // quarter circumference pole to equator
        let d = haversine_km(0.0, 0.0, 0.0, 90.0, EARTH_RADIUS_KM);
        assert_relative_eq!(d, std::f64::consts::FRAC_PI_2 * EARTH_RADIUS_KM, max_relative = 1e-12);

        // coincident points
        assert_eq!(haversine_km(12.0, 34.0, 12.0, 34.0, EARTH_RADIUS_KM), 0.0);
    }

    #[test]
    fn haversine_agrees_with_the_geo_crate() {
        use geo::algorithm::haversine_distance::HaversineDistance;
        use geo::Point;

        let pairs = [
            ((151.2, -33.9), (174.8, -36.8)), // Sydney - Auckland
            ((-0.1, 51.5), (2.35, 48.86)),    // London - Paris
            ((139.7, 35.7), (-122.4, 37.8)),  // Tokyo - San Francisco
        ];
        for ((lon1, lat1), (lon2, lat2)) in pairs {
            let ours = haversine_km(lon1, lat1, lon2, lat2, EARTH_RADIUS_KM);
            let theirs = Point::new(lon1, lat1).haversine_distance(&Point::new(lon2, lat2)) / 1000.0;
            // geo uses a slightly different mean radius
            assert_relative_eq!(ours, theirs, max_relative = 1e-4);
        }
    }

    #[test]
    fn centroid_is_the_mean_of_member_coordinates() {
        let lon: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let lat: Vec<f64> = (0..10).map(|j| -5.0 + j as f64).collect();
        let blob = Blob::new(vec![
            Cell::new(0, 0, 0),
            Cell::new(0, 2, 0),
            Cell::new(0, 1, 3),
        ]);
        let (lon_c, lat_c) = blob_centroid(&blob, &lon, &lat);
        assert_relative_eq!(lon_c, 101.0);
        assert_relative_eq!(lat_c, -4.0);
    }

    #[test]
    fn blob_radius_is_the_farthest_member() {
        let lon: Vec<f64> = (0..21).map(|i| i as f64).collect();
        let lat: Vec<f64> = (0..5).map(|j| j as f64).collect();
        // a zonal line of cells at the equator row
        let blob = Blob::new((0..21).map(|i| Cell::new(0, i, 0)).collect());
        let r = blob_radius_km(&blob, &lon, &lat, EARTH_RADIUS_KM);
        // centroid sits at lon 10; the ends are 10 degrees away
        let expected = haversine_km(10.0, 0.0, 20.0, 0.0, EARTH_RADIUS_KM);
        assert_relative_eq!(r, expected, max_relative = 1e-12);
    }

    #[test]
    fn single_cell_blob_has_zero_radius() {
        let lon = vec![0.0, 1.0];
        let lat = vec![0.0, 1.0];
        let blob = Blob::new(vec![Cell::new(0, 1, 1)]);
        assert_eq!(blob_radius_km(&blob, &lon, &lat, EARTH_RADIUS_KM), 0.0);
    }
}
