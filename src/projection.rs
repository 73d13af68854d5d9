//! Normalized spherical Mercator projection
//!
//! The whole world maps onto the unit square: (0, 0) is the north-west
//! corner (latitude +85.05°, longitude −180°) and (1, 1) the south-east
//! corner. At zoom level z the grid coordinate of a point is simply its
//! normalized mercator coordinate times `2^z`.

use geo::Coord;
use std::f64::consts::PI;

/// Maximum latitude representable in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Convert WGS84 (lat, lon) to a normalized mercator coordinate in `[0,1]²`
///
/// Latitude is clamped to the Web Mercator range, so the poles project onto
/// the top/bottom edges of the unit square.
#[inline]
pub fn coordinate_to_mercator(lat: f64, lon: f64) -> Coord<f64> {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);

    let x = (lon + 180.0) / 360.0;
    let lat_rad = lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0;

    Coord { x, y }
}

/// Convert a normalized mercator coordinate back to WGS84 `(lat, lon)`
///
/// Inputs outside the unit square are clamped onto it.
#[inline]
pub fn mercator_to_coordinate(m: Coord<f64>) -> (f64, f64) {
    let x = m.x.clamp(0.0, 1.0);
    let y = m.y.clamp(0.0, 1.0);

    let lon = x * 360.0 - 180.0;
    let lat = ((1.0 - 2.0 * y) * PI).sinh().atan().to_degrees();

    (lat, lon)
}
