///! Maidenhead grid locator math
///!
///! Converts between coordinates and the 4/6-character grid codes
///! operators report with their contacts. Pure functions, no I/O.

/// Longitude span of one field letter (positions 0 and 2), in degrees.
const FIELD_LON_DEG: f64 = 20.0;
/// Latitude span of one field letter.
const FIELD_LAT_DEG: f64 = 10.0;
/// Longitude span of one square digit.
const SQUARE_LON_DEG: f64 = 2.0;
/// Latitude span of one square digit.
const SQUARE_LAT_DEG: f64 = 1.0;
/// Longitude span of one subsquare letter (5 minutes of arc).
const SUBSQ_LON_DEG: f64 = SQUARE_LON_DEG / 24.0;
/// Latitude span of one subsquare letter (2.5 minutes of arc).
const SUBSQ_LAT_DEG: f64 = SQUARE_LAT_DEG / 24.0;

/// Encode a position as a 6-character locator, e.g. "JN54mk".
///
/// Valid only for lat in [-90, 90] and lon in [-180, 180]; anything else
/// (including non-finite input) yields `None`.
pub fn to_locator(lat: f64, lon: f64) -> Option<String> {
    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }

    // Shift into the all-positive frame before decomposing.
    let lat = lat + 90.0;
    let lon = lon + 180.0;

    let field_lon = (lon / FIELD_LON_DEG).floor() as u8;
    let field_lat = (lat / FIELD_LAT_DEG).floor() as u8;
    let square_lon = ((lon % FIELD_LON_DEG) / SQUARE_LON_DEG).floor() as u8;
    let square_lat = ((lat % FIELD_LAT_DEG) / SQUARE_LAT_DEG).floor() as u8;
    let sub_lon = ((lon % SQUARE_LON_DEG) / SUBSQ_LON_DEG).floor() as u8;
    let sub_lat = ((lat % SQUARE_LAT_DEG) / SUBSQ_LAT_DEG).floor() as u8;

    let mut out = String::with_capacity(6);
    out.push((b'A' + field_lon) as char);
    out.push((b'A' + field_lat) as char);
    out.push((b'0' + square_lon) as char);
    out.push((b'0' + square_lat) as char);
    out.push((b'a' + sub_lon) as char);
    out.push((b'a' + sub_lat) as char);
    Some(out)
}

/// Decode a 4- or 6-character locator, case-insensitive.
///
/// Interpolates half a cell of latitude so a bare square like "JN54"
/// resolves to its mid-latitude rather than the southern edge. Rejects
/// other lengths and characters outside the per-position classes
/// (letters A..S, digits, letters A..X).
pub fn to_lat_lon(locator: &str) -> Option<(f64, f64)> {
    let loc = locator.trim().to_ascii_uppercase();
    let b = loc.as_bytes();
    if b.len() != 4 && b.len() != 6 {
        return None;
    }
    if !(b'A'..=b'S').contains(&b[0]) || !(b'A'..=b'S').contains(&b[1]) {
        return None;
    }
    if !b[2].is_ascii_digit() || !b[3].is_ascii_digit() {
        return None;
    }

    let mut lon = f64::from(b[0] - b'A') * FIELD_LON_DEG + f64::from(b[2] - b'0') * SQUARE_LON_DEG;
    let mut lat = f64::from(b[1] - b'A') * FIELD_LAT_DEG + f64::from(b[3] - b'0') * SQUARE_LAT_DEG;

    if b.len() == 6 {
        if !(b'A'..=b'X').contains(&b[4]) || !(b'A'..=b'X').contains(&b[5]) {
            return None;
        }
        lon += f64::from(b[4] - b'A') * SUBSQ_LON_DEG;
        lat += f64::from(b[5] - b'A') * SUBSQ_LAT_DEG;
        lat += SUBSQ_LAT_DEG / 2.0;
    } else {
        lat += SQUARE_LAT_DEG / 2.0;
    }

    Some((lat - 90.0, lon - 180.0))
}
