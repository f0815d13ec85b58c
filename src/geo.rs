//! Location markers embedded in message text
//!
//! Clients share a position as `LatLng: 1.3521N, 103.8198E`. Only the first
//! marker in a body is used.

use serde::{Deserialize, Serialize};
use tracing::debug;

const MARKER: &str = "LatLng:";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

/// Parse the first `LatLng:` marker in `body`.
///
/// Returns `None` when there is no marker or the coordinates are malformed.
pub fn parse_lat_lng(body: &str) -> Option<LatLng> {
    let start = body.find(MARKER)?;
    let rest = &body[start + MARKER.len()..];

    let mut parts = rest.split(',');
    let (lat, lng) = match (parts.next(), parts.next()) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => {
            debug!(body = %rest, "LatLng marker without longitude");
            return None;
        }
    };

    // The longitude ends where ordinary text resumes
    let lng_end = lng
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || " \t.+-nsewNSEW".contains(*c)))
        .map(|(i, _)| i)
        .unwrap_or(lng.len());

    let latitude = parse_coordinate(lat, 's')?;
    let longitude = parse_coordinate(&lng[..lng_end], 'w')?;
    Some(LatLng { latitude, longitude })
}

/// Strip everything but digits and dots; the negative hemisphere letter flips the sign
fn parse_coordinate(raw: &str, negative: char) -> Option<f64> {
    let lower = raw.to_lowercase();
    let digits: String = lower
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    match digits.parse::<f64>() {
        Ok(v) if lower.contains(negative) || lower.trim_start().starts_with('-') => Some(-v),
        Ok(v) => Some(v),
        Err(e) => {
            debug!(coordinate = %raw, error = %e, "malformed LatLng coordinate");
            None
        }
    }
}
