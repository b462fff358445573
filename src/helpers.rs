//! Shared helpers for number rounding and lenient value parsing.
//!
//! Rounding goes through `Decimal` so report values come out as the short
//! decimal a reader expects (`50.5`, not `50.49999999`):
//!
//! - `round_dp`: rounds an f64 to N decimal places (volumes: 2, ratios: 3)
//!
//! Parsing helpers accept the formats seen across the upstream feeds:
//! comma decimal separators from the IZSU page, and several date layouts from
//! spreadsheets and station feeds.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Round an f64 to `dp` decimal places.
///
/// Returns the input unchanged for non-finite values or values outside the
/// range `Decimal` can represent.
pub(crate) fn round_dp(v: f64, dp: u32) -> f64 {
    if !v.is_finite() {
        tracing::warn!("round_dp received non-finite value {}, leaving as is", v);
        return v;
    }
    Decimal::from_f64(v)
        .map(|d| d.round_dp(dp))
        .and_then(|d| d.to_f64())
        .unwrap_or(v)
}

/// Parse a number that may use a comma as decimal separator.
///
/// `"12,5"` → 12.5, `" 1.25 "` → 1.25, `"%45"` and `"45%"` → 45.0.
/// Thousands separators are not supported; `"1.234,5"` is rejected.
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().trim_matches('%').trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains(',') && trimmed.contains('.') {
        return None;
    }
    trimmed.replace(',', ".").parse::<f64>().ok()
}

/// Date layouts accepted by [`parse_date`], tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d"];

/// Datetime layouts accepted by [`parse_date`] (the time part is dropped).
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Parse a date at day granularity from the layouts the feeds use.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    None
}

/// Great-circle distance in kilometres between two WGS84 points.
pub(crate) fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}
