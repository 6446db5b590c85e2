//! Expiry timestamp parsing.
//!
//! `expires_at` columns on sessions, refresh tokens, and reset tokens are
//! TEXT. Rows written over the life of a deployment carry ISO-8601
//! strings, SQL datetimes, or numeric epochs, and every reader goes
//! through [`parse_expires_at`] instead of trusting one encoding. An
//! unknown encoding is an error for that row — callers must never treat
//! it as expired.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Epoch values above this are interpreted as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("unrecognized expires_at encoding: {0:?}")]
pub struct ExpiryParseError(pub String);

/// Parse a stored `expires_at` value.
///
/// Accepted encodings:
/// - ISO-8601 / RFC 3339 (`2025-07-29T11:53:59+00:00`, trailing `Z`,
///   with or without an offset — offsetless values are taken as UTC)
/// - SQL datetime (`2025-07-29 11:53:59`, taken as UTC)
/// - numeric epoch, seconds or milliseconds (values above 10^12 are
///   milliseconds)
pub fn parse_expires_at(raw: &str) -> Result<OffsetDateTime, ExpiryParseError> {
    let trimmed = raw.trim();

    if let Ok(epoch) = trimmed.parse::<f64>() {
        return parse_epoch(trimmed, epoch);
    }

    if trimmed.contains('T') {
        return parse_iso(trimmed);
    }

    let sql_format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    if let Ok(datetime) = PrimitiveDateTime::parse(trimmed, sql_format) {
        return Ok(datetime.assume_utc());
    }

    Err(ExpiryParseError(trimmed.to_string()))
}

fn parse_epoch(raw: &str, epoch: f64) -> Result<OffsetDateTime, ExpiryParseError> {
    let seconds = if epoch.abs() > EPOCH_MILLIS_THRESHOLD {
        epoch / 1000.0
    } else {
        epoch
    };
    let nanos = (seconds * 1e9) as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|_| ExpiryParseError(raw.to_string()))
}

fn parse_iso(raw: &str) -> Result<OffsetDateTime, ExpiryParseError> {
    if let Ok(datetime) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(datetime);
    }

    // ISO strings without an offset (e.g. a bare Python isoformat).
    let with_subseconds =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
    if let Ok(datetime) = PrimitiveDateTime::parse(raw, with_subseconds) {
        return Ok(datetime.assume_utc());
    }
    let without_subseconds = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(datetime) = PrimitiveDateTime::parse(raw, without_subseconds) {
        return Ok(datetime.assume_utc());
    }

    Err(ExpiryParseError(raw.to_string()))
}

/// Canonical encoding used for rows this server writes.
pub fn format_expires_at(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_rfc3339_with_offset() {
        let parsed = parse_expires_at("2025-07-29T11:53:59+00:00").unwrap();
        assert_eq!(parsed, datetime!(2025-07-29 11:53:59 UTC));
    }

    #[test]
    fn parses_rfc3339_with_z() {
        let parsed = parse_expires_at("2025-07-29T11:53:59Z").unwrap();
        assert_eq!(parsed, datetime!(2025-07-29 11:53:59 UTC));
    }

    #[test]
    fn parses_offsetless_iso_as_utc() {
        let parsed = parse_expires_at("2025-07-29T11:53:59.123456").unwrap();
        assert_eq!(parsed.unix_timestamp(), datetime!(2025-07-29 11:53:59 UTC).unix_timestamp());
    }

    #[test]
    fn parses_sql_datetime_as_utc() {
        let parsed = parse_expires_at("2025-07-29 11:53:59").unwrap();
        assert_eq!(parsed, datetime!(2025-07-29 11:53:59 UTC));
    }

    #[test]
    fn parses_epoch_seconds() {
        let parsed = parse_expires_at("1753789639").unwrap();
        assert_eq!(parsed.unix_timestamp(), 1_753_789_639);
    }

    #[test]
    fn parses_epoch_milliseconds() {
        // Above 10^12, so milliseconds.
        let parsed = parse_expires_at("1753789639000").unwrap();
        assert_eq!(parsed.unix_timestamp(), 1_753_789_639);
    }

    #[test]
    fn parses_fractional_epoch_seconds() {
        let parsed = parse_expires_at("1753789639.5").unwrap();
        assert_eq!(parsed.unix_timestamp(), 1_753_789_639);
    }

    #[test]
    fn rejects_unknown_encoding() {
        assert!(parse_expires_at("next tuesday").is_err());
        assert!(parse_expires_at("").is_err());
    }

    #[test]
    fn round_trips_through_canonical_format() {
        let now = datetime!(2026-01-02 03:04:05 UTC);
        let parsed = parse_expires_at(&format_expires_at(now)).unwrap();
        assert_eq!(parsed, now);
    }
}
