pub mod csv;
pub mod gpkg;
pub mod netcdf;

use crate::error::{Error, Result};
use crate::network::SegmentId;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Parses a segment id written as `123`, `123.0` or prefixed like `wb-123`.
pub fn parse_segment_id(value: &str) -> Result<SegmentId> {
    let value = value.trim();
    let numeric = match value.split_once('-') {
        Some((prefix, rest)) if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_alphabetic()) => {
            rest
        }
        _ => value,
    };
    let numeric = numeric.strip_suffix(".0").unwrap_or(numeric);
    numeric.parse::<SegmentId>().map_err(|_| Error::Parse {
        what: "segment id",
        value: value.to_string(),
    })
}

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(t);
        }
    }
    if let Ok(t) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(t.naive_utc());
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.naive_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| Error::Parse {
            what: "timestamp",
            value: value.to_string(),
        })
}
