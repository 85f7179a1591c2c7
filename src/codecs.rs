//! Serde helpers for the cell formats the pipeline meets at its edges: day columns that may carry
//! a time component, numeric cells that may not parse, and 0x-prefixed hex quantities.

use chrono::NaiveDate;
use serde::{de, Deserialize, Deserializer};

/// Parse a day cell. Timestamp-shaped values like "2024-01-05 00:00:00 UTC" are accepted, only
/// the calendar date is kept.
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().or_else(|| {
        s.get(0..10)
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
    })
}

pub fn from_day_string<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_day(&s).ok_or_else(|| {
        de::Error::invalid_value(
            de::Unexpected::Str(&s),
            &"a calendar date like \"2024-01-05\"",
        )
    })
}

/// Numeric cells that fail to parse become null, never an error.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(s.and_then(|s| s.trim().parse::<f64>().ok()))
}

pub fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(s.and_then(|s| s.trim().parse::<i64>().ok()))
}

pub fn parse_hex_quantity(s: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
}

/// Execution-layer JSON-RPC results carry quantities as 0x-prefixed hex strings.
pub fn from_hex_quantity<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_hex_quantity(&s).map_err(|error| {
        de::Error::invalid_value(
            de::Unexpected::Str(&format!("unexpected value: {}, error: {}", s, error)),
            &"a hex quantity like \"0x1c9c380\"",
        )
    })
}

pub fn from_opt_hex_quantity<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    match s {
        None => Ok(None),
        Some(s) => parse_hex_quantity(&s).map(Some).map_err(|error| {
            de::Error::invalid_value(
                de::Unexpected::Str(&format!("unexpected value: {}, error: {}", s, error)),
                &"a hex quantity like \"0x1c9c380\"",
            )
        }),
    }
}
