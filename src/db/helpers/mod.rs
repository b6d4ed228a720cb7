use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Utc};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parses a `+HH:MM` / `-HH:MM` offset (also `Z` and `+HHMM`).
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }

    let (sign, rest) = match value.as_bytes().first() {
        Some(b'+') => (1, &value[1..]),
        Some(b'-') => (-1, &value[1..]),
        _ => bail!("utc offset '{value}' must start with + or -"),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        bail!("utc offset '{value}' must look like +HH:MM");
    }
    let hours: i32 = digits[..2].parse()?;
    let minutes: i32 = digits[2..].parse()?;
    if minutes >= 60 {
        bail!("utc offset '{value}' has invalid minutes");
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow!("utc offset '{value}' is out of range"))
}

pub fn now_in(offset: &FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(offset)
}

/// Second precision, offset stripped; the log is normalized to one zone.
pub fn format_timestamp(value: &DateTime<FixedOffset>, offset: &FixedOffset) -> String {
    value.with_timezone(offset).format(TIMESTAMP_FORMAT).to_string()
}

pub fn format_optional_timestamp(
    value: Option<&DateTime<FixedOffset>>,
    offset: &FixedOffset,
) -> String {
    value
        .map(|dt| format_timestamp(dt, offset))
        .unwrap_or_default()
}

/// Accepts RFC 3339 or a naive timestamp interpreted in `offset`.
pub fn parse_timestamp(value: &str, offset: &FixedOffset, field: &str) -> Result<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(offset));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .with_context(|| format!("failed to parse {field} '{value}'"))?;

    naive
        .and_local_timezone(*offset)
        .single()
        .ok_or_else(|| anyhow!("{field} '{value}' is ambiguous"))
}

pub fn parse_optional_timestamp(
    value: &str,
    offset: &FixedOffset,
    field: &str,
) -> Result<Option<DateTime<FixedOffset>>> {
    if value.trim().is_empty() {
        Ok(None)
    } else {
        parse_timestamp(value, offset, field).map(Some)
    }
}

pub fn format_minutes(minutes: f64) -> String {
    format!("{:.2}", minutes.max(0.0))
}

pub fn parse_minutes(value: &str) -> Result<f64> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0.0);
    }
    value
        .parse::<f64>()
        .with_context(|| format!("invalid duration_minutes '{value}'"))
}

pub fn format_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

pub fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => Err(anyhow!("invalid boolean '{other}'")),
    }
}
