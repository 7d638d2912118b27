//! CSV token -> fixed-width on-disk value coercion (spec.md §7
//! `ConversionError`: "value -> type coercion... row-level: surface with
//! file:line").
//!
//! Every structured property is serialized to exactly
//! `PropertyType::fixed_width()` bytes here; strings are handled
//! separately through `storage::overflow` since they route through a
//! `gf_string` rather than a plain fixed-width encoding.

use crate::error::{GraphError, Result};
use crate::types::PropertyType;

/// Trims trailing ASCII whitespace from `s`, matching the original's
/// `rtrim` intent (spec.md §9 Open Question 3, SUPPLEMENTED FEATURES
/// item 3: the original loop variable is signed-vs-unsigned-unsound).
/// This version just walks from the end with a `usize` and stops at 0,
/// which sidesteps the bug outright rather than reproducing it.
pub fn rtrim(s: &str) -> &str {
    let bytes = s.as_bytes();
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    &s[..end]
}

/// Parses `raw` (already `rtrim`'d by the caller) as `ty`, writing the
/// fixed-width on-disk encoding into a freshly allocated buffer. Returns
/// `None` for an empty field, signaling a null slot.
pub fn encode_fixed(raw: &str, ty: PropertyType, file: &str, line: u64) -> Result<Option<Vec<u8>>> {
    let raw = rtrim(raw);
    if raw.is_empty() {
        return Ok(None);
    }
    let conv_err = |msg: String| GraphError::conversion(file, line, msg);

    let bytes = match ty {
        PropertyType::Int64 => raw
            .parse::<i64>()
            .map(|v| v.to_le_bytes().to_vec())
            .map_err(|e| conv_err(format!("invalid INT64 '{raw}': {e}")))?,
        PropertyType::Double => raw
            .parse::<f64>()
            .map(|v| v.to_le_bytes().to_vec())
            .map_err(|e| conv_err(format!("invalid DOUBLE '{raw}': {e}")))?,
        PropertyType::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => vec![1u8],
            "false" | "0" => vec![0u8],
            _ => return Err(conv_err(format!("invalid BOOL '{raw}'"))),
        },
        PropertyType::Date => parse_date(raw)
            .map(|days| days.to_le_bytes().to_vec())
            .map_err(|e| conv_err(e))?,
        PropertyType::Timestamp => parse_timestamp(raw)
            .map(|micros| micros.to_le_bytes().to_vec())
            .map_err(|e| conv_err(e))?,
        PropertyType::Interval => parse_interval(raw)
            .map(|(months, days, micros)| {
                let mut buf = Vec::with_capacity(16);
                buf.extend_from_slice(&months.to_le_bytes());
                buf.extend_from_slice(&days.to_le_bytes());
                buf.extend_from_slice(&micros.to_le_bytes());
                buf
            })
            .map_err(conv_err)?,
        PropertyType::String | PropertyType::NodeOrLabel => {
            return Err(GraphError::Internal(
                "encode_fixed does not handle STRING/NodeOrLabel".into(),
            ))
        }
    };
    Ok(Some(bytes))
}

const DAYS_PER_400_YEARS: i64 = 146097;

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i64, month: u32) -> i64 {
    const DAYS: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    if month == 2 && is_leap(year) {
        29
    } else {
        DAYS[(month - 1) as usize]
    }
}

/// Days since 1970-01-01 for a proleptic-Gregorian `y-m-d`, computed
/// directly (no calendar crate) since the only input format this engine
/// accepts is a fixed `YYYY-MM-DD` string.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    // Howard Hinnant's days_from_civil algorithm.
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64; // [0, 399]
    let mp = (month as i64 + 9) % 12; // [0, 11] -> Mar=0 .. Feb=11
    let doy = (153 * mp + 2) / 5 + day as i64 - 1; // [0, 365]
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy; // [0, 146096]
    era * DAYS_PER_400_YEARS + doe - 719468
}

fn parse_date(raw: &str) -> std::result::Result<i32, String> {
    let parts: Vec<&str> = raw.split('-').collect();
    if parts.len() != 3 {
        return Err(format!("invalid DATE '{raw}', expected YYYY-MM-DD"));
    }
    let year: i64 = parts[0].parse().map_err(|_| format!("invalid DATE year in '{raw}'"))?;
    let month: u32 = parts[1].parse().map_err(|_| format!("invalid DATE month in '{raw}'"))?;
    let day: u32 = parts[2].parse().map_err(|_| format!("invalid DATE day in '{raw}'"))?;
    if !(1..=12).contains(&month) || day == 0 || day as i64 > days_in_month(year, month) {
        return Err(format!("invalid DATE '{raw}'"));
    }
    Ok(days_from_civil(year, month, day) as i32)
}

fn parse_timestamp(raw: &str) -> std::result::Result<i64, String> {
    let (date_part, time_part) = raw
        .split_once(' ')
        .ok_or_else(|| format!("invalid TIMESTAMP '{raw}', expected 'YYYY-MM-DD HH:MM:SS'"))?;
    let days = parse_date(date_part)? as i64;
    let time_fields: Vec<&str> = time_part.split(':').collect();
    if time_fields.len() != 3 {
        return Err(format!("invalid TIMESTAMP time '{time_part}'"));
    }
    let hour: i64 = time_fields[0].parse().map_err(|_| format!("invalid hour in '{raw}'"))?;
    let min: i64 = time_fields[1].parse().map_err(|_| format!("invalid minute in '{raw}'"))?;
    let sec: f64 = time_fields[2].parse().map_err(|_| format!("invalid second in '{raw}'"))?;
    if hour >= 24 || min >= 60 || sec >= 60.0 {
        return Err(format!("invalid TIMESTAMP time '{time_part}'"));
    }
    let micros_of_day = (hour * 3600 + min * 60) * 1_000_000 + (sec * 1_000_000.0).round() as i64;
    Ok(days * 86_400_000_000 + micros_of_day)
}

/// Parses `P<months>M<days>D<micros>US`-shaped intervals, e.g. `3M10D`
/// or `2D5000000US`; any component may be omitted.
fn parse_interval(raw: &str) -> std::result::Result<(i32, i32, i64), String> {
    let mut months = 0i32;
    let mut days = 0i32;
    let mut micros = 0i64;
    let mut num = String::new();
    let mut any = false;
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() || c == '-' {
            num.push(c);
            i += 1;
            continue;
        }
        if num.is_empty() {
            return Err(format!("invalid INTERVAL '{raw}'"));
        }
        if c == 'M' {
            months += num.parse::<i32>().map_err(|_| format!("invalid INTERVAL '{raw}'"))?;
        } else if c == 'D' {
            days += num.parse::<i32>().map_err(|_| format!("invalid INTERVAL '{raw}'"))?;
        } else if c == 'U' && chars.get(i + 1) == Some(&'S') {
            micros += num.parse::<i64>().map_err(|_| format!("invalid INTERVAL '{raw}'"))?;
            i += 1;
        } else {
            return Err(format!("invalid INTERVAL unit in '{raw}'"));
        }
        any = true;
        num.clear();
        i += 1;
    }
    if !any || !num.is_empty() {
        return Err(format!("invalid INTERVAL '{raw}'"));
    }
    Ok((months, days, micros))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn rtrim_never_grows_or_gains_non_whitespace(s in ".*") {
            let trimmed = rtrim(&s);
            prop_assert!(trimmed.len() <= s.len());
            prop_assert!(s.starts_with(trimmed));
        }

        #[test]
        fn rtrim_is_idempotent(s in ".*") {
            let once = rtrim(&s);
            let twice = rtrim(once);
            prop_assert_eq!(once, twice);
        }
    }
}
