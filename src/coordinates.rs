//! Geographic coordinate normalization for datafield 034.
//!
//! The bounding box arrives as four subfields: `$d`/`$e` minimum and maximum
//! longitude, `$f`/`$g` minimum and maximum latitude. Each value is a
//! hemisphere letter followed by either packed degrees/minutes/seconds
//! (`E 015 59 15`) or decimal degrees (`E015.987500`). The optional pseudo
//! subfield `$9 A:` names the coding.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::FieldError;
use crate::field::FieldGroup;

/// Everything except word characters and the decimal point is formatting.
static FORMATTING: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w.]").expect("formatting pattern"));

/// How a raw coordinate value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    /// `DDDMMSS`: whole degrees, two-digit minutes, two-digit seconds.
    Sexagesimal,
    /// Decimal degrees.
    Decimal,
}

impl Coding {
    /// Coding from the `$9 A:` flag character.
    pub fn from_flag(flag: char) -> Result<Self, FieldError> {
        match flag {
            'a' => Ok(Coding::Sexagesimal),
            'd' => Ok(Coding::Decimal),
            other => Err(FieldError::UnsupportedCoding(other)),
        }
    }
}

/// Guess the coding of a raw value when no flag is present.
///
/// Interior spaces without a decimal point mean packed degrees. A single
/// decimal point after the third character with digits behind it means
/// decimal degrees. Anything else is undetermined.
pub fn detect_coding(raw: &str) -> Option<Coding> {
    if raw.contains(' ') && !raw.contains('.') {
        return Some(Coding::Sexagesimal);
    }
    let pos = raw.find('.')?;
    let after = &raw[pos + 1..];
    (pos > 2 && !after.is_empty() && !after.contains('.')).then_some(Coding::Decimal)
}

/// Convert one raw value to signed decimal degrees.
///
/// On failure the reason is returned for the caller to attach to the
/// subfield it came from.
pub fn to_decimal_degrees(raw: &str, coding: Coding) -> Result<f64, &'static str> {
    let cleaned = FORMATTING.replace_all(raw, "");
    let (sign, number) = match cleaned.chars().next() {
        Some('N' | 'n' | 'E' | 'e' | 'O' | 'o') => (1.0, &cleaned[1..]),
        Some('S' | 's' | 'W' | 'w') => (-1.0, &cleaned[1..]),
        Some(c) if c.is_ascii_digit() => (1.0, &cleaned[..]),
        Some(_) => return Err("unknown hemisphere"),
        None => return Err("empty value"),
    };

    let magnitude = match coding {
        Coding::Sexagesimal => {
            if !number.bytes().all(|b| b.is_ascii_digit()) {
                return Err("packed degrees must be digits only");
            }
            if number.len() < 5 {
                return Err("too short for degrees, minutes and seconds");
            }
            let (degrees, rest) = number.split_at(number.len() - 4);
            let degrees: u32 = degrees.parse().map_err(|_| "degrees out of range")?;
            let minutes: u32 = rest[..2].parse().map_err(|_| "invalid minutes")?;
            let seconds: u32 = rest[2..].parse().map_err(|_| "invalid seconds")?;
            if minutes >= 60 || seconds >= 60 {
                return Err("minutes and seconds must be below 60");
            }
            // six-digit fixed point fraction
            let micro = (minutes * 60 + seconds) * 10_000 / 36;
            f64::from(degrees) + f64::from(micro) / 1_000_000.0
        }
        Coding::Decimal => {
            if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
                return Err("not a decimal number");
            }
            number.parse().map_err(|_| "not a decimal number")?
        }
    };
    Ok(sign * magnitude)
}

/// Format degrees with at most six decimals, trailing zeros trimmed.
pub fn format_degrees(value: f64) -> String {
    let fixed = format!("{value:.6}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

/// A normalized point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}",
            format_degrees(self.latitude),
            format_degrees(self.longitude)
        )
    }
}

fn required(field: &FieldGroup, code: char) -> Result<&str, FieldError> {
    field
        .first(code)
        .filter(|value| !value.is_empty())
        .ok_or(FieldError::MissingSubfield(code))
}

fn axis(raw_min: &str, raw_max: &str, min_code: char, max_code: char, coding: Coding) -> Result<f64, FieldError> {
    let parse = |raw: &str, code: char| {
        to_decimal_degrees(raw, coding).map_err(|reason| FieldError::Malformed {
            code,
            value: raw.to_string(),
            reason: reason.to_string(),
        })
    };
    let min = parse(raw_min, min_code)?;
    if raw_min == raw_max {
        return Ok(min);
    }
    Ok((min + parse(raw_max, max_code)?) / 2.0)
}

/// Normalize the bounding box of a 034 field to its center point.
///
/// Returns `Ok(None)` when the coding is neither flagged nor detectable.
pub fn normalize(field: &FieldGroup) -> Result<Option<Coordinate>, FieldError> {
    let min_lon = required(field, 'd')?;
    let max_lon = required(field, 'e')?;
    let min_lat = required(field, 'f')?;
    let max_lat = required(field, 'g')?;

    let coding = match field.pseudo_first('9', 'A').and_then(|flag| flag.chars().next()) {
        Some(flag) => Coding::from_flag(flag)?,
        None => match detect_coding(min_lon) {
            Some(coding) => coding,
            None => return Ok(None),
        },
    };

    let longitude = axis(min_lon, max_lon, 'd', 'e', coding)?;
    let latitude = axis(min_lat, max_lat, 'f', 'g', coding)?;
    if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
        return Err(FieldError::OutOfRange {
            latitude,
            longitude,
        });
    }
    Ok(Some(Coordinate {
        latitude,
        longitude,
    }))
}
