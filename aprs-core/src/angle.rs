//! APRS angle codec.
//!
//! Positions travel as fixed-width degree/minute fields: latitude
//! `DDMM.mmC` (C in `NS`), longitude `DDDMM.mmC` (C in `EW`). The minute
//! hundredth is the finest unit, 1/6000 of a degree, roughly 18.5 m of
//! latitude.
//!
//! Senders coarsen a position by blanking digits right to left
//! ("ambiguity"): `4903.5 N` hides one digit, `49  .  N` hides four. A
//! blank is read back as `5`, the middle of the hidden range. The degree
//! field never blanks; a space there is malformed.
//!
//! Encoding always emits full precision. Decoding an ambiguous field and
//! re-encoding it therefore produces the center-of-box digits, not the
//! original blanks.

use crate::packet::PositAmbiguity;
use crate::types::MalformedAngleError;

/// One degree holds 6000 minute-hundredths.
const HUNDREDTHS_PER_DEGREE: f64 = 6000.0;

/// An angle field decoded to signed decimal degrees, plus the precision
/// the sender declared by blanking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedAngle {
    pub degrees: f64,
    pub ambiguity: PositAmbiguity,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Parses a latitude field, e.g. `4048.68N`. Expects exactly 8 bytes.
pub fn parse_latitude(text: &str) -> Result<DecodedAngle, MalformedAngleError> {
    let b = text.as_bytes();
    if b.len() != 8 || b[4] != b'.' {
        return Err(MalformedAngleError {
            reason: "latitude is not of the form DDMM.mmN",
        });
    }
    let sign = match b[7] {
        b'N' => 1.0,
        b'S' => -1.0,
        _ => {
            return Err(MalformedAngleError {
                reason: "latitude hemisphere is not N or S",
            })
        }
    };
    decode_fields(&b[0..2], &b[2..4], &b[5..7], sign)
}

/// Parses a longitude field, e.g. `08000.15W`. Expects exactly 9 bytes.
pub fn parse_longitude(text: &str) -> Result<DecodedAngle, MalformedAngleError> {
    let b = text.as_bytes();
    if b.len() != 9 || b[5] != b'.' {
        return Err(MalformedAngleError {
            reason: "longitude is not of the form DDDMM.mmE",
        });
    }
    let sign = match b[8] {
        b'E' => 1.0,
        b'W' => -1.0,
        _ => {
            return Err(MalformedAngleError {
                reason: "longitude hemisphere is not E or W",
            })
        }
    };
    decode_fields(&b[0..3], &b[3..5], &b[6..8], sign)
}

fn decode_fields(
    deg: &[u8],
    min: &[u8],
    hundredths: &[u8],
    sign: f64,
) -> Result<DecodedAngle, MalformedAngleError> {
    for &c in deg.iter().chain(min).chain(hundredths) {
        if !c.is_ascii_digit() && c != b' ' {
            return Err(MalformedAngleError {
                reason: "angle field holds a non-digit, non-space byte",
            });
        }
    }
    if deg.contains(&b' ') {
        return Err(MalformedAngleError {
            reason: "degree digits may not be blanked",
        });
    }

    let spaces = min.iter().chain(hundredths).filter(|&&c| c == b' ').count();
    let ambiguity = PositAmbiguity::from_omitted_spaces(spaces).ok_or(MalformedAngleError {
        reason: "more than four ambiguity spaces",
    })?;

    let degrees = field_value(deg);
    let minutes = field_value(min);
    let hund = field_value(hundredths);
    Ok(DecodedAngle {
        degrees: sign * (degrees + minutes / 60.0 + hund / HUNDREDTHS_PER_DEGREE),
        ambiguity,
    })
}

/// Numeric value of a field after blank substitution. Digits only by the
/// time this runs.
fn field_value(field: &[u8]) -> f64 {
    field.iter().fold(0.0, |acc, &c| {
        let digit = if c == b' ' { 5 } else { c - b'0' };
        acc * 10.0 + f64::from(digit)
    })
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Formats a latitude in signed decimal degrees as `DDMM.mmN`/`DDMM.mmS`.
pub fn format_latitude(angle: f64) -> String {
    let (deg, min, hund) = split_angle(angle);
    let hemisphere = if angle < 0.0 { "S" } else { "N" };
    format!("{deg:02}{min:02}.{hund:02}{hemisphere}")
}

/// Formats a longitude in signed decimal degrees as `DDDMM.mmE`/`DDDMM.mmW`.
pub fn format_longitude(angle: f64) -> String {
    let (deg, min, hund) = split_angle(angle);
    let hemisphere = if angle < 0.0 { "W" } else { "E" };
    format!("{deg:03}{min:02}.{hund:02}{hemisphere}")
}

/// Splits |angle| into whole degrees, whole minutes, and rounded minute
/// hundredths. Rounding may carry all the way into the degrees so the
/// emitted field always re-parses.
fn split_angle(angle: f64) -> (u32, u32, u32) {
    let abs = angle.abs();
    let mut deg = abs.trunc() as u32;
    let minutes = (abs - abs.trunc()) * 60.0;
    let mut min = minutes.trunc() as u32;
    let mut hund = ((minutes - minutes.trunc()) * 100.0).round() as u32;
    if hund == 100 {
        hund = 0;
        min += 1;
    }
    if min == 60 {
        min = 0;
        deg += 1;
    }
    (deg, min, hund)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
