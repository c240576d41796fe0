//! Fixed-grid geocell codes.
//!
//! A geocell is a short base-32 code naming one cell of a fixed global
//! grid. Encoding interleaves longitude and latitude halving bits,
//! longitude first, five bits per character:
//!
//! - 4-char cell codes carry 10 bits per axis: cells are 0.3515625
//!   degrees of longitude by 0.17578125 degrees of latitude. These key
//!   the region cache and the `/api/v1/cell` endpoint.
//! - 8-char point codes carry 20 bits per axis, about 19 m of latitude,
//!   and name a station's position in posit DTOs.
//!
//! Cells tile the globe without gaps or overlap, and a cell's bounds are
//! derivable from its code alone.

use std::fmt;

use crate::types::ParseError;

const ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Characters in a cell code.
pub const CELL_CODE_LEN: usize = 4;
/// Characters in a point code.
pub const POINT_CODE_LEN: usize = 8;

/// Longitude span of one 4-char cell: 360 / 2^10.
pub const CELL_WIDTH_DEG: f64 = 0.3515625;
/// Latitude span of one 4-char cell: 180 / 2^10.
pub const CELL_HEIGHT_DEG: f64 = 0.17578125;

/// A west/south/east/north envelope in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl CellBounds {
    /// Point membership; west/south edges inclusive, east/north exclusive,
    /// matching how neighboring cells share edges.
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.south
            && latitude < self.north
            && longitude >= self.west
            && longitude < self.east
    }
}

/// A 4-char grid cell code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Geocell {
    code: String,
}

impl Geocell {
    /// The cell containing a point. Latitude clamps to [-90, 90],
    /// longitude wraps into [-180, 180).
    pub fn containing(latitude: f64, longitude: f64) -> Geocell {
        Geocell {
            code: encode(latitude, longitude, CELL_CODE_LEN),
        }
    }

    /// Parses a cell code; accepts uppercase, stores lowercase.
    pub fn from_code(code: &str) -> Result<Geocell, ParseError> {
        let code = code.to_ascii_lowercase();
        validate(&code, CELL_CODE_LEN, "4-character base-32 cell code")?;
        Ok(Geocell { code })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn bounds(&self) -> CellBounds {
        // Validated at construction, so decoding cannot fail.
        decode_intervals(self.code.as_bytes())
    }

    /// (latitude, longitude) of the cell's center.
    pub fn center(&self) -> (f64, f64) {
        let b = self.bounds();
        ((b.south + b.north) / 2.0, (b.west + b.east) / 2.0)
    }

    /// Every cell intersecting the envelope, stepping east then north
    /// from the cell containing the southwest corner. Always returns at
    /// least the corner cell. Assumes `west <= east` (no antimeridian
    /// crossing); the caller bounds the envelope size.
    pub fn cells_within(bounds: &CellBounds) -> Vec<Geocell> {
        let origin = Geocell::containing(bounds.south, bounds.west).bounds();
        let mut cells = Vec::new();
        let mut south = origin.south;
        loop {
            let mut west = origin.west;
            loop {
                cells.push(Geocell::containing(
                    south + CELL_HEIGHT_DEG / 2.0,
                    west + CELL_WIDTH_DEG / 2.0,
                ));
                west += CELL_WIDTH_DEG;
                if west >= bounds.east {
                    break;
                }
            }
            south += CELL_HEIGHT_DEG;
            if south >= bounds.north {
                break;
            }
        }
        cells
    }
}

impl fmt::Display for Geocell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// Encodes a point at point-code precision.
pub fn point_code(latitude: f64, longitude: f64) -> String {
    encode(latitude, longitude, POINT_CODE_LEN)
}

/// Center of an 8-char point code's box.
pub fn decode_point(code: &str) -> Result<(f64, f64), ParseError> {
    let code = code.to_ascii_lowercase();
    validate(&code, POINT_CODE_LEN, "8-character base-32 point code")?;
    let bounds = decode_intervals(code.as_bytes());
    Ok(((bounds.south + bounds.north) / 2.0, (bounds.west + bounds.east) / 2.0))
}

// ---------------------------------------------------------------------------
// Codec internals
// ---------------------------------------------------------------------------

fn encode(latitude: f64, longitude: f64, len: usize) -> String {
    let latitude = latitude.clamp(-90.0, 90.0);
    let longitude = (longitude + 180.0).rem_euclid(360.0) - 180.0;

    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lon_lo, mut lon_hi) = (-180.0_f64, 180.0_f64);
    let mut on_longitude = true;
    let mut code = String::with_capacity(len);

    for _ in 0..len {
        let mut value = 0usize;
        for _ in 0..5 {
            value <<= 1;
            if on_longitude {
                let mid = (lon_lo + lon_hi) / 2.0;
                if longitude >= mid {
                    value |= 1;
                    lon_lo = mid;
                } else {
                    lon_hi = mid;
                }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if latitude >= mid {
                    value |= 1;
                    lat_lo = mid;
                } else {
                    lat_hi = mid;
                }
            }
            on_longitude = !on_longitude;
        }
        code.push(ALPHABET[value] as char);
    }
    code
}

/// Shrinks the world intervals by each bit of the code. Input must be
/// validated alphabet bytes.
fn decode_intervals(code: &[u8]) -> CellBounds {
    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lon_lo, mut lon_hi) = (-180.0_f64, 180.0_f64);
    let mut on_longitude = true;

    for &c in code {
        let value = alphabet_index(c).unwrap_or(0);
        for shift in (0..5).rev() {
            let bit = (value >> shift) & 1;
            if on_longitude {
                let mid = (lon_lo + lon_hi) / 2.0;
                if bit == 1 {
                    lon_lo = mid;
                } else {
                    lon_hi = mid;
                }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if bit == 1 {
                    lat_lo = mid;
                } else {
                    lat_hi = mid;
                }
            }
            on_longitude = !on_longitude;
        }
    }
    CellBounds {
        west: lon_lo,
        south: lat_lo,
        east: lon_hi,
        north: lat_hi,
    }
}

fn alphabet_index(c: u8) -> Option<usize> {
    ALPHABET.iter().position(|&a| a == c)
}

fn validate(code: &str, len: usize, expected: &'static str) -> Result<(), ParseError> {
    if code.len() != len {
        return Err(ParseError {
            offset: code.len().min(len),
            expected,
        });
    }
    for (offset, &c) in code.as_bytes().iter().enumerate() {
        if alphabet_index(c).is_none() {
            return Err(ParseError { offset, expected });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
