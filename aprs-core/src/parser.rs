//! Grammar-driven APRS packet parser.
//!
//! Recursive descent over a byte cursor, ordered choice, greedy
//! repetition:
//!
//! ```text
//! packet      := address ">" address path ":" info
//! address     := alnum+ ("-" alnum+)?
//! path        := ("," address "*"?)*
//! info        := ANY datum* extension? comment
//! datum       := posit | timestamp            (posit tried first)
//! posit       := latitude ANY longitude ANY   (ANY = symbol chars)
//! timestamp   := DDHHMM[z/] | HHMMSS"h" | MMDDHHMM
//! extension   := "PHG"dddd | ddd"/"ddd
//! comment     := rest of line
//! ```
//!
//! Failures in the header (addresses, separators, data type) are hard
//! errors. Failures inside the body are not: the datum loop and the
//! extension option simply stop matching and whatever is left becomes
//! the comment, which is how real-world packets with free-form text
//! survive.

use crate::angle::{parse_latitude, parse_longitude};
use crate::packet::{
    AprsData, AprsDataExtension, AprsDatum, AprsInformationField, AprsLatLng, AprsPacket,
    AprsPath, AprsPosition, AprsSymbol, AprsTimestampDhm, AprsTimestampHms, AprsTimestampMdhm,
    AprsTimezone, Ax25Address, PathSegment,
};
use crate::types::ParseError;

/// Parser for the APRS-IS text packet format.
#[derive(Debug, Default)]
pub struct AprsParser;

impl AprsParser {
    pub fn new() -> Self {
        AprsParser
    }

    /// Parses one packet line (without line terminator).
    pub fn parse(&self, raw: &str) -> Result<AprsPacket, ParseError> {
        let mut cur = Cursor::new(raw);

        let source = address(&mut cur).ok_or(cur.expected("source address"))?;
        if !cur.eat(b'>') {
            return Err(cur.expected("'>' after source address"));
        }
        let dest = address(&mut cur).ok_or(cur.expected("destination address"))?;
        let path = path(&mut cur);
        if !cur.eat(b':') {
            return Err(cur.expected("':' before information field"));
        }
        let information_field = information_field(&mut cur)?;

        Ok(AprsPacket {
            source,
            dest,
            path,
            information_field,
        })
    }
}

/// Decodes raw APRS-IS bytes, which are ISO-8859-1, into a `String`.
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Byte-position cursor over the input. Only ever advances by whole
/// characters, so `rest()` is always a valid slice.
struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Cursor { input, pos: 0 }
    }

    fn expected(&self, expected: &'static str) -> ParseError {
        ParseError {
            offset: self.pos,
            expected,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    /// Consumes `b` if it is the next byte.
    fn eat(&mut self, b: u8) -> bool {
        if self.rest().as_bytes().first() == Some(&b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consumes the literal if it is next.
    fn eat_str(&mut self, literal: &str) -> bool {
        if self.rest().starts_with(literal) {
            self.pos += literal.len();
            true
        } else {
            false
        }
    }

    /// Consumes any single character.
    fn any_char(&mut self) -> Option<char> {
        let c = self.rest().chars().next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Consumes exactly `n` bytes if they are all ASCII.
    fn take_ascii(&mut self, n: usize) -> Option<&'a str> {
        let rest = self.rest();
        if rest.len() < n || !rest.as_bytes()[..n].iter().all(u8::is_ascii) {
            return None;
        }
        self.pos += n;
        Some(&rest[..n])
    }

    /// Consumes exactly `n` ASCII digits.
    fn take_digits(&mut self, n: usize) -> Option<&'a str> {
        let rest = self.rest();
        if rest.len() < n || !rest.as_bytes()[..n].iter().all(u8::is_ascii_digit) {
            return None;
        }
        self.pos += n;
        Some(&rest[..n])
    }

    /// Consumes one or more bytes matching `pred`.
    fn take_while1(&mut self, pred: impl Fn(u8) -> bool) -> Option<&'a str> {
        let rest = self.rest();
        let len = rest.bytes().take_while(|&b| pred(b)).count();
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }
}

// ---------------------------------------------------------------------------
// Header rules
// ---------------------------------------------------------------------------

fn is_address_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
}

fn address(cur: &mut Cursor) -> Option<Ax25Address> {
    let call = cur.take_while1(is_address_byte)?;
    let mark = cur.pos;
    let ssid = if cur.eat(b'-') {
        match cur.take_while1(is_address_byte) {
            Some(ssid) => Some(ssid),
            None => {
                // Dash without an SSID belongs to whatever follows.
                cur.pos = mark;
                None
            }
        }
    } else {
        None
    };
    Some(Ax25Address::new(call, ssid))
}

fn path(cur: &mut Cursor) -> AprsPath {
    let mut segments = Vec::new();
    loop {
        let mark = cur.pos;
        if !cur.eat(b',') {
            break;
        }
        let Some(addr) = address(cur) else {
            cur.pos = mark;
            break;
        };
        let digipeated = cur.eat(b'*');
        segments.push(PathSegment {
            address: addr,
            digipeated,
        });
    }
    AprsPath { segments }
}

// ---------------------------------------------------------------------------
// Information field rules
// ---------------------------------------------------------------------------

fn information_field(cur: &mut Cursor) -> Result<AprsInformationField, ParseError> {
    let data_type = cur.any_char().ok_or(cur.expected("data type character"))?;

    let mut data = Vec::new();
    while let Some(datum) = datum(cur) {
        data.push(datum);
    }
    let extension = extension(cur);
    let comment = cur.rest().to_string();

    Ok(AprsInformationField {
        data_type,
        data: AprsData { data },
        extension,
        comment,
    })
}

fn datum(cur: &mut Cursor) -> Option<AprsDatum> {
    posit(cur).map(AprsDatum::Position).or_else(|| timestamp(cur))
}

fn posit(cur: &mut Cursor) -> Option<AprsPosition> {
    let mark = cur.pos;
    let parsed = (|| {
        let lat = parse_latitude(cur.take_ascii(8)?).ok()?;
        let table = cur.any_char()?;
        let lon = parse_longitude(cur.take_ascii(9)?).ok()?;
        let symbol = cur.any_char()?;
        Some(AprsPosition {
            position: AprsLatLng {
                latitude: lat.degrees,
                longitude: lon.degrees,
                ambiguity: lat.ambiguity,
            },
            symbol: AprsSymbol::new(table, symbol),
        })
    })();
    if parsed.is_none() {
        cur.pos = mark;
    }
    parsed
}

fn timestamp(cur: &mut Cursor) -> Option<AprsDatum> {
    timestamp_dhm(cur)
        .or_else(|| timestamp_hms(cur))
        .or_else(|| timestamp_mdhm(cur))
}

fn timestamp_dhm(cur: &mut Cursor) -> Option<AprsDatum> {
    let mark = cur.pos;
    if let Some(digits) = cur.take_digits(6) {
        let zone = if cur.eat(b'z') {
            Some(AprsTimezone::Zulu)
        } else if cur.eat(b'/') {
            Some(AprsTimezone::Local)
        } else {
            None
        };
        if let Some(zone) = zone {
            let b = digits.as_bytes();
            return Some(AprsDatum::TimestampDhm(AprsTimestampDhm {
                day: two_digits(b, 0),
                hour: two_digits(b, 2),
                minute: two_digits(b, 4),
                zone,
            }));
        }
    }
    cur.pos = mark;
    None
}

fn timestamp_hms(cur: &mut Cursor) -> Option<AprsDatum> {
    let mark = cur.pos;
    if let Some(digits) = cur.take_digits(6) {
        if cur.eat(b'h') {
            let b = digits.as_bytes();
            return Some(AprsDatum::TimestampHms(AprsTimestampHms {
                hour: two_digits(b, 0),
                minute: two_digits(b, 2),
                second: two_digits(b, 4),
            }));
        }
    }
    cur.pos = mark;
    None
}

fn timestamp_mdhm(cur: &mut Cursor) -> Option<AprsDatum> {
    let digits = cur.take_digits(8)?;
    let b = digits.as_bytes();
    Some(AprsDatum::TimestampMdhm(AprsTimestampMdhm {
        month: two_digits(b, 0),
        day: two_digits(b, 2),
        hour: two_digits(b, 4),
        minute: two_digits(b, 6),
    }))
}

fn extension(cur: &mut Cursor) -> Option<AprsDataExtension> {
    power_height_gain(cur).or_else(|| course_speed(cur))
}

fn power_height_gain(cur: &mut Cursor) -> Option<AprsDataExtension> {
    let mark = cur.pos;
    if cur.eat_str("PHG") {
        if let Some(digits) = cur.take_digits(4) {
            let b = digits.as_bytes();
            return Some(AprsDataExtension::PowerHeightGain {
                power: b[0] as char,
                height: b[1] as char,
                gain: b[2] as char,
                directivity: b[3] as char,
            });
        }
    }
    cur.pos = mark;
    None
}

fn course_speed(cur: &mut Cursor) -> Option<AprsDataExtension> {
    let mark = cur.pos;
    if let Some(course) = cur.take_digits(3) {
        if cur.eat(b'/') {
            if let Some(speed) = cur.take_digits(3) {
                return Some(AprsDataExtension::CourseSpeed {
                    course: three_digits(course.as_bytes()),
                    speed: three_digits(speed.as_bytes()),
                });
            }
        }
    }
    cur.pos = mark;
    None
}

/// Two ASCII digits starting at `offset`, as a number. Digits guaranteed
/// by the cursor.
fn two_digits(b: &[u8], offset: usize) -> u8 {
    (b[offset] - b'0') * 10 + (b[offset + 1] - b'0')
}

fn three_digits(b: &[u8]) -> u16 {
    u16::from(b[0] - b'0') * 100 + u16::from(b[1] - b'0') * 10 + u16::from(b[2] - b'0')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
