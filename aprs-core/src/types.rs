//! Error taxonomy shared across aprs-core.
//!
//! Three failure classes cover the whole library: text that does not parse
//! ([`ParseError`]), an information field carrying two datums of the same
//! kind ([`DuplicateDataError`]), and angle fields whose digits cannot be
//! interpreted ([`MalformedAngleError`]).

use thiserror::Error;

/// Input text rejected by a parser (packet grammar or geocell codes).
///
/// `offset` is the byte position the parser had reached; `expected`
/// describes the construct it was looking for there.
#[derive(Debug, Error)]
#[error("parse error at byte {offset}: expected {expected}")]
pub struct ParseError {
    pub offset: usize,
    pub expected: &'static str,
}

/// An information field holds more than one datum of the requested kind.
///
/// The grammar accepts such packets; the typed accessors refuse to pick a
/// winner.
#[derive(Debug, Error)]
#[error("information field carries more than one {kind} datum")]
pub struct DuplicateDataError {
    pub kind: &'static str,
}

/// An angle field whose digits cannot be interpreted, e.g. a blanked
/// degree position or more ambiguity spaces than the format defines.
#[derive(Debug, Error)]
#[error("malformed angle: {reason}")]
pub struct MalformedAngleError {
    pub reason: &'static str,
}
