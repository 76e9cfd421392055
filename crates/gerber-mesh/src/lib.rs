//! Pure Gerber RS-274X / Excellon parsing core: bytes in, triangulated
//! geometry and metadata out. No I/O, no globals; all state lives for a
//! single call.

pub mod error;
pub mod excellon;
pub mod geom;
pub mod gerber;
pub mod mesh;

pub use error::ParseError;
pub use mesh::{BBox, ClearRange, GeometryRecord};

/// Parse a Gerber RS-274X image file into a triangulated geometry record.
///
/// Returns an error only for empty input or an encoding failure; every
/// other input yields a (possibly empty, possibly partial) record with
/// recoverable problems reported through its warning list.
pub fn parse_gerber(bytes: &[u8]) -> Result<GeometryRecord, ParseError> {
    let content = decode(bytes)?;
    gerber::parse(content)
}

/// Parse an Excellon NC-drill file into a triangulated geometry record.
/// Each drill hit becomes a circle flash with the tool's diameter.
pub fn parse_excellon(bytes: &[u8]) -> Result<GeometryRecord, ParseError> {
    let content = decode(bytes)?;
    Ok(excellon::parse(content))
}

fn decode(bytes: &[u8]) -> Result<&str, ParseError> {
    if bytes.is_empty() {
        return Err(ParseError::EmptyInput);
    }
    std::str::from_utf8(bytes).map_err(|e| ParseError::InvalidEncoding(e.to_string()))
}
