pub mod apertures;
pub mod commands;
pub mod coord;
pub mod interpreter;
pub mod lexer;
pub mod macros;

use crate::error::ParseError;
use crate::mesh::GeometryRecord;

/// Run the full pipeline over one Gerber file: lexer → command stream →
/// interpreter. Only an encoding failure is fatal; everything else degrades
/// to warnings in the returned record.
pub fn parse(content: &str) -> Result<GeometryRecord, ParseError> {
    let tokens = lexer::tokenize(content)?;
    let stream = commands::parse_commands(&tokens);
    Ok(interpreter::interpret(stream))
}
