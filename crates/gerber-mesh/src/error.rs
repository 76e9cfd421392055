use thiserror::Error;

/// Fatal parse failures. Everything recoverable is demoted to a warning in
/// the output record instead (see `MeshBuilder::warn`).
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("empty input")]
    EmptyInput,

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
}
