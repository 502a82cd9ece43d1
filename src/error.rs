use std::path::PathBuf;

use thiserror::Error;

/// Flat error taxonomy for every fallible operation in this crate.
///
/// Deliberately flat (no nested source enums beyond `Io`/`ExternalFailure`)
/// so callers can match on a single `OtaError` regardless of which
/// component (codec, chunker, package builder/parser) raised it.
#[derive(Error, Debug)]
pub enum OtaError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad magic: expected {expected:?}, got {got:?}")]
    BadMagic { expected: Vec<u8>, got: Vec<u8> },

    #[error("truncated input: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("inconsistent header: header_length {header_length} implies a non-integral descriptor count (remainder {remainder})")]
    InconsistentHeader {
        header_length: u16,
        remainder: usize,
    },

    #[error("from and to inputs are byte-identical; incremental diff makes no sense")]
    IdenticalInputs,

    #[error("component {magic:?} missing from package {which}")]
    MissingComponent { magic: [u8; 3], which: &'static str },

    #[error("external adapter failure ({adapter}): {diagnostic}")]
    ExternalFailure {
        adapter: &'static str,
        diagnostic: String,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl OtaError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, OtaError>;
