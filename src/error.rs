//! Fatal-to-image error taxonomy (see spec ERROR HANDLING DESIGN, class 1).
//!
//! Everything finer-grained than this — fatal-to-directory, recoverable,
//! invariant-violation — never escapes a successful [`crate::pe::ParsedImage`]
//! construction. Those are logged through the `log` facade and leave the
//! offending field at its empty default.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("failed to read image file: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a valid MS-DOS executable (missing 'MZ' signature)")]
    InvalidDosSignature,

    #[error("not a valid PE image (missing 'PE\\0\\0' signature)")]
    InvalidNtSignature,

    #[error("unsupported machine type {0:#06x}")]
    UnsupportedMachine(u16),

    #[error("optional header magic {0:#06x} is neither PE32 nor PE32+")]
    UnsupportedOptionalHeaderMagic(u16),

    #[error("truncated image: {0}")]
    Truncated(&'static str),
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
