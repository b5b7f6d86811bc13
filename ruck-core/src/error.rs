use std::io;
use std::path::PathBuf;

/// Errors surfaced by the library boundary of `ruck-core`.
///
/// Library callers are expected to match on the variant rather than parse
/// the `Display` text; the CLI layer is the one place that turns these into
/// localized, user-facing lines (see `localize`).
#[derive(Debug, thiserror::Error)]
pub enum RuckError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("bad format: {0}")]
    BadFormat(String),

    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("key too long ({len} bytes, max {max}): {key}")]
    KeyTooLong { key: String, len: usize, max: usize },

    #[error("image codec error for {path}: {message}")]
    Codec { path: PathBuf, message: String },

    #[error("rectangle does not fit within {max_w}x{max_h} (allow_r90={allow_r90}): {key} is {w}x{h}")]
    CannotFit { key: String, w: u32, h: u32, max_w: u32, max_h: u32, allow_r90: bool },

    #[error("glob produced no matches: {pattern} (under {path})")]
    NoMatches { pattern: String, path: PathBuf },

    #[error("line {line}, col {col}: {message}")]
    Parse { line: usize, col: usize, message: String },

    #[error("out of memory")]
    OutOfMemory,
}

pub type Result<T> = std::result::Result<T, RuckError>;

/// Extension trait giving `io::Result`/`Option` call sites the teacher's
/// `.with_context(...)` ergonomics while still producing a typed `RuckError`.
pub trait IoContext<T> {
    fn io_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| RuckError::Io { path: path.into(), source })
    }
}
