//! Library-wide error and result types.

use std::fmt;
use std::io;

/// Result alias used throughout pbo_archive.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the library can produce.
///
/// Error messages are kept intentionally terse; callers that need richer
/// context should wrap `Error` in their own type.
#[derive(Debug)]
pub enum Error {
    /// A fixed-width read ran past the end of a [`crate::bytewindow::ByteWindow`].
    InsufficientBytes,
    /// A structural violation was found while parsing the archive (e.g. a
    /// property with no value, or a truncated entry row).
    InvalidArchive(&'static str),
    /// The trailing additive checksum of a decompressed payload did not
    /// match the computed sum.
    ChecksumMismatch {
        /// Checksum computed from the decompressed bytes.
        actual: u32,
        /// Checksum stored in the archive.
        expected: u32,
    },
    /// [`crate::codec::collapse`] could not produce any back-reference for
    /// the given input.
    NotCompressible,
    /// The number of bytes written for a [`crate::writer::Writer`] entry
    /// disagreed with its recorded size.
    SizeMismatch {
        /// Path of the offending entry.
        path: String,
        /// Size recorded in the index.
        expected: u64,
        /// Number of bytes actually written.
        actual: u64,
    },
    /// A named lookup (by path or raw filename) found no matching entry.
    EntryNotFound(String),
    /// The external config-binarizer conversion failed; callers recover by
    /// falling through to verbatim extraction.
    ConverterFailure(String),
    /// An underlying source or sink failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InsufficientBytes => write!(f, "not enough bytes remaining for read"),
            Error::InvalidArchive(s) => write!(f, "invalid archive: {s}"),
            Error::ChecksumMismatch { actual, expected } => {
                write!(f, "checksum mismatch ({actual:#x} != {expected:#x})")
            }
            Error::NotCompressible => write!(f, "input is not compressible"),
            Error::SizeMismatch {
                path,
                expected,
                actual,
            } => write!(
                f,
                "size mismatch for {path}: expected {expected} bytes, wrote {actual}"
            ),
            Error::EntryNotFound(name) => write!(f, "file not found: {name}"),
            Error::ConverterFailure(msg) => write!(f, "config converter failed: {msg}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Error::Io(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
