//! Archive-level data model: headers, entries, filename semantics, and
//! lookup.

use std::io::Write;
use std::path::MAIN_SEPARATOR;

use crate::bytewindow::ByteWindow;
use crate::codec;
use crate::{Error, Result};

/// One archived member's metadata and payload window.
///
/// `filename` is the *runtime* filename: if the archive has a `prefix`
/// header, it has already been joined in by the reader (see
/// [`crate::reader`]), matching the on-disk format's lookup semantics.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Raw filename as stored (or prefix-joined), backslash-separated.
    pub filename: Vec<u8>,
    /// 4-byte tag identifying how the payload is packed.
    pub packing_method: [u8; 4],
    /// Declared uncompressed byte count; 0 means "stored uncompressed".
    pub original_size: u32,
    /// Reserved 4 bytes, preserved but unused.
    pub reserved: u32,
    /// Seconds since the Unix epoch.
    pub timestamp: u32,
    /// Number of bytes the payload occupies in the archive.
    pub data_size: u32,
    /// Window over exactly `data_size` bytes within the archive.
    pub payload: ByteWindow,
}

/// Bytes that are illegal in a PBO filename on the host filesystem.
const INVALID_FILENAME_BYTES: &[u8] = b"\t?*<>:\"|";

/// Windows reserved device names (checked case-insensitively per path
/// segment, ignoring any trailing extension).
const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

impl Entry {
    /// Split the raw filename on `\` and `/`, dropping empty segments
    /// produced by leading or duplicated separators.
    ///
    /// If the result would be empty, yields a single empty segment.
    pub fn split_filename(&self) -> Vec<Vec<u8>> {
        let parts: Vec<Vec<u8>> = self
            .filename
            .split(|&b| b == b'\\' || b == b'/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_vec())
            .collect();

        if parts.is_empty() { vec![Vec::new()] } else { parts }
    }

    /// Join the split segments with the host path separator, replacing
    /// bytes that are not valid in the host's text encoding with U+FFFD.
    pub fn normalized_filename(&self) -> String {
        normalize_parts(&self.split_filename())
    }

    /// `original_size` if nonzero, else `data_size` - the size the file
    /// occupies once unpacked.
    pub fn unpacked_size(&self) -> u32 {
        if self.original_size != 0 {
            self.original_size
        } else {
            self.data_size
        }
    }

    /// Render `packing_method` as four printable characters, with
    /// non-printable or non-ASCII bytes replaced by a space. Informational
    /// only - dispatch is governed by the original/data-size relationship
    /// (see [`Entry::unpack`]).
    pub fn type_string(&self) -> String {
        self.packing_method
            .iter()
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { ' ' })
            .collect()
    }

    /// Whether any raw byte in the filename is illegal on the host
    /// filesystem, or any path segment's stem is a reserved device name.
    pub fn has_invalid_filename(&self) -> bool {
        if self.filename.iter().any(|&b| INVALID_FILENAME_BYTES.contains(&b) || b >= 0x80) {
            return true;
        }

        self.split_filename().iter().any(|segment| is_reserved_device_name(segment))
    }

    /// An entry is obfuscated iff its filename is invalid *and* ends in
    /// `.c`.
    pub fn is_obfuscated(&self) -> bool {
        self.has_invalid_filename() && self.filename.ends_with(b".c")
    }

    /// Write this entry's unpacked content to `sink`.
    ///
    /// A zero or matching `original_size` means the payload is stored
    /// uncompressed; otherwise the first `data_size - 4` bytes are
    /// decompressed and checked against the trailing checksum.
    pub fn unpack<W: Write>(&self, mut sink: W) -> Result<()> {
        let mut payload = self.payload.clone();
        payload.seek(0);

        if self.original_size == 0 || self.original_size == self.data_size {
            let bytes = payload.read_exact(self.data_size as u64)?;
            sink.write_all(&bytes)?;
            return Ok(());
        }

        let compressed_len = self
            .data_size
            .checked_sub(4)
            .ok_or(Error::InvalidArchive("compressed entry smaller than checksum"))?;
        let compressed = payload.read_exact(compressed_len as u64)?;
        let expected = payload.read_u32_le()?;

        let expanded = codec::expand(&compressed, self.original_size as usize);
        let actual = codec::additive_checksum(&expanded);

        if actual != expected {
            return Err(Error::ChecksumMismatch { actual, expected });
        }

        sink.write_all(&expanded)?;
        Ok(())
    }
}

fn is_reserved_device_name(segment: &[u8]) -> bool {
    let stem = match segment.iter().position(|&b| b == b'.') {
        Some(dot) => &segment[..dot],
        None => segment,
    };

    let Ok(stem) = std::str::from_utf8(stem) else {
        return false;
    };

    RESERVED_DEVICE_NAMES.iter().any(|name| name.eq_ignore_ascii_case(stem))
}

/// Join split path segments with the host separator, lossily decoding each
/// segment as UTF-8 (invalid sequences become U+FFFD).
pub(crate) fn normalize_parts(parts: &[Vec<u8>]) -> String {
    parts
        .iter()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect::<Vec<_>>()
        .join(&MAIN_SEPARATOR.to_string())
}

/// Either a normalized path string or a raw filename, used to look up an
/// [`Entry`] in an [`crate::reader::Archive`].
pub enum FindKey<'a> {
    /// Match case-insensitively against [`Entry::normalized_filename`].
    Normalized(&'a str),
    /// Match case-insensitively against the raw, stored [`Entry::filename`].
    Raw(&'a [u8]),
}

impl<'a> From<&'a str> for FindKey<'a> {
    fn from(s: &'a str) -> Self {
        FindKey::Normalized(s)
    }
}

impl<'a> From<&'a [u8]> for FindKey<'a> {
    fn from(b: &'a [u8]) -> Self {
        FindKey::Raw(b)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for FindKey<'a> {
    fn from(b: &'a [u8; N]) -> Self {
        FindKey::Raw(b.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn entry(filename: &[u8]) -> Entry {
        Entry {
            filename: filename.to_vec(),
            packing_method: *b"\0\0\0\0",
            original_size: 0,
            reserved: 0,
            timestamp: 0,
            data_size: 0,
            payload: ByteWindow::new(Rc::new(Vec::<u8>::new())),
        }
    }

    #[test]
    fn split_filename_drops_empty_segments() {
        let e = entry(b"\\a\\\\b\\c.txt");
        assert_eq!(
            e.split_filename(),
            vec![b"a".to_vec(), b"b".to_vec(), b"c.txt".to_vec()]
        );
    }

    #[test]
    fn split_filename_of_empty_name_yields_one_empty_segment() {
        let e = entry(b"");
        assert_eq!(e.split_filename(), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn unpacked_size_falls_back_to_data_size() {
        let mut e = entry(b"f");
        e.data_size = 42;
        assert_eq!(e.unpacked_size(), 42);
        e.original_size = 100;
        assert_eq!(e.unpacked_size(), 100);
    }

    #[test]
    fn classification_matches_tab_question_and_high_bytes() {
        assert!(entry(b"weird\t.c").is_obfuscated());
        assert!(entry(b"weird?.c").is_obfuscated());
        assert!(entry(&[b'x', 0x81, b'.', b'c']).is_obfuscated());
        assert!(!entry(b"normal.c").is_obfuscated());
        // Invalid but not a .c file: invalid, not obfuscated.
        assert!(entry(b"weird?.txt").has_invalid_filename());
        assert!(!entry(b"weird?.txt").is_obfuscated());
    }

    #[test]
    fn reserved_device_name_is_invalid() {
        assert!(entry(b"CON.txt").has_invalid_filename());
        assert!(entry(b"com3").has_invalid_filename());
        assert!(!entry(b"console.txt").has_invalid_filename());
    }

    #[test]
    fn type_string_blanks_non_printable_bytes() {
        let mut e = entry(b"f");
        e.packing_method = *b"V\x00rs";
        assert_eq!(e.type_string(), "V rs");
    }
}
