//! The PBO container parser: header records, property list, file index,
//! and payload windows.

use std::rc::Rc;

use crate::archive::{Entry, FindKey};
use crate::bytewindow::{ByteSource, ByteWindow};
use crate::{Error, Result};

/// An ordered list of header properties, an ordered list of entries, and an
/// optional `prefix` header. Immutable once constructed.
#[derive(Debug)]
pub struct Archive {
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    prefix: Option<Vec<u8>>,
    entries: Vec<Entry>,
}

impl Archive {
    /// The ordered `(key, value)` header pairs, duplicates preserved.
    pub fn headers(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.headers
    }

    /// The `prefix` header's value, if the archive has one.
    pub fn prefix(&self) -> Option<&[u8]> {
        self.prefix.as_deref()
    }

    /// All entries, in on-disk order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Find an entry by normalized path (`&str`) or raw filename (`&[u8]`),
    /// matching case-insensitively. Returns the first match.
    pub fn find<'a>(&self, key: impl Into<FindKey<'a>>) -> Option<&Entry> {
        match key.into() {
            FindKey::Raw(raw) => self
                .entries
                .iter()
                .find(|e| e.filename.eq_ignore_ascii_case(raw)),
            FindKey::Normalized(name) => self
                .entries
                .iter()
                .find(|e| e.normalized_filename().eq_ignore_ascii_case(name)),
        }
    }
}

/// Parse a complete PBO archive from `source`.
pub fn open<S: ByteSource + 'static>(source: S) -> Result<Archive> {
    let source: Rc<dyn ByteSource> = Rc::new(source);
    let mut window = ByteWindow::new(source);
    parse(&mut window)
}

fn parse(window: &mut ByteWindow) -> Result<Archive> {
    let headers = read_headers(window)?;
    let prefix = find_prefix(&headers);
    let entries = read_entries(window, prefix.as_deref())?;

    Ok(Archive {
        headers,
        prefix,
        entries,
    })
}

fn read_headers(window: &mut ByteWindow) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut headers = Vec::new();

    // Preamble probe: an empty string at the very start means a property
    // list follows; otherwise there is none and we rewind to ENTRIES.
    if !window.read_cstring()?.is_empty() {
        window.seek(0);
        return Ok(headers);
    }

    // HEADER_PROBE: the version sentinel, if present, occupies 20 bytes
    // (its own 4-byte magic, 15 bytes of padding, and the terminator).
    let probe_start = window.tell();
    let key = window.read_cstring()?;
    if key == b"sreV" {
        log::trace!("HEADER_PROBE: sreV sentinel present, skipping to offset {}", probe_start + 20);
        window.seek(probe_start + 20);
    } else {
        log::trace!("HEADER_PROBE: no sreV sentinel, rewinding to offset {probe_start}");
        window.seek(probe_start);
    }

    // PROPERTIES: zero-terminated (key, value) pairs until an empty key.
    loop {
        let key = window.read_cstring()?;
        if key.is_empty() {
            log::trace!("PROPERTIES: terminated after {} entries", headers.len());
            break;
        }
        let value = window.read_cstring()?;
        headers.push((key, value));
    }

    Ok(headers)
}

fn find_prefix(headers: &[(Vec<u8>, Vec<u8>)]) -> Option<Vec<u8>> {
    headers.iter().find(|(k, _)| k == b"prefix").map(|(_, v)| v.clone())
}

fn read_entries(window: &mut ByteWindow, prefix: Option<&[u8]>) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();

    loop {
        let mut filename = window.read_cstring()?;
        if filename.is_empty() {
            log::trace!("ENTRIES: terminated after {} entries", entries.len());
            break;
        }

        if let Some(prefix) = prefix {
            filename = join_prefix(prefix, &filename);
        }

        let packing_bytes = window.read_exact(4)?;
        let packing_method = [packing_bytes[0], packing_bytes[1], packing_bytes[2], packing_bytes[3]];
        let original_size = window.read_u32_le()?;
        let reserved = window.read_u32_le()?;
        let timestamp = window.read_u32_le()?;
        let data_size = window.read_u32_le()?;

        entries.push(Entry {
            filename,
            packing_method,
            original_size,
            reserved,
            timestamp,
            data_size,
            // Assigned below, once the payload region's start is known.
            payload: window.sub(0, 0),
        });
    }

    let mut offset = window.tell() + 20;
    for entry in &mut entries {
        entry.payload = window.sub(offset, entry.data_size as u64);
        offset += entry.data_size as u64;
    }

    Ok(entries)
}

fn join_prefix(prefix: &[u8], filename: &[u8]) -> Vec<u8> {
    let mut result = prefix.to_vec();
    if !result.is_empty() && !result.ends_with(b"\\") {
        result.push(b'\\');
    }
    result.extend_from_slice(filename);
    result
}
