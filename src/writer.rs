//! Serializes headers, a sorted file index, payloads, and a terminating
//! SHA-1 digest into a PBO archive.

use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use std::time::UNIX_EPOCH;

use sha1::{Digest, Sha1};

use crate::{Error, Result};

/// An abstract file to be added to a [`Writer`]: its size, modification
/// time, and content are fetched lazily at `write` time, not at `add_file`
/// time - this mirrors `PBOWriter.write`'s behavior of `stat`-ing each path
/// only once output actually begins.
pub trait FileSource {
    /// Size in bytes, as would be recorded in the index.
    fn size(&self) -> Result<u64>;
    /// Modification time as seconds since the Unix epoch.
    fn mtime(&self) -> Result<u32>;
    /// The file's full content.
    fn read(&self) -> Result<Vec<u8>>;
}

/// A [`FileSource`] backed by a real filesystem path.
pub struct FsPath(pub PathBuf);

impl FileSource for FsPath {
    fn size(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.0)?.len())
    }

    fn mtime(&self) -> Result<u32> {
        let modified = std::fs::metadata(&self.0)?.modified()?;
        let secs = modified.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        Ok(secs as u32)
    }

    fn read(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(&self.0)?)
    }
}

struct PendingFile {
    read_path: PathBuf,
    source: Rc<dyn FileSource>,
}

/// Assembles header properties and file entries in memory, then emits a
/// complete PBO archive in one pass.
pub struct Writer {
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    files: Vec<PendingFile>,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Append a `(key, value)` header pair, in insertion order.
    pub fn add_header(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Add a file whose content is provided by a custom [`FileSource`],
    /// under the given abstract read path.
    pub fn add_file(&mut self, read_path: impl Into<PathBuf>, source: impl FileSource + 'static) {
        self.files.push(PendingFile {
            read_path: read_path.into(),
            source: Rc::new(source),
        });
    }

    /// Add a file read directly from the filesystem at `path`.
    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.add_file(path.clone(), FsPath(path));
    }

    /// Serialize headers, the sorted/deduplicated file index, payloads, and
    /// the trailing SHA-1 digest to `sink`.
    pub fn write<W: Write>(&self, sink: W) -> Result<()> {
        let records = self.resolve_records()?;

        let mut hashing = Sha1WritingSink::new(sink);

        hashing.write_all(&[0])?;
        hashing.write_all(b"sreV\0")?;
        hashing.write_all(&[0u8; 15])?;

        for (key, value) in &self.headers {
            hashing.write_all(key)?;
            hashing.write_all(&[0])?;
            hashing.write_all(value)?;
            hashing.write_all(&[0])?;
        }
        hashing.write_all(&[0])?; // property terminator

        for record in &records {
            write_index_row(&mut hashing, &record.stored_path, record.size, record.mtime)?;
        }
        hashing.write_all(&[0u8; 21])?; // index terminator + reserved pad

        for record in &records {
            let content = record.source.read()?;
            if content.len() as u64 != record.size {
                return Err(Error::SizeMismatch {
                    path: String::from_utf8_lossy(&record.stored_path).into_owned(),
                    expected: record.size,
                    actual: content.len() as u64,
                });
            }
            hashing.write_all(&content)?;
        }

        let (mut sink, digest) = hashing.finalize();
        sink.write_all(&[0])?;
        sink.write_all(&digest)?;
        Ok(())
    }

    fn resolve_records(&self) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(self.files.len());
        for file in &self.files {
            records.push(Record {
                read_path: file.read_path.clone(),
                stored_path: stored_path_bytes(&file.read_path),
                size: file.source.size()?,
                mtime: file.source.mtime()?,
                source: file.source.clone(),
            });
        }

        records.sort_by(|a, b| a.read_path.cmp(&b.read_path));
        let before_dedup = records.len();
        records.dedup_by(|a, b| {
            a.read_path == b.read_path
                && a.stored_path == b.stored_path
                && a.size == b.size
                && a.mtime == b.mtime
        });
        if records.len() != before_dedup {
            log::debug!("writer: collapsed {} duplicate entries", before_dedup - records.len());
        }
        log::trace!("writer: emitting {} entries in sorted read-path order", records.len());

        Ok(records)
    }
}

struct Record {
    read_path: PathBuf,
    stored_path: Vec<u8>,
    size: u64,
    mtime: u32,
    source: Rc<dyn FileSource>,
}

/// Strip a path's anchor (drive/root) and re-join its remaining components
/// with `\`, matching `path.relative_to(path.anchor)` in the Python
/// reference implementation.
fn stored_path_bytes(path: &Path) -> Vec<u8> {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    parts.join("\\").into_bytes()
}

fn write_index_row<W: Write>(sink: &mut W, stored_path: &[u8], size: u64, mtime: u32) -> Result<()> {
    sink.write_all(stored_path)?;
    sink.write_all(&[0])?;
    sink.write_all(&0u32.to_le_bytes())?; // packing_method
    sink.write_all(&(size as u32).to_le_bytes())?; // original_size
    sink.write_all(&0u32.to_le_bytes())?; // reserved
    sink.write_all(&mtime.to_le_bytes())?;
    sink.write_all(&(size as u32).to_le_bytes())?; // data_size
    Ok(())
}

/// Wraps a [`Write`] sink, feeding every byte written through it into a
/// running SHA-1 hash as well as forwarding it downstream.
struct Sha1WritingSink<W> {
    inner: W,
    hasher: Sha1,
}

impl<W: Write> Sha1WritingSink<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
        }
    }

    /// Consume the sink, returning the inner writer and the 20-byte digest
    /// of everything written through it.
    fn finalize(self) -> (W, [u8; 20]) {
        let digest = self.hasher.finalize();
        (self.inner, digest.into())
    }
}

impl<W: Write> Write for Sha1WritingSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
