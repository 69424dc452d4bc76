//! Extraction policy: output path construction, config.bin conversion, and
//! the obfuscation/deobfuscation handling that resolves an obfuscated
//! entry's body through its include-redirect chain.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::archive::Entry;
use crate::reader::Archive;
use crate::{Error, Result};

/// Converts a binarized `config.bin` payload back to readable `config.cpp`
/// text.
///
/// The real implementation of this seam shells out to an external
/// binarizer, the way `dayz_dev_tools/config_cpp.py` invokes `CfgConvert.exe`
/// - this crate only defines the interface and a no-op fallback.
pub trait ConfigConverter {
    /// Convert `binarized` config.bin content into config.cpp text.
    fn convert(&self, binarized: &[u8]) -> Result<Vec<u8>>;
}

/// A [`ConfigConverter`] that always fails, causing extraction to fall
/// through to verbatim `config.bin` output. The default when no converter
/// is configured.
pub struct NoConverter;

impl ConfigConverter for NoConverter {
    fn convert(&self, _binarized: &[u8]) -> Result<Vec<u8>> {
        Err(Error::ConverterFailure("no config converter configured".into()))
    }
}

/// Per-session extraction state: the monotonic `deobfsNNNNN` counter and the
/// set of entries to silently skip because they were already consumed as a
/// deobfuscation redirect target.
///
/// Deliberately not global or thread-local state - callers own an instance
/// and thread it through one extraction run.
#[derive(Default)]
pub struct ExtractionContext {
    deobfs_counter: u32,
    ignored: HashSet<Vec<u8>>,
}

impl ExtractionContext {
    /// A fresh context with an empty ignored set and counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_deobfuscated_name(&mut self) -> String {
        let name = format!("deobfs{:05}.c", self.deobfs_counter);
        self.deobfs_counter += 1;
        name
    }
}

/// Extract every entry in `archive` under `output_dir`, sharing one
/// [`ExtractionContext`] (and therefore one ignored set) across the whole
/// run.
pub fn extract_all(
    archive: &Archive,
    output_dir: &Path,
    verbose: bool,
    deobfuscate: bool,
    converter: Option<&dyn ConfigConverter>,
) -> Result<()> {
    let mut ctx = ExtractionContext::new();
    for entry in archive.entries() {
        extract_one(archive, entry, output_dir, verbose, deobfuscate, converter, &mut ctx)?;
    }
    Ok(())
}

/// Extract a caller-chosen list of entries (by raw or normalized name),
/// each with its own fresh [`ExtractionContext`] - the ignored set is
/// scoped per entry here, rather than shared across the whole call like
/// [`extract_all`].
pub fn extract_selected<'a>(
    archive: &Archive,
    names: impl IntoIterator<Item = &'a [u8]>,
    output_dir: &Path,
    verbose: bool,
    deobfuscate: bool,
    converter: Option<&dyn ConfigConverter>,
) -> Result<()> {
    for name in names {
        let entry = archive
            .find(name)
            .ok_or_else(|| Error::EntryNotFound(String::from_utf8_lossy(name).into_owned()))?;
        let mut ctx = ExtractionContext::new();
        extract_one(archive, entry, output_dir, verbose, deobfuscate, converter, &mut ctx)?;
    }
    Ok(())
}

fn prefix_segments(archive: &Archive) -> Vec<Vec<u8>> {
    match archive.prefix() {
        Some(prefix) => prefix
            .split(|&b| b == b'\\' || b == b'/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_vec())
            .collect(),
        None => Vec::new(),
    }
}

fn extract_one(
    archive: &Archive,
    entry: &Entry,
    output_dir: &Path,
    verbose: bool,
    deobfuscate: bool,
    converter: Option<&dyn ConfigConverter>,
    ctx: &mut ExtractionContext,
) -> Result<()> {
    let normalized = entry.normalized_filename();
    let segments = entry.split_filename();

    if normalized.is_empty() || segments == prefix_segments(archive) {
        if verbose {
            log::info!("skipping empty: {normalized}");
        }
        return Ok(());
    }

    if deobfuscate {
        if ctx.ignored.contains(&entry.filename) {
            if verbose {
                log::debug!("skipping {normalized}: consumed as a deobfuscation target");
            }
            return Ok(());
        }
        if entry.has_invalid_filename() && !entry.filename.ends_with(b".c") {
            if verbose {
                log::debug!("skipping {normalized}: invalid filename");
            }
            return Ok(());
        }
    }

    let mut out_segments = segments;

    if out_segments
        .last()
        .is_some_and(|last| last.eq_ignore_ascii_case(b"config.bin"))
    {
        if let Some(converter) = converter {
            let mut binarized = Vec::new();
            entry.unpack(&mut binarized)?;
            if let Ok(unbinarized) = converter.convert(&binarized) {
                let mut cpp_segments = out_segments.clone();
                *cpp_segments.last_mut().expect("checked non-empty above") = b"config.cpp".to_vec();
                write_to(&output_path(output_dir, &cpp_segments), &unbinarized)?;
                return Ok(());
            }
            // Converter failed: fall through to verbatim extraction below.
        }
    }

    if deobfuscate && entry.is_obfuscated() {
        let name = ctx.next_deobfuscated_name();
        *out_segments.last_mut().expect("checked non-empty above") = name.into_bytes();
    }

    let path = output_path(output_dir, &out_segments);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(&path)?;

    if deobfuscate {
        deobfuscate_walk(archive, entry, &mut file, verbose, ctx)
    } else {
        entry.unpack(&mut file)
    }
}

fn output_path(output_dir: &Path, segments: &[Vec<u8>]) -> PathBuf {
    let mut path = output_dir.to_path_buf();
    for segment in segments {
        path.push(String::from_utf8_lossy(segment).into_owned());
    }
    path
}

fn write_to(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

fn deobfuscate_walk<W: Write>(
    archive: &Archive,
    entry: &Entry,
    sink: &mut W,
    verbose: bool,
    ctx: &mut ExtractionContext,
) -> Result<()> {
    let mut content = Vec::new();
    entry.unpack(&mut content)?;

    let Some(target) = match_include_redirect(&content) else {
        sink.write_all(&content)?;
        return Ok(());
    };

    let target = qualify_target_with_prefix(archive, &target);

    match archive.find(target.as_slice()) {
        Some(resolved) => {
            ctx.ignored.insert(resolved.filename.clone());
            deobfuscate_walk(archive, resolved, sink, verbose, ctx)
        }
        None => {
            if verbose {
                log::warn!(
                    "deobfuscation target {} not found, emitting verbatim",
                    String::from_utf8_lossy(&target)
                );
            }
            sink.write_all(&content)?;
            Ok(())
        }
    }
}

/// Entry filenames are stored prefix-joined (the reader prepends an
/// archive's `prefix` header to every raw filename at parse time), so an
/// include target must carry the same prefix before it can resolve via
/// [`Archive::find`]. Prepend it unless the target already has it.
fn qualify_target_with_prefix(archive: &Archive, target: &[u8]) -> Vec<u8> {
    let Some(prefix) = archive.prefix() else {
        return target.to_vec();
    };

    let mut needle = prefix.to_vec();
    needle.push(b'\\');
    if target.len() >= needle.len() && target[..needle.len()].eq_ignore_ascii_case(&needle) {
        target.to_vec()
    } else {
        let mut qualified = needle;
        qualified.extend_from_slice(target);
        qualified
    }
}

/// Match `content` against the include-redirect pattern:
/// an optional single-line or block comment (terminated by CRLF), a single
/// `#include "TARGET"`, an optional trailing CRLF, then end of input.
/// Returns the include target on a match.
fn match_include_redirect(content: &[u8]) -> Option<Vec<u8>> {
    let mut rest = content;

    if let Some(after) = rest.strip_prefix(b"//") {
        let nl = find_subslice(after, b"\r\n")?;
        rest = &after[nl + 2..];
    } else if let Some(after) = rest.strip_prefix(b"/*") {
        let end = find_subslice(after, b"*/")?;
        let after_comment = &after[end + 2..];
        rest = after_comment.strip_prefix(b"\r\n")?;
    }

    let rest = rest.strip_prefix(b"#include \"")?;
    let quote = rest.iter().position(|&b| b == b'"')?;
    let target = rest[..quote].to_vec();

    let trailing = &rest[quote + 1..];
    let trailing = trailing.strip_suffix(b"\r\n").unwrap_or(trailing);
    if !trailing.is_empty() {
        return None;
    }

    Some(target)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader;
    use crate::writer::{FileSource as WriterFileSource, Writer};

    struct MemFile(Vec<u8>);
    impl WriterFileSource for MemFile {
        fn size(&self) -> Result<u64> {
            Ok(self.0.len() as u64)
        }
        fn mtime(&self) -> Result<u32> {
            Ok(0)
        }
        fn read(&self) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    fn build_archive(entries: &[(&str, &[u8])]) -> Archive {
        build_archive_with_prefix(None, entries)
    }

    fn build_archive_with_prefix(prefix: Option<&str>, entries: &[(&str, &[u8])]) -> Archive {
        let mut writer = Writer::new();
        if let Some(prefix) = prefix {
            writer.add_header("prefix", prefix);
        }
        for (name, content) in entries {
            writer.add_file(*name, MemFile(content.to_vec()));
        }
        let mut buf = Vec::new();
        writer.write(&mut buf).unwrap();
        reader::open(buf).unwrap()
    }

    #[test]
    fn match_include_redirect_accepts_line_comment_prefix() {
        let content = b"// redirect\r\n#include \"target\"\r\n";
        assert_eq!(match_include_redirect(content), Some(b"target".to_vec()));
    }

    #[test]
    fn match_include_redirect_accepts_block_comment_prefix() {
        let content = b"/* redirect */\r\n#include \"target\"";
        assert_eq!(match_include_redirect(content), Some(b"target".to_vec()));
    }

    #[test]
    fn match_include_redirect_rejects_trailing_garbage() {
        let content = b"#include \"target\"\r\nextra";
        assert_eq!(match_include_redirect(content), None);
    }

    #[test]
    fn deobfuscation_chain_resolves_redirect_and_skips_target() {
        let archive = build_archive(&[
            ("obfuscated1", b"// redirect\r\n#include \"not-obfuscated1\"\r\n"),
            ("not-obfuscated1", b"CONTENT"),
        ]);

        let dir = tempfile::tempdir().unwrap();
        extract_all(&archive, dir.path(), false, true, None).unwrap();

        let produced = fs::read(dir.path().join("obfuscated1")).unwrap();
        assert_eq!(produced, b"CONTENT");
        assert!(!dir.path().join("not-obfuscated1").exists());
    }

    #[test]
    fn deobfuscation_chain_resolves_redirect_in_a_prefixed_archive() {
        // The include target is unqualified, as written by hand in source;
        // it must resolve against the prefix-joined entry name the reader
        // actually stores.
        let archive = build_archive_with_prefix(
            Some("PREFIX"),
            &[
                ("obfuscated1", b"// redirect\r\n#include \"not-obfuscated1\"\r\n"),
                ("not-obfuscated1", b"CONTENT"),
            ],
        );

        let dir = tempfile::tempdir().unwrap();
        extract_all(&archive, dir.path(), false, true, None).unwrap();

        let produced = fs::read(dir.path().join("PREFIX").join("obfuscated1")).unwrap();
        assert_eq!(produced, b"CONTENT");
        assert!(!dir.path().join("PREFIX").join("not-obfuscated1").exists());
    }

    #[test]
    fn non_deobfuscating_extraction_writes_every_entry_verbatim() {
        let archive = build_archive(&[("a", b"one"), ("b/c", b"two")]);
        let dir = tempfile::tempdir().unwrap();
        extract_all(&archive, dir.path(), false, false, None).unwrap();

        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"one");
        assert_eq!(fs::read(dir.path().join("b").join("c")).unwrap(), b"two");
    }

    #[test]
    fn config_bin_falls_through_without_a_converter() {
        let archive = build_archive(&[("config.bin", b"\x00binary")]);
        let dir = tempfile::tempdir().unwrap();
        extract_all(&archive, dir.path(), false, false, None).unwrap();

        assert_eq!(fs::read(dir.path().join("config.bin")).unwrap(), b"\x00binary");
        assert!(!dir.path().join("config.cpp").exists());
    }

    struct UppercaseConverter;
    impl ConfigConverter for UppercaseConverter {
        fn convert(&self, binarized: &[u8]) -> Result<Vec<u8>> {
            Ok(binarized.to_ascii_uppercase())
        }
    }

    #[test]
    fn config_bin_is_converted_to_config_cpp_when_a_converter_succeeds() {
        let archive = build_archive(&[("config.bin", b"hello")]);
        let dir = tempfile::tempdir().unwrap();
        extract_all(&archive, dir.path(), false, false, Some(&UppercaseConverter)).unwrap();

        assert_eq!(fs::read(dir.path().join("config.cpp")).unwrap(), b"HELLO");
        assert!(!dir.path().join("config.bin").exists());
    }
}
