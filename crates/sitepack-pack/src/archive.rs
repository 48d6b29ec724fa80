//! Payload archive adapter.
//!
//! Converts a directory tree to a zip archive (deflate, one entry per file,
//! explicit markers only for empty directories) and back. Extraction never
//! writes outside the target directory: every entry name is checked before
//! the first byte hits the disk.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::format::ProductInfo;
use crate::{PackError, Result};

/// Number of files opened up front to detect locked sources.
pub const LOCK_SAMPLE_SIZE: usize = 10;

/// Extraction reports progress every this many files (and on the last one).
pub const PROGRESS_INTERVAL: usize = 25;

/// Progress notification for one archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress<'a> {
    /// Entry name inside the archive.
    pub path: &'a str,
    /// Files handled so far, including this one.
    pub done: usize,
    /// Total files in the operation.
    pub total: usize,
}

/// Counts of what went into an archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Regular file entries.
    pub files: usize,
    /// Empty-directory marker entries.
    pub directories: usize,
}

/// One entry as listed from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Entry name, `/` separated.
    pub name: String,
    /// Uncompressed size.
    pub size: u64,
    /// Compressed size.
    pub compressed_size: u64,
    /// Whether this is a directory marker.
    pub is_dir: bool,
}

/// A file or empty directory found under the source root.
#[derive(Debug)]
struct SourceEntry {
    path: PathBuf,
    name: String,
    is_dir: bool,
}

/// Check that `source` exists, has files, and that a sample of them opens.
///
/// Returns the number of files that will be archived.
pub fn validate_source(source: &Path) -> Result<usize> {
    let entries = scan_source(source)?;
    Ok(entries.iter().filter(|e| !e.is_dir).count())
}

fn scan_source(source: &Path) -> Result<Vec<SourceEntry>> {
    if !source.is_dir() {
        return Err(PackError::SourceNotFound(source.to_path_buf()));
    }

    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for entry in walkdir::WalkDir::new(source)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
            let err = e
                .into_io_error()
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
            PackError::io("walk", path, err)
        })?;

        let is_dir = entry.file_type().is_dir();
        if is_dir {
            // Non-empty directories are implied by their files.
            let mut children =
                fs::read_dir(entry.path()).map_err(|e| PackError::io("list", entry.path(), e))?;
            if children.next().is_some() {
                continue;
            }
        }

        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| PackError::InvalidSourcePath(entry.path().to_path_buf()))?;
        let mut name = entry_name(rel)?;
        if is_dir {
            name.push('/');
        }
        if !seen.insert(name.clone()) {
            return Err(PackError::DuplicateEntry(name));
        }

        entries.push(SourceEntry {
            path: entry.path().to_path_buf(),
            name,
            is_dir,
        });
    }

    let files: Vec<&SourceEntry> = entries.iter().filter(|e| !e.is_dir).collect();
    if files.is_empty() {
        return Err(PackError::EmptySource(source.to_path_buf()));
    }

    for file in files.iter().take(LOCK_SAMPLE_SIZE) {
        if let Err(source) = File::open(&file.path) {
            return Err(PackError::SourceLocked {
                path: file.path.clone(),
                source,
            });
        }
    }

    Ok(entries)
}

/// Build a `/` separated entry name from a path relative to the source root.
fn entry_name(rel: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            std::path::Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| PackError::InvalidSourcePath(rel.to_path_buf()))?;
                // Would read back as a drive on extraction.
                if parts.is_empty() && is_drive_prefix(part) {
                    return Err(PackError::InvalidSourcePath(rel.to_path_buf()));
                }
                parts.push(part);
            }
            _ => return Err(PackError::InvalidSourcePath(rel.to_path_buf())),
        }
    }
    if parts.is_empty() {
        return Err(PackError::InvalidSourcePath(rel.to_path_buf()));
    }
    Ok(parts.join("/"))
}

/// Compress `source` into a zip archive written to `writer`.
///
/// `comment` becomes the archive comment (used for [`ProductInfo`]).
/// `progress` is called after every file entry.
pub fn compress_dir<W: Write + Seek>(
    source: &Path,
    writer: W,
    comment: Option<&str>,
    progress: &mut dyn FnMut(Progress<'_>),
) -> Result<ArchiveSummary> {
    let entries = scan_source(source)?;
    let total = entries.iter().filter(|e| !e.is_dir).count();

    tracing::debug!(source = %source.display(), files = total, "compressing payload");

    let mut zip = ZipWriter::new(writer);
    let mut summary = ArchiveSummary::default();

    for entry in &entries {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(9))
            .unix_permissions(source_mode(&entry.path, entry.is_dir));

        if entry.is_dir {
            zip.add_directory(entry.name.as_str(), options)?;
            summary.directories += 1;
            continue;
        }

        let mut file = File::open(&entry.path).map_err(|e| PackError::io("open", &entry.path, e))?;
        zip.start_file(entry.name.as_str(), options)?;
        io::copy(&mut file, &mut zip).map_err(|e| PackError::io("compress", &entry.path, e))?;

        summary.files += 1;
        progress(Progress {
            path: &entry.name,
            done: summary.files,
            total,
        });
    }

    if let Some(comment) = comment {
        zip.set_comment(comment);
    }
    zip.finish()?;

    Ok(summary)
}

/// Compress `source` into an in-memory archive.
pub fn compress_to_vec(
    source: &Path,
    comment: Option<&str>,
    progress: &mut dyn FnMut(Progress<'_>),
) -> Result<(Vec<u8>, ArchiveSummary)> {
    let mut buf = Cursor::new(Vec::new());
    let summary = compress_dir(source, &mut buf, comment, progress)?;
    Ok((buf.into_inner(), summary))
}

#[cfg(unix)]
fn source_mode(path: &Path, is_dir: bool) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    let fallback = if is_dir { 0o755 } else { 0o644 };
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o777)
        .unwrap_or(fallback)
}

#[cfg(not(unix))]
fn source_mode(_path: &Path, is_dir: bool) -> u32 {
    if is_dir {
        0o755
    } else {
        0o644
    }
}

/// Whether a leading path segment names a drive, as in `C:` or `c:file`.
fn is_drive_prefix(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Turn an archive entry name into a path that stays under the target.
///
/// Accepts `/` and `\` separators. Rejects absolute paths, a drive prefix
/// on the first segment, NUL bytes and any `..` segment. A `:` elsewhere
/// is an ordinary character, except on Windows where it opens an
/// alternate data stream. May return an empty path for names like `./`.
pub fn sanitize_entry_path(name: &str) -> Result<PathBuf> {
    let unsafe_path = || PackError::UnsafeEntryPath(name.to_string());

    if name.is_empty() || name.contains('\0') {
        return Err(unsafe_path());
    }
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(unsafe_path());
    }

    let mut out = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(unsafe_path()),
            p if out.as_os_str().is_empty() && is_drive_prefix(p) => return Err(unsafe_path()),
            p if cfg!(windows) && p.contains(':') => return Err(unsafe_path()),
            p => out.push(p),
        }
    }
    Ok(out)
}

/// Refuse to write through a symlink that already exists below `target`.
///
/// Only directories on the way to the entry are checked; the entry itself
/// is replaced by rename, which never follows a link.
fn check_no_symlinked_parent(target: &Path, rel: &Path, name: &str) -> Result<()> {
    let mut current = target.to_path_buf();
    let mut components = rel.components().peekable();
    while let Some(component) = components.next() {
        current.push(component);
        let meta = match fs::symlink_metadata(&current) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(PackError::io("inspect", &current, e)),
        };
        if meta.file_type().is_symlink() && components.peek().is_some() {
            tracing::warn!(path = %current.display(), "refusing to extract through symlink");
            return Err(PackError::UnsafeEntryPath(name.to_string()));
        }
    }
    Ok(())
}

/// A validated entry waiting to be written.
struct PlannedEntry {
    index: usize,
    name: String,
    rel: PathBuf,
    is_dir: bool,
}

/// Extract an in-memory archive into `target`.
///
/// All entry names are validated first; one unsafe name, or a directory
/// on the way that is an existing symlink, fails the whole extraction
/// before anything is written. Files are written through a
/// temporary file in the destination directory and renamed into place,
/// overwriting existing files. `cancel` is checked between entries.
///
/// Returns the number of files written (directory markers excluded).
pub fn extract_archive(
    bytes: &[u8],
    target: &Path,
    progress: &mut dyn FnMut(Progress<'_>),
    cancel: &AtomicBool,
) -> Result<usize> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let mut plan = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        let name = entry.name().to_string();
        let rel = sanitize_entry_path(&name)?;
        let is_dir = entry.is_dir() || name.ends_with('\\');
        if rel.as_os_str().is_empty() {
            continue;
        }
        check_no_symlinked_parent(target, &rel, &name)?;
        plan.push(PlannedEntry {
            index,
            name,
            rel,
            is_dir,
        });
    }

    let total = plan.iter().filter(|e| !e.is_dir).count();
    fs::create_dir_all(target).map_err(|e| PackError::io("create directory", target, e))?;

    tracing::debug!(target = %target.display(), files = total, "extracting payload");

    let mut done = 0;
    for planned in &plan {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!(done, total, "extraction cancelled");
            return Err(PackError::Cancelled);
        }

        let dest = target.join(&planned.rel);
        if planned.is_dir {
            fs::create_dir_all(&dest).map_err(|e| PackError::io("create directory", &dest, e))?;
            continue;
        }

        let parent = dest.parent().unwrap_or(target);
        fs::create_dir_all(parent).map_err(|e| PackError::io("create directory", parent, e))?;

        let mut entry = archive.by_index(planned.index)?;
        let mode = entry.unix_mode();
        write_entry(&mut entry, parent, &dest)?;
        apply_mode(&dest, mode);

        done += 1;
        if done % PROGRESS_INTERVAL == 0 || done == total {
            progress(Progress {
                path: &planned.name,
                done,
                total,
            });
        }
    }

    Ok(done)
}

fn write_entry(reader: &mut dyn Read, dir: &Path, dest: &Path) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| PackError::io("create", dir, e))?;
    io::copy(reader, &mut tmp).map_err(|e| PackError::io("write", dest, e))?;
    tmp.as_file_mut()
        .flush()
        .map_err(|e| PackError::io("write", dest, e))?;
    tmp.persist(dest)
        .map_err(|e| PackError::io("rename", dest, e.error))?;
    Ok(())
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) {
    use std::os::unix::fs::PermissionsExt;
    let Some(mode) = mode else { return };
    let perms = fs::Permissions::from_mode(mode & 0o777);
    if let Err(e) = fs::set_permissions(path, perms) {
        tracing::warn!(path = %path.display(), error = %e, "failed to set file permissions");
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) {}

/// List the entries of an archive without extracting it.
pub fn list_entries(bytes: &[u8]) -> Result<Vec<EntryInfo>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        entries.push(EntryInfo {
            name: entry.name().to_string(),
            size: entry.size(),
            compressed_size: entry.compressed_size(),
            is_dir: entry.is_dir(),
        });
    }
    Ok(entries)
}

/// Read the product info from the archive comment, if there is one.
pub fn read_product_info(bytes: &[u8]) -> Option<ProductInfo> {
    let archive = ZipArchive::new(Cursor::new(bytes)).ok()?;
    ProductInfo::from_json(archive.comment())
}
