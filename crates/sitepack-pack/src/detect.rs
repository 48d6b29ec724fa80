//! Embedded payload detection.
//!
//! Finds the executable image backing the current process and reads the
//! payload footer from its tail. Each read opens the file, validates the
//! footer in order (trailing marker, length, leading marker) and closes it
//! again, so nothing is cached and no handle stays open on the running
//! image while the payload is being unpacked.
//!
//! Any failure while reading the footer means "no payload": a truncated or
//! corrupted tail looks the same as a template that never had one.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::format::{FooterLocation, FOOTER_OVERHEAD, LENGTH_SIZE, MAGIC, MARKER_SIZE};
use crate::{PackError, Result};

/// Environment variable that overrides self image resolution.
pub const SELF_IMAGE_ENV: &str = "SITEPACK_SELF_IMAGE";

/// Attempts at querying the OS for the process image path.
const RESOLVE_ATTEMPTS: u32 = 3;

/// Where a located payload came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    /// Footer appended to the executable image.
    Appended {
        /// Path of the image the payload was read from.
        image: PathBuf,
    },
    /// Archive compiled into the executable.
    Embedded,
}

impl std::fmt::Display for PayloadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadSource::Appended { image } => write!(f, "appended to {}", image.display()),
            PayloadSource::Embedded => write!(f, "embedded resource"),
        }
    }
}

/// A payload archive read into memory.
#[derive(Debug, Clone)]
pub struct LocatedPayload {
    /// Where the archive was found.
    pub source: PayloadSource,
    /// The archive bytes.
    pub archive: Vec<u8>,
}

/// Resolve the on-disk image of the running process.
///
/// Checks in order:
/// 1. `SITEPACK_SELF_IMAGE` when set and non-empty
/// 2. the OS process image path (`current_exe`), retried a few times
/// 3. `argv[0]`, canonicalized when it exists
///
/// The OS query is preferred because single-file wrappers may run the
/// program from a temporary unpack location while argv keeps pointing at
/// the original distributable (or the other way around).
pub fn resolve_self_image_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(SELF_IMAGE_ENV).filter(|v| !v.is_empty()) {
        tracing::debug!(path = ?path, "self image from environment override");
        return Ok(PathBuf::from(path));
    }

    let mut last_err = None;
    for attempt in 1..=RESOLVE_ATTEMPTS {
        match std::env::current_exe() {
            Ok(path) if !path.as_os_str().is_empty() => return Ok(path),
            Ok(_) => {
                tracing::debug!(attempt, "process image path is empty");
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "process image path query failed");
                last_err = Some(e);
            }
        }
        if attempt < RESOLVE_ATTEMPTS {
            std::thread::sleep(Duration::from_millis(10 * u64::from(attempt)));
        }
    }

    if let Some(arg0) = std::env::args_os().next().filter(|a| !a.is_empty()) {
        let path = PathBuf::from(arg0);
        tracing::debug!(path = %path.display(), "falling back to argv[0]");
        return Ok(path.canonicalize().unwrap_or(path));
    }

    Err(PackError::io(
        "resolve",
        "<self>",
        last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no executable path")),
    ))
}

/// Cheap presence check: does the file end with the marker?
pub fn has_payload(path: &Path) -> bool {
    let check = || -> io::Result<bool> {
        let mut file = File::open(path)?;
        if file.metadata()?.len() < MARKER_SIZE as u64 {
            return Ok(false);
        }
        file.seek(SeekFrom::End(-(MARKER_SIZE as i64)))?;
        let mut marker = [0u8; MARKER_SIZE];
        file.read_exact(&mut marker)?;
        Ok(&marker == MAGIC)
    };
    check().unwrap_or(false)
}

/// Validate the footer of `path` and return where the archive sits.
pub fn read_footer_location(path: &Path) -> Result<FooterLocation> {
    let mut file = open_image(path)?;
    locate(&mut file).map_err(|e| not_found(path, e))
}

/// Validate the footer of `path` and read the archive into memory.
///
/// Returns [`PackError::FooterNotFound`] for every kind of failure.
pub fn read_footer(path: &Path) -> Result<Vec<u8>> {
    let mut file = open_image(path)?;
    let read = |file: &mut File| -> io::Result<Vec<u8>> {
        let location = locate(file)?;
        file.seek(SeekFrom::Start(location.archive_offset))?;
        let mut archive = vec![0u8; location.archive_len as usize];
        file.read_exact(&mut archive)?;
        Ok(archive)
    };
    read(&mut file).map_err(|e| not_found(path, e))
}

fn open_image(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| not_found(path, e))
}

fn not_found(path: &Path, e: io::Error) -> PackError {
    tracing::debug!(path = %path.display(), reason = %e, "no payload footer");
    PackError::FooterNotFound
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Run the ordered footer checks against an open image.
fn locate(file: &mut File) -> io::Result<FooterLocation> {
    let file_len = file.metadata()?.len();
    if file_len < FOOTER_OVERHEAD as u64 {
        return Err(invalid("file too small to contain a footer"));
    }

    // 1. Trailing marker
    let mut marker = [0u8; MARKER_SIZE];
    file.seek(SeekFrom::End(-(MARKER_SIZE as i64)))?;
    file.read_exact(&mut marker)?;
    if &marker != MAGIC {
        return Err(invalid("trailing marker mismatch"));
    }

    // 2. Archive length
    let mut len_bytes = [0u8; LENGTH_SIZE];
    file.seek(SeekFrom::End(-((MARKER_SIZE + LENGTH_SIZE) as i64)))?;
    file.read_exact(&mut len_bytes)?;
    let archive_len = u32::from_le_bytes(len_bytes);
    let location = FooterLocation::new(file_len, archive_len)
        .ok_or_else(|| invalid("archive length out of range"))?;

    // 3. Leading marker
    file.seek(SeekFrom::Start(location.leading_marker_offset()))?;
    file.read_exact(&mut marker)?;
    if &marker != MAGIC {
        return Err(invalid("leading marker mismatch"));
    }

    Ok(location)
}

/// Find a payload: appended footer first, then the compiled-in fallback.
///
/// Returns `None` when neither source has one; callers treat that as a
/// template installer with no application inside.
pub fn locate_payload(self_image: &Path, fallback: Option<&[u8]>) -> Option<LocatedPayload> {
    if has_payload(self_image) {
        match read_footer(self_image) {
            Ok(archive) => {
                return Some(LocatedPayload {
                    source: PayloadSource::Appended {
                        image: self_image.to_path_buf(),
                    },
                    archive,
                });
            }
            Err(_) => {
                tracing::warn!(path = %self_image.display(), "trailing marker present but footer is invalid");
            }
        }
    }

    match fallback {
        Some(bytes) if !bytes.is_empty() => Some(LocatedPayload {
            source: PayloadSource::Embedded,
            archive: bytes.to_vec(),
        }),
        _ => None,
    }
}

/// Copy only the template part of a packaged image to `dest`.
///
/// Produces a payload-free copy of the installer, suitable for running the
/// uninstall flow later. Images without a footer are copied whole.
pub fn copy_template_region(image: &Path, dest: &Path) -> Result<u64> {
    let len = match read_footer_location(image) {
        Ok(location) => location.template_len(),
        Err(_) => std::fs::metadata(image)
            .map_err(|e| PackError::io("stat", image, e))?
            .len(),
    };

    let src = File::open(image).map_err(|e| PackError::io("open", image, e))?;
    let mut dst = File::create(dest).map_err(|e| PackError::io("create", dest, e))?;
    let copied = io::copy(&mut src.take(len), &mut dst).map_err(|e| PackError::io("copy", dest, e))?;
    dst.flush().map_err(|e| PackError::io("copy", dest, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| PackError::io("chmod", dest, e))?;
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ProductInfo;
    use crate::packer::Packer;
    use std::fs;

    /// Deterministic xorshift so the corruption test is reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }
    }

    fn packaged(dir: &Path, archive: &[u8]) -> PathBuf {
        let stub = dir.join("stub");
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 256) as u8).collect();
        fs::write(&stub, data).unwrap();
        let output = dir.join("installer");
        Packer::new()
            .with_min_template_size(0)
            .package_bytes(&stub, archive, &output)
            .unwrap();
        output
    }

    fn real_archive(dir: &Path) -> Vec<u8> {
        let src = dir.join("src");
        fs::create_dir_all(src.join("bin")).unwrap();
        fs::write(src.join("index.html"), b"<h1>hello</h1>").unwrap();
        let dll: Vec<u8> = (0..2048u32).map(|i| (i.wrapping_mul(2654435761) >> 24) as u8).collect();
        fs::write(src.join("bin/app.dll"), dll).unwrap();
        let product = ProductInfo::new("shop", "Shop", "1.0.0").to_json();
        crate::archive::compress_to_vec(&src, Some(&product), &mut |_| {})
            .unwrap()
            .0
    }

    fn set_length(path: &Path, len: u32) {
        let mut bytes = fs::read(path).unwrap();
        let at = bytes.len() - 12;
        bytes[at..at + 4].copy_from_slice(&len.to_le_bytes());
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_resolve_self_image_path_finds_test_binary() {
        let path = resolve_self_image_path().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_packaged_file_has_payload() {
        let dir = tempfile::tempdir().unwrap();
        let output = packaged(dir.path(), b"archive bytes");
        assert!(has_payload(&output));
        assert_eq!(read_footer(&output).unwrap(), b"archive bytes");
    }

    #[test]
    fn test_plain_template_has_no_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        fs::write(&path, vec![0x5Au8; 1024]).unwrap();
        assert!(!has_payload(&path));
        assert!(read_footer(&path).unwrap_err().is_not_found());
    }

    #[test]
    fn test_short_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("short");
        fs::write(&short, b"APPDATA").unwrap();
        assert!(!has_payload(&short));
        assert!(read_footer(&short).is_err());

        let missing = dir.path().join("missing");
        assert!(!has_payload(&missing));
        assert!(read_footer(&missing).unwrap_err().is_not_found());
    }

    #[test]
    fn test_truncated_by_one_byte() {
        let dir = tempfile::tempdir().unwrap();
        let output = packaged(dir.path(), b"archive bytes");
        let mut bytes = fs::read(&output).unwrap();
        bytes.pop();
        fs::write(&output, bytes).unwrap();

        assert!(!has_payload(&output));
        assert!(read_footer(&output).unwrap_err().is_not_found());
    }

    #[test]
    fn test_marker_only_file_is_not_a_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marker");
        let mut bytes = vec![0u8; 64];
        bytes.extend_from_slice(MAGIC);
        fs::write(&path, bytes).unwrap();

        assert!(has_payload(&path));
        assert!(read_footer(&path).unwrap_err().is_not_found());
    }

    #[test]
    fn test_oversized_length_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let output = packaged(dir.path(), b"archive bytes");
        let file_len = fs::metadata(&output).unwrap().len() as u32;

        for len in [file_len - 19, file_len, u32::MAX, 0] {
            set_length(&output, len);
            assert!(
                read_footer(&output).unwrap_err().is_not_found(),
                "length {len} should be rejected"
            );
        }
    }

    #[test]
    fn test_in_range_corruptions_fail_leading_marker() {
        let dir = tempfile::tempdir().unwrap();
        let archive = real_archive(dir.path());
        let output = packaged(dir.path(), &archive);
        let original = fs::read(&output).unwrap();
        let file_len = original.len() as u64;
        let real_len = archive.len() as u32;
        let max_len = (file_len - 20) as u32;

        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
        let mut caught = 0;
        let mut trials = 0;
        while trials < 1000 {
            let len = (rng.next() % u64::from(max_len)) as u32 + 1;
            if len == real_len {
                continue;
            }
            trials += 1;
            let mut bytes = original.clone();
            let at = bytes.len() - 12;
            bytes[at..at + 4].copy_from_slice(&len.to_le_bytes());
            fs::write(&output, &bytes).unwrap();
            if read_footer(&output).is_err() {
                caught += 1;
            }
        }
        assert!(caught >= 999, "only {caught} of 1000 corruptions caught");
    }

    #[test]
    fn test_footer_location_matches_layout() {
        let dir = tempfile::tempdir().unwrap();
        let output = packaged(dir.path(), b"0123456789");
        let location = read_footer_location(&output).unwrap();
        assert_eq!(location.template_len(), 4096);
        assert_eq!(location.archive_offset, 4096 + 8);
        assert_eq!(location.archive_len, 10);
        assert_eq!(location.file_len, 4096 + 8 + 10 + 4 + 8);
    }

    #[test]
    fn test_locate_payload_prefers_appended() {
        let dir = tempfile::tempdir().unwrap();
        let output = packaged(dir.path(), b"appended");

        let found = locate_payload(&output, Some(&b"embedded"[..])).unwrap();
        assert_eq!(found.archive, b"appended");
        assert_eq!(found.source, PayloadSource::Appended { image: output });
    }

    #[test]
    fn test_locate_payload_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        fs::write(&plain, vec![1u8; 100]).unwrap();

        let found = locate_payload(&plain, Some(&b"embedded"[..])).unwrap();
        assert_eq!(found.source, PayloadSource::Embedded);
        assert_eq!(found.archive, b"embedded");

        assert!(locate_payload(&plain, None).is_none());
        assert!(locate_payload(&plain, Some(&b""[..])).is_none());
    }

    #[test]
    fn test_copy_template_region_strips_payload() {
        let dir = tempfile::tempdir().unwrap();
        let output = packaged(dir.path(), b"payload");
        let copy = dir.path().join("uninstall");

        let copied = copy_template_region(&output, &copy).unwrap();
        assert_eq!(copied, 4096);
        assert_eq!(fs::read(&copy).unwrap(), fs::read(dir.path().join("stub")).unwrap());
        assert!(!has_payload(&copy));
    }
}
