//! Installer packer.
//!
//! Copies a template executable and appends the compressed site payload
//! plus footer to the copy. The template itself is never modified and the
//! copy is only ever appended to.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::archive::{self, ArchiveSummary, Progress};
use crate::format::{encode_trailer, ProductInfo, DEFAULT_MIN_TEMPLATE_SIZE, FOOTER_OVERHEAD, MAGIC};
use crate::{PackError, Result};

/// Name of the intermediate archive inside the working directory.
const ARCHIVE_FILE_NAME: &str = "payload.zip";

/// Builder for self-contained installer executables.
#[derive(Debug, Clone)]
pub struct Packer {
    min_template_size: u64,
    product: Option<ProductInfo>,
}

impl Default for Packer {
    fn default() -> Self {
        Self::new()
    }
}

impl Packer {
    /// Create a packer with default settings.
    pub fn new() -> Self {
        Self {
            min_template_size: DEFAULT_MIN_TEMPLATE_SIZE,
            product: None,
        }
    }

    /// Set the size below which a template triggers a warning.
    pub fn with_min_template_size(mut self, size: u64) -> Self {
        self.min_template_size = size;
        self
    }

    /// Attach product info to the payload archive.
    pub fn with_product(mut self, product: ProductInfo) -> Self {
        self.product = Some(product);
        self
    }

    /// Compress `source` into an archive file at `dest`.
    pub fn compress(
        &self,
        source: &Path,
        dest: &Path,
        progress: &mut dyn FnMut(Progress<'_>),
    ) -> Result<ArchiveSummary> {
        let comment = self.product.as_ref().map(ProductInfo::to_json);
        let file = File::create(dest).map_err(|e| PackError::io("create", dest, e))?;
        archive::compress_dir(source, file, comment.as_deref(), progress)
    }

    /// Copy `template` to `output` and append the archive at `archive_path`.
    pub fn package(&self, template: &Path, archive_path: &Path, output: &Path) -> Result<PackedInfo> {
        let archive_size = fs::metadata(archive_path)
            .map_err(|e| PackError::io("stat", archive_path, e))?
            .len();
        let archive_crc32 = crc32_file(archive_path)?;
        let mut reader = File::open(archive_path).map_err(|e| PackError::io("open", archive_path, e))?;
        self.package_from(template, &mut reader, archive_size, archive_crc32, output)
    }

    /// Copy `template` to `output` and append an in-memory archive.
    pub fn package_bytes(&self, template: &Path, archive: &[u8], output: &Path) -> Result<PackedInfo> {
        let archive_crc32 = crc32fast::hash(archive);
        let mut reader = archive;
        self.package_from(template, &mut reader, archive.len() as u64, archive_crc32, output)
    }

    fn package_from(
        &self,
        template: &Path,
        archive: &mut dyn Read,
        archive_size: u64,
        archive_crc32: u32,
        output: &Path,
    ) -> Result<PackedInfo> {
        let archive_len =
            u32::try_from(archive_size).map_err(|_| PackError::PayloadTooLarge(archive_size))?;
        if archive_len == 0 {
            return Err(PackError::Archive("payload archive is empty".to_string()));
        }

        let template_size = match fs::metadata(template) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(PackError::TemplateNotFound(template.to_path_buf())),
        };

        let mut warnings = Vec::new();
        if template_size < self.min_template_size {
            tracing::warn!(
                template = %template.display(),
                size = template_size,
                minimum = self.min_template_size,
                "template executable is smaller than expected for a self-contained runtime"
            );
            warnings.push(format!(
                "template {} is only {} bytes (expected at least {})",
                template.display(),
                template_size,
                self.min_template_size
            ));
        }

        // 1. Copy template to output
        copy_template(template, output)?;

        // 2. Append marker, archive, length, marker
        let file = OpenOptions::new()
            .append(true)
            .open(output)
            .map_err(|e| PackError::OutputPathUnwritable {
                path: output.to_path_buf(),
                source: e,
            })?;
        let mut writer = BufWriter::new(file);
        let append_err = |e| PackError::io("append", output, e);

        writer.write_all(MAGIC).map_err(append_err)?;
        let copied = io::copy(archive, &mut writer).map_err(append_err)?;
        if copied != archive_size {
            return Err(PackError::io(
                "append",
                output,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("archive shrank while packaging: expected {archive_size} bytes, got {copied}"),
                ),
            ));
        }
        writer.write_all(&encode_trailer(archive_len)).map_err(append_err)?;
        writer
            .into_inner()
            .map_err(|e| PackError::io("append", output, e.into_error()))?
            .sync_all()
            .map_err(append_err)?;

        // Make executable
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(output)
                .map_err(|e| PackError::io("stat", output, e))?
                .permissions();
            perms.set_mode(0o755);
            fs::set_permissions(output, perms).map_err(|e| PackError::io("chmod", output, e))?;
        }

        let total_size = template_size + archive_size + FOOTER_OVERHEAD as u64;
        tracing::info!(
            output = %output.display(),
            template_size,
            archive_size,
            total_size,
            "installer packaged"
        );

        Ok(PackedInfo {
            output: output.to_path_buf(),
            template_size,
            archive_size,
            total_size,
            files: 0,
            archive_crc32,
            warnings,
        })
    }

    /// Compress `source` and package it onto `template` as `output`.
    ///
    /// The intermediate archive lives in a temporary directory that is
    /// removed whether or not packaging succeeds.
    pub fn create_installer(
        &self,
        source: &Path,
        template: &Path,
        output: &Path,
        progress: &mut dyn FnMut(Progress<'_>),
    ) -> Result<PackedInfo> {
        let work_dir = tempfile::Builder::new()
            .prefix("sitepack-")
            .tempdir()
            .map_err(|e| PackError::io("create temp directory", std::env::temp_dir(), e))?;
        let archive_path = work_dir.path().join(ARCHIVE_FILE_NAME);

        let summary = self.compress(source, &archive_path, progress)?;
        let mut info = self.package(template, &archive_path, output)?;
        info.files = summary.files;

        let work_path = work_dir.path().to_path_buf();
        if let Err(e) = work_dir.close() {
            tracing::warn!(path = %work_path.display(), error = %e, "failed to remove working directory");
            info.warnings
                .push(format!("could not remove {}: {}", work_path.display(), e));
        }

        Ok(info)
    }
}

/// Copy the template over any existing output file.
fn copy_template(template: &Path, output: &Path) -> Result<()> {
    let mut src = File::open(template).map_err(|_| PackError::TemplateNotFound(template.to_path_buf()))?;
    if is_same_file(template, output) {
        return Err(PackError::OutputIsTemplate(output.to_path_buf()));
    }
    let mut dst = File::create(output).map_err(|e| PackError::OutputPathUnwritable {
        path: output.to_path_buf(),
        source: e,
    })?;
    io::copy(&mut src, &mut dst).map_err(|e| PackError::io("copy", output, e))?;
    dst.sync_all().map_err(|e| PackError::io("copy", output, e))?;
    Ok(())
}

/// Whether two paths name the same file, through any link.
#[cfg(unix)]
fn is_same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// CRC32 of a whole file.
fn crc32_file(path: &Path) -> Result<u32> {
    let mut file = File::open(path).map_err(|e| PackError::io("open", path, e))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| PackError::io("read", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Information about a packaged installer.
#[derive(Debug, Clone)]
pub struct PackedInfo {
    /// Path of the installer written.
    pub output: PathBuf,
    /// Size of the template executable.
    pub template_size: u64,
    /// Size of the payload archive.
    pub archive_size: u64,
    /// Final size of the installer.
    pub total_size: u64,
    /// Number of files in the payload (0 when packaging a prebuilt archive).
    pub files: usize,
    /// CRC32 of the payload archive.
    pub archive_crc32: u32,
    /// Non-fatal problems noticed while packaging.
    pub warnings: Vec<String>,
}
