//! Extract command implementation.

use clap::Args;
use sitepack::error::Error;
use sitepack_pack::archive::extract_archive;
use sitepack_pack::detect::read_footer;
use sitepack_pack::PackError;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

/// Extract the payload of an installer into a directory.
#[derive(Args, Debug)]
pub struct ExtractCmd {
    /// Installer executable.
    pub file: PathBuf,

    /// Destination directory.
    pub dir: PathBuf,
}

impl ExtractCmd {
    /// Execute the extract command.
    pub fn run(&self) -> sitepack::Result<()> {
        let archive = match read_footer(&self.file) {
            Ok(archive) => archive,
            Err(PackError::FooterNotFound) => {
                return Err(Error::validation(format!(
                    "{} has no payload",
                    self.file.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let cancel = AtomicBool::new(false);
        let files = extract_archive(
            &archive,
            &self.dir,
            &mut |p| tracing::debug!(path = p.path, done = p.done, total = p.total, "extracted"),
            &cancel,
        )?;

        println!("Extracted {} files to {}", files, self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitepack_pack::archive::compress_to_vec;
    use sitepack_pack::Packer;
    use std::fs;
    use std::path::Path;

    /// Package `files` onto a dummy template and return the installer path.
    fn installer(dir: &Path, files: &[(&str, &[u8])]) -> PathBuf {
        let site = dir.join("site");
        for (rel, data) in files {
            let path = site.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, data).unwrap();
        }
        let (archive, _) = compress_to_vec(&site, None, &mut |_| {}).unwrap();

        let stub = dir.join("stub");
        fs::write(&stub, vec![0x7fu8; 2048]).unwrap();
        let output = dir.join("installer");
        Packer::new()
            .with_min_template_size(0)
            .package_bytes(&stub, &archive, &output)
            .unwrap();
        output
    }

    #[test]
    fn test_extract_packaged_installer() {
        let dir = tempfile::tempdir().unwrap();
        let file = installer(
            dir.path(),
            &[("index.html", b"home"), ("bin/app.dll", b"dll")],
        );
        let out = dir.path().join("out");

        ExtractCmd {
            file,
            dir: out.clone(),
        }
        .run()
        .unwrap();

        assert_eq!(fs::read(out.join("index.html")).unwrap(), b"home");
        assert_eq!(fs::read(out.join("bin").join("app.dll")).unwrap(), b"dll");
    }

    #[test]
    fn test_extract_without_payload() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        fs::write(&plain, vec![0u8; 512]).unwrap();

        let err = ExtractCmd {
            file: plain,
            dir: dir.path().join("out"),
        }
        .run()
        .unwrap_err();
        assert!(matches!(err, Error::Validation(ref msg) if msg.contains("no payload")));
        assert_eq!(err.exit_code(), 1);
        assert!(!dir.path().join("out").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_refuses_symlinked_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = installer(
            dir.path(),
            &[("index.html", b"home"), ("bin/app.dll", b"dll")],
        );
        let elsewhere = dir.path().join("elsewhere");
        fs::create_dir_all(&elsewhere).unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        std::os::unix::fs::symlink(&elsewhere, out.join("bin")).unwrap();

        let err = ExtractCmd {
            file,
            dir: out.clone(),
        }
        .run()
        .unwrap_err();
        assert!(matches!(err, Error::Pack(PackError::UnsafeEntryPath(_))));
        assert_eq!(err.exit_code(), 2);
        assert!(!elsewhere.join("app.dll").exists());
        assert!(!out.join("index.html").exists());
    }
}
