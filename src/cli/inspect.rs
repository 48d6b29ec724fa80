//! Inspect command implementation.

use crate::cli::parsers::format_size;
use clap::Args;
use sitepack::error::Error;
use sitepack_pack::archive::{list_entries, read_product_info};
use sitepack_pack::detect::{read_footer, read_footer_location};
use sitepack_pack::PackError;
use std::path::PathBuf;

/// Show the payload embedded in an installer.
#[derive(Args, Debug)]
pub struct InspectCmd {
    /// Installer executable.
    pub file: PathBuf,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl InspectCmd {
    /// Execute the inspect command.
    pub fn run(&self) -> sitepack::Result<()> {
        if !self.file.is_file() {
            return Err(Error::validation(format!(
                "not a file: {}",
                self.file.display()
            )));
        }

        let location = match read_footer_location(&self.file) {
            Ok(location) => location,
            Err(PackError::FooterNotFound) => {
                if self.json {
                    println!("{}", serde_json::json!({ "payload": null }));
                } else {
                    println!("{}: no payload", self.file.display());
                }
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let archive = read_footer(&self.file)?;
        let product = read_product_info(&archive);
        let entries = list_entries(&archive)?;

        if self.json {
            let entries: Vec<_> = entries
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "name": e.name,
                        "size": e.size,
                        "compressed_size": e.compressed_size,
                        "is_dir": e.is_dir,
                    })
                })
                .collect();
            let out = serde_json::json!({
                "payload": {
                    "file_size": location.file_len,
                    "template_size": location.template_len(),
                    "archive_offset": location.archive_offset,
                    "archive_size": location.archive_len,
                    "product": product,
                    "entries": entries,
                }
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&out).map_err(|e| Error::Io(e.into()))?
            );
            return Ok(());
        }

        println!("{}", self.file.display());
        println!("  File size:      {}", format_size(location.file_len));
        println!("  Template size:  {}", format_size(location.template_len()));
        println!(
            "  Payload:        {} at offset {}",
            format_size(u64::from(location.archive_len)),
            location.archive_offset
        );
        match &product {
            Some(p) => println!(
                "  Product:        {} {} ({})",
                p.display_name, p.version, p.product_code
            ),
            None => println!("  Product:        -"),
        }

        let files = entries.iter().filter(|e| !e.is_dir).count();
        println!("  Entries:        {} files, {} directories", files, entries.len() - files);
        println!();
        println!("{:<12} {:<12} NAME", "SIZE", "COMPRESSED");
        for entry in &entries {
            if entry.is_dir {
                println!("{:<12} {:<12} {}", "-", "-", entry.name);
            } else {
                println!(
                    "{:<12} {:<12} {}",
                    entry.size, entry.compressed_size, entry.name
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitepack_pack::archive::compress_to_vec;
    use sitepack_pack::{Packer, ProductInfo};
    use std::fs;

    fn cmd(file: PathBuf, json: bool) -> InspectCmd {
        InspectCmd { file, json }
    }

    #[test]
    fn test_inspect_packaged_installer() {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("site");
        fs::create_dir_all(site.join("css")).unwrap();
        fs::write(site.join("index.html"), b"home").unwrap();
        fs::write(site.join("css").join("site.css"), b"body{}").unwrap();
        let info = ProductInfo::new("shop", "Shop", "2.1.0");
        let (archive, _) =
            compress_to_vec(&site, Some(info.to_json().as_str()), &mut |_| {}).unwrap();

        let stub = dir.path().join("stub");
        fs::write(&stub, vec![0u8; 1024]).unwrap();
        let installer = dir.path().join("installer");
        Packer::new()
            .with_min_template_size(0)
            .package_bytes(&stub, &archive, &installer)
            .unwrap();

        cmd(installer.clone(), false).run().unwrap();
        cmd(installer, true).run().unwrap();
    }

    #[test]
    fn test_inspect_file_without_payload() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        fs::write(&plain, b"just a binary").unwrap();

        cmd(plain.clone(), false).run().unwrap();
        cmd(plain, true).run().unwrap();
    }

    #[test]
    fn test_inspect_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd(dir.path().join("missing"), false).run().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_inspect_corrupt_payload() {
        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("stub");
        fs::write(&stub, vec![0u8; 256]).unwrap();
        let installer = dir.path().join("installer");
        Packer::new()
            .with_min_template_size(0)
            .package_bytes(&stub, b"not a zip archive", &installer)
            .unwrap();

        let err = cmd(installer, false).run().unwrap_err();
        assert!(matches!(err, Error::Pack(_)));
    }
}
