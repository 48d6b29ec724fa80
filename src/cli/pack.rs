//! Pack command implementation.

use crate::cli::parsers::{format_size, parse_size};
use clap::Args;
use sha2::{Digest, Sha256};
use sitepack::config::SitepackConfig;
use sitepack::error::Error;
use sitepack::manifest::{product_code_from_name, validate_product_code};
use sitepack_pack::{PackError, Packer, ProductInfo};
use std::fs::File;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};

/// File name of the installer template built alongside this binary.
const STUB_NAME: &str = "sitepack-stub";

/// Build an installer from a published site directory.
#[derive(Args, Debug)]
pub struct PackCmd {
    /// Published site directory.
    pub source: PathBuf,

    /// Installer to write.
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,

    /// Template installer executable [default: config or sitepack-stub next to this binary].
    #[arg(short, long, value_name = "PATH")]
    pub template: Option<PathBuf>,

    /// Product code [default: source directory name].
    #[arg(long, value_name = "CODE")]
    pub product_code: Option<String>,

    /// Display name [default: product code].
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Application version.
    #[arg(long = "app-version", value_name = "VERSION", default_value = "1.0.0")]
    pub app_version: String,

    /// Warn when the template is smaller than this (e.g. 10M).
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub min_template_size: Option<u64>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

impl PackCmd {
    /// Execute the pack command.
    pub fn run(&self, config: &SitepackConfig) -> sitepack::Result<()> {
        let template = self.resolve_template(config)?;
        let product = self.product_info()?;
        let min_size = self.min_template_size.unwrap_or(config.min_template_size);

        tracing::info!(
            source = %self.source.display(),
            template = %template.display(),
            output = %self.output.display(),
            product_code = %product.product_code,
            "packing installer"
        );

        let packer = Packer::new()
            .with_min_template_size(min_size)
            .with_product(product.clone());

        let show_progress = !self.json && std::io::stderr().is_terminal();
        let mut progress = |p: sitepack_pack::Progress<'_>| {
            if show_progress {
                eprint!("\rCompressing {}/{} files", p.done, p.total);
            }
        };
        let info = packer.create_installer(&self.source, &template, &self.output, &mut progress);
        if show_progress {
            eprintln!();
        }
        let info = info?;

        let sha256 = sha256_file(&info.output)?;

        if self.json {
            let out = serde_json::json!({
                "output": info.output,
                "product_code": product.product_code,
                "display_name": product.display_name,
                "version": product.version,
                "template_size": info.template_size,
                "archive_size": info.archive_size,
                "total_size": info.total_size,
                "files": info.files,
                "archive_crc32": format!("{:08x}", info.archive_crc32),
                "sha256": sha256,
                "warnings": info.warnings,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&out).map_err(|e| Error::Io(e.into()))?
            );
            return Ok(());
        }

        for warning in &info.warnings {
            eprintln!("Warning: {}", warning);
        }
        println!("Created {}", info.output.display());
        println!(
            "  Product:  {} {} ({})",
            product.display_name, product.version, product.product_code
        );
        println!("  Files:    {}", info.files);
        println!("  Template: {}", format_size(info.template_size));
        println!(
            "  Payload:  {} (crc32 {:08x})",
            format_size(info.archive_size),
            info.archive_crc32
        );
        println!("  Total:    {}", format_size(info.total_size));
        println!("  SHA-256:  {}", sha256);

        Ok(())
    }

    fn resolve_template(&self, config: &SitepackConfig) -> sitepack::Result<PathBuf> {
        if let Some(path) = self.template.as_ref().or(config.default_template.as_ref()) {
            return Ok(path.clone());
        }
        let sibling = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .map(|dir| dir.join(format!("{}{}", STUB_NAME, std::env::consts::EXE_SUFFIX)));
        match sibling {
            Some(path) if path.is_file() => Ok(path),
            Some(path) => Err(PackError::TemplateNotFound(path).into()),
            None => Err(Error::validation("no template given and none configured")),
        }
    }

    fn product_info(&self) -> sitepack::Result<ProductInfo> {
        let (code, derived_name) = match &self.product_code {
            Some(code) => (code.clone(), None),
            None => {
                let dir_name = self
                    .source
                    .canonicalize()
                    .unwrap_or_else(|_| self.source.clone())
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
                let code = dir_name
                    .as_deref()
                    .and_then(product_code_from_name)
                    .ok_or_else(|| Error::validation("cannot derive a product code, pass --product-code"))?;
                (code, dir_name)
            }
        };
        validate_product_code(&code)?;
        let name = self
            .name
            .clone()
            .or(derived_name)
            .unwrap_or_else(|| code.clone());
        Ok(ProductInfo::new(code, name, self.app_version.clone()))
    }
}

/// SHA-256 of a file as lowercase hex.
fn sha256_file(path: &Path) -> sitepack::Result<String> {
    let mut file = File::open(path).map_err(|e| PackError::io("open", path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| PackError::io("read", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(source: &Path) -> PackCmd {
        PackCmd {
            source: source.to_path_buf(),
            output: source.join("out"),
            template: None,
            product_code: None,
            name: None,
            app_version: "1.0.0".to_string(),
            min_template_size: None,
            json: false,
        }
    }

    #[test]
    fn test_product_code_defaults_to_dir_name() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("shop-web");
        std::fs::create_dir(&source).unwrap();

        let info = cmd(&source).product_info().unwrap();
        assert_eq!(info.product_code, "shop-web");
        assert_eq!(info.display_name, "shop-web");
    }

    #[test]
    fn test_product_code_from_awkward_dir_name() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Shop Site (prod)");
        std::fs::create_dir(&source).unwrap();

        let info = cmd(&source).product_info().unwrap();
        assert_eq!(info.product_code, "Shop-Site-prod");
        assert_eq!(info.display_name, "Shop Site (prod)");
    }

    #[test]
    fn test_bad_product_code_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cmd(dir.path());
        c.product_code = Some("shop web".to_string());
        assert!(matches!(c.product_info(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_configured_template_wins_over_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let config = SitepackConfig {
            default_template: Some(dir.path().join("stub")),
            ..Default::default()
        };
        assert_eq!(
            cmd(dir.path()).resolve_template(&config).unwrap(),
            dir.path().join("stub")
        );

        let mut c = cmd(dir.path());
        c.template = Some(dir.path().join("explicit"));
        assert_eq!(c.resolve_template(&config).unwrap(), dir.path().join("explicit"));
    }

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
