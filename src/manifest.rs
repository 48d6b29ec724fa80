//! Install manifests.
//!
//! Each installation leaves a small JSON document describing where it went,
//! keyed by product code. Upgrades and uninstalls find the previous
//! installation through it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Manifest directory inside the data directory.
pub const MANIFESTS_DIR: &str = "manifests";

/// Record of one installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallManifest {
    pub product_code: String,
    pub display_name: String,
    pub version: String,
    pub install_path: PathBuf,
    pub site_name: String,
    pub pool_name: String,
    pub port: u16,
    #[serde(default)]
    pub host_name: String,
    /// Payload-free installer copy that performs the uninstall.
    #[serde(default)]
    pub uninstaller: Option<PathBuf>,
    /// RFC 3339 timestamp.
    pub installed_at: String,
}

/// Check that a product code is usable as a file name.
pub fn validate_product_code(code: &str) -> Result<()> {
    if code.is_empty() {
        return Err(Error::validation("product code is empty"));
    }
    if code == "." || code == ".." {
        return Err(Error::validation(format!("invalid product code '{}'", code)));
    }
    if let Some(c) = code
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '{' | '}')))
    {
        return Err(Error::validation(format!(
            "invalid character '{}' in product code '{}'",
            c, code
        )));
    }
    Ok(())
}

/// Derive a product code from a free-form name such as a download file stem.
///
/// Characters a product code cannot hold become `-`, runs of them collapse,
/// and leading or trailing `-` and `.` are dropped. Returns `None` when
/// nothing usable is left.
pub fn product_code_from_name(name: &str) -> Option<String> {
    let mut code = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '{' | '}') {
            c
        } else {
            '-'
        };
        if c == '-' && code.ends_with('-') {
            continue;
        }
        code.push(c);
    }
    let code = code.trim_matches(|c| c == '-' || c == '.');
    validate_product_code(code).ok()?;
    Some(code.to_string())
}

/// Directory of manifest documents.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    /// Use manifests stored directly in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Use `manifests/` inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(MANIFESTS_DIR))
    }

    /// Manifest directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, product_code: &str) -> Result<PathBuf> {
        validate_product_code(product_code)?;
        Ok(self.dir.join(format!("{}.json", product_code)))
    }

    /// Load the manifest for a product, `None` if there is none.
    pub fn load(&self, product_code: &str) -> Result<Option<InstallManifest>> {
        let path = self.path_for(product_code)?;
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Manifest(format!("{}: {}", path.display(), e))),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| Error::Manifest(format!("{}: {}", path.display(), e)))
    }

    /// Write a manifest, replacing any previous one.
    pub fn save(&self, manifest: &InstallManifest) -> Result<PathBuf> {
        let path = self.path_for(&manifest.product_code)?;
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Manifest(format!("{}: {}", self.dir.display(), e)))?;

        let json = serde_json::to_vec_pretty(manifest).map_err(|e| Error::Manifest(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| Error::Manifest(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(path = %path.display(), "saved install manifest");
        Ok(path)
    }

    /// Delete a manifest. Returns whether one existed.
    pub fn remove(&self, product_code: &str) -> Result<bool> {
        let path = self.path_for(product_code)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Manifest(format!("{}: {}", path.display(), e))),
        }
    }

    /// All readable manifests, ordered by product code.
    pub fn list(&self) -> Result<Vec<InstallManifest>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Manifest(format!("{}: {}", self.dir.display(), e))),
        };

        let mut manifests = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|data| {
                    serde_json::from_slice::<InstallManifest>(&data).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable manifest"),
            }
        }
        manifests.sort_by(|a, b| a.product_code.cmp(&b.product_code));
        Ok(manifests)
    }
}

/// Current time as an RFC 3339 timestamp.
pub fn timestamp() -> String {
    humantime::format_rfc3339_seconds(std::time::SystemTime::now()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(code: &str) -> InstallManifest {
        InstallManifest {
            product_code: code.to_string(),
            display_name: "Shop".to_string(),
            version: "1.2.0".to_string(),
            install_path: PathBuf::from("/srv/sitepack/shop"),
            site_name: "shop".to_string(),
            pool_name: "sitepack".to_string(),
            port: 8080,
            host_name: String::new(),
            uninstaller: Some(PathBuf::from("/srv/sitepack/shop/uninstall")),
            installed_at: timestamp(),
        }
    }

    #[test]
    fn test_product_code_validation() {
        assert!(validate_product_code("shop-web_1.0").is_ok());
        assert!(validate_product_code("{6F9619FF-8B86-D011-B42D-00C04FC964FF}").is_ok());
        assert!(validate_product_code("").is_err());
        assert!(validate_product_code("..").is_err());
        assert!(validate_product_code("../etc").is_err());
        assert!(validate_product_code("a/b").is_err());
        assert!(validate_product_code("a b").is_err());
    }

    #[test]
    fn test_product_code_from_name() {
        assert_eq!(
            product_code_from_name("Shop Setup (1)").as_deref(),
            Some("Shop-Setup-1")
        );
        assert_eq!(product_code_from_name("blog-setup").as_deref(), Some("blog-setup"));
        assert_eq!(product_code_from_name("café menu").as_deref(), Some("caf-menu"));
        assert_eq!(product_code_from_name("..hidden..").as_deref(), Some("hidden"));
        assert_eq!(product_code_from_name("(( ))"), None);
        assert_eq!(product_code_from_name(""), None);

        let code = product_code_from_name("My Site: v2 [final]").unwrap();
        assert!(validate_product_code(&code).is_ok());
    }

    #[test]
    fn test_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::in_dir(dir.path());

        assert!(store.load("shop").unwrap().is_none());

        let m = manifest("shop");
        let path = store.save(&m).unwrap();
        assert_eq!(path, dir.path().join("manifests").join("shop.json"));
        assert_eq!(store.load("shop").unwrap(), Some(m));

        assert!(store.remove("shop").unwrap());
        assert!(!store.remove("shop").unwrap());
        assert!(store.load("shop").unwrap().is_none());
    }

    #[test]
    fn test_list_sorted_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::in_dir(dir.path());
        assert!(store.list().unwrap().is_empty());

        store.save(&manifest("shop")).unwrap();
        store.save(&manifest("blog")).unwrap();
        std::fs::write(store.dir().join("broken.json"), b"{").unwrap();
        std::fs::write(store.dir().join("notes.txt"), b"hi").unwrap();

        let codes: Vec<_> = store.list().unwrap().into_iter().map(|m| m.product_code).collect();
        assert_eq!(codes, vec!["blog", "shop"]);
    }

    #[test]
    fn test_corrupt_manifest_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::in_dir(dir.path());
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("shop.json"), b"not json").unwrap();
        assert!(matches!(store.load("shop"), Err(Error::Manifest(_))));
    }

    #[test]
    fn test_invalid_code_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::in_dir(dir.path());
        assert!(matches!(store.load("../x"), Err(Error::Validation(_))));
    }
}
