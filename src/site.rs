//! Site deployment collaborator.
//!
//! The installer hands the extracted application to a [`SiteDeployment`]
//! to register it with a web server. Operations report success through
//! their return values; the install flow decides whether a failure is fatal.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Site table file name inside the data directory.
pub const SITES_FILE: &str = "sites.json";

/// Outcome of a collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Detail for the transcript.
    pub message: Option<String>,
}

impl StepResult {
    /// Successful result without detail.
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    /// Successful result with detail.
    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    /// Failed result.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    /// Message or an empty string.
    pub fn detail(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

/// Site to create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSpec {
    /// Site name.
    pub name: String,
    /// Directory served by the site.
    pub physical_path: PathBuf,
    /// Application pool.
    pub pool_name: String,
    /// Listening port.
    pub port: u16,
    /// Host header binding, empty for any host.
    #[serde(default)]
    pub host_name: String,
    /// Fail if the site already exists.
    #[serde(default)]
    pub create_new: bool,
}

impl SiteSpec {
    /// URL the site answers on.
    pub fn url(&self) -> String {
        let host = if self.host_name.is_empty() {
            "localhost"
        } else {
            &self.host_name
        };
        if self.port == 80 {
            format!("http://{}/", host)
        } else {
            format!("http://{}:{}/", host, self.port)
        }
    }
}

/// Outcome of [`SiteDeployment::deploy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    /// Whether the site was deployed.
    pub success: bool,
    /// Detail for the transcript.
    pub message: String,
    /// URL of the deployed site.
    pub url: Option<String>,
}

/// Web server site registration and lifecycle.
pub trait SiteDeployment {
    /// Create or update a site.
    fn deploy(&self, spec: &SiteSpec) -> DeployOutcome;
    /// Stop a site, waiting at most `timeout`.
    fn stop(&self, name: &str, timeout: Duration) -> StepResult;
    /// Start a site.
    fn start(&self, name: &str) -> StepResult;
    /// Remove a site definition.
    fn remove(&self, name: &str) -> StepResult;
    /// Whether a site with this name exists.
    fn exists(&self, name: &str) -> bool;
}

/// A site as stored in the site table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    /// Site definition.
    #[serde(flatten)]
    pub spec: SiteSpec,
    /// Whether the site is running.
    pub running: bool,
}

/// Apply a deploy request to a site table.
fn deploy_into(sites: &mut BTreeMap<String, SiteRecord>, spec: &SiteSpec) -> DeployOutcome {
    let failed = |message: String| DeployOutcome {
        success: false,
        message,
        url: None,
    };

    if spec.name.trim().is_empty() {
        return failed("site name is empty".to_string());
    }
    if spec.create_new && sites.contains_key(&spec.name) {
        return failed(format!("site '{}' already exists", spec.name));
    }
    if let Some(other) = sites.values().find(|s| {
        s.spec.name != spec.name
            && s.spec.port == spec.port
            && s.spec.host_name.eq_ignore_ascii_case(&spec.host_name)
    }) {
        return failed(format!(
            "binding {}:{} is already used by site '{}'",
            if spec.host_name.is_empty() { "*" } else { &spec.host_name },
            spec.port,
            other.spec.name
        ));
    }

    let updated = sites.contains_key(&spec.name);
    let mut stored = spec.clone();
    stored.create_new = false;
    sites.insert(
        spec.name.clone(),
        SiteRecord {
            spec: stored,
            running: true,
        },
    );

    DeployOutcome {
        success: true,
        message: format!(
            "{} site '{}' at {}",
            if updated { "updated" } else { "created" },
            spec.name,
            spec.physical_path.display()
        ),
        url: Some(spec.url()),
    }
}

fn set_running(sites: &mut BTreeMap<String, SiteRecord>, name: &str, running: bool) -> StepResult {
    match sites.get_mut(name) {
        Some(site) => {
            site.running = running;
            StepResult::ok()
        }
        None => StepResult::failed(format!("site '{}' not found", name)),
    }
}

/// Site table persisted as JSON.
///
/// Stands in for a web server's configuration store: a reverse proxy or
/// service manager reads `sites.json` to serve the registered directories.
#[derive(Debug, Clone)]
pub struct FileSiteHost {
    path: PathBuf,
}

impl FileSiteHost {
    /// Use the site table at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Use `sites.json` inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(SITES_FILE))
    }

    /// Read all sites.
    pub fn load(&self) -> Result<BTreeMap<String, SiteRecord>> {
        match std::fs::read(&self.path) {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| Error::deployment(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, sites: &BTreeMap<String, SiteRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(sites)
            .map_err(|e| Error::deployment(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, f: F) -> StepResult
    where
        F: FnOnce(&mut BTreeMap<String, SiteRecord>) -> StepResult,
    {
        let mut sites = match self.load() {
            Ok(sites) => sites,
            Err(e) => return StepResult::failed(e.to_string()),
        };
        let result = f(&mut sites);
        if !result.success {
            return result;
        }
        match self.store(&sites) {
            Ok(()) => result,
            Err(e) => StepResult::failed(format!("failed to save site table: {}", e)),
        }
    }
}

impl SiteDeployment for FileSiteHost {
    fn deploy(&self, spec: &SiteSpec) -> DeployOutcome {
        let mut outcome = None;
        let result = self.update(|sites| {
            let deployed = deploy_into(sites, spec);
            let step = if deployed.success {
                StepResult::ok()
            } else {
                StepResult::failed(deployed.message.clone())
            };
            outcome = Some(deployed);
            step
        });
        match outcome {
            Some(deployed) if result.success => deployed,
            _ => DeployOutcome {
                success: false,
                message: result.detail().to_string(),
                url: None,
            },
        }
    }

    fn stop(&self, name: &str, _timeout: Duration) -> StepResult {
        self.update(|sites| set_running(sites, name, false))
    }

    fn start(&self, name: &str) -> StepResult {
        self.update(|sites| set_running(sites, name, true))
    }

    fn remove(&self, name: &str) -> StepResult {
        self.update(|sites| match sites.remove(name) {
            Some(_) => StepResult::ok(),
            None => StepResult::failed(format!("site '{}' not found", name)),
        })
    }

    fn exists(&self, name: &str) -> bool {
        self.load().map(|s| s.contains_key(name)).unwrap_or(false)
    }
}

/// In-process site table, used for dry runs.
#[derive(Debug, Default)]
pub struct MemorySiteHost {
    sites: Mutex<BTreeMap<String, SiteRecord>>,
}

impl MemorySiteHost {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a site.
    pub fn get(&self, name: &str) -> Option<SiteRecord> {
        self.sites.lock().get(name).cloned()
    }
}

impl SiteDeployment for MemorySiteHost {
    fn deploy(&self, spec: &SiteSpec) -> DeployOutcome {
        deploy_into(&mut self.sites.lock(), spec)
    }

    fn stop(&self, name: &str, _timeout: Duration) -> StepResult {
        set_running(&mut self.sites.lock(), name, false)
    }

    fn start(&self, name: &str) -> StepResult {
        set_running(&mut self.sites.lock(), name, true)
    }

    fn remove(&self, name: &str) -> StepResult {
        match self.sites.lock().remove(name) {
            Some(_) => StepResult::ok(),
            None => StepResult::failed(format!("site '{}' not found", name)),
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.sites.lock().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, port: u16) -> SiteSpec {
        SiteSpec {
            name: name.to_string(),
            physical_path: PathBuf::from("/srv").join(name),
            pool_name: "pool".to_string(),
            port,
            host_name: String::new(),
            create_new: true,
        }
    }

    #[test]
    fn test_url() {
        assert_eq!(spec("a", 80).url(), "http://localhost/");
        let mut s = spec("a", 8080);
        s.host_name = "shop.example".to_string();
        assert_eq!(s.url(), "http://shop.example:8080/");
    }

    #[test]
    fn test_file_host_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let host = FileSiteHost::in_dir(dir.path());

        let outcome = host.deploy(&spec("shop", 8080));
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.url.as_deref(), Some("http://localhost:8080/"));
        assert!(host.exists("shop"));

        assert!(host.stop("shop", Duration::from_secs(1)).success);
        assert!(!host.load().unwrap()["shop"].running);
        assert!(host.start("shop").success);
        assert!(host.load().unwrap()["shop"].running);

        assert!(host.remove("shop").success);
        assert!(!host.exists("shop"));
        assert!(!host.remove("shop").success);
    }

    #[test]
    fn test_create_new_rejects_existing() {
        let dir = tempfile::tempdir().unwrap();
        let host = FileSiteHost::in_dir(dir.path());
        assert!(host.deploy(&spec("shop", 8080)).success);

        let again = host.deploy(&spec("shop", 8080));
        assert!(!again.success);
        assert!(again.message.contains("already exists"));

        let mut update = spec("shop", 8081);
        update.create_new = false;
        let updated = host.deploy(&update);
        assert!(updated.success);
        assert!(updated.message.starts_with("updated"));
        assert_eq!(host.load().unwrap()["shop"].spec.port, 8081);
    }

    #[test]
    fn test_binding_conflict() {
        let host = MemorySiteHost::new();
        assert!(host.deploy(&spec("shop", 8080)).success);
        let clash = host.deploy(&spec("blog", 8080));
        assert!(!clash.success);
        assert!(clash.message.contains("'shop'"));

        let mut other_host = spec("blog", 8080);
        other_host.host_name = "blog.example".to_string();
        assert!(host.deploy(&other_host).success);
    }

    #[test]
    fn test_missing_site_operations_fail() {
        let host = MemorySiteHost::new();
        assert!(!host.stop("ghost", Duration::from_secs(1)).success);
        assert!(!host.start("ghost").success);
        assert!(host.get("ghost").is_none());
    }

    #[test]
    fn test_corrupt_site_table_fails_deploy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SITES_FILE), b"{not json").unwrap();
        let host = FileSiteHost::in_dir(dir.path());
        let outcome = host.deploy(&spec("shop", 80));
        assert!(!outcome.success);
    }
}
