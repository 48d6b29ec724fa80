//! Install and uninstall flows.
//!
//! Both flows take an immutable plan, talk to the collaborators through
//! their traits and append every step to a [`Transcript`]. Collaborator
//! failures come back as [`StepResult`](crate::site::StepResult)s; the flow decides which of them
//! end the run.

use crate::error::{Error, Result};
use crate::manifest::{timestamp, validate_product_code, InstallManifest, ManifestStore};
use crate::registry::{AppRecord, AppRegistration};
use crate::site::{SiteDeployment, SiteSpec};
use crate::transcript::Transcript;
use sitepack_pack::archive::extract_archive;
use sitepack_pack::detect::copy_template_region;
use sitepack_pack::{PackError, ProductInfo, Progress};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Everything an install run needs to know, fixed before it starts.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    /// Product being installed.
    pub product: ProductInfo,
    /// Directory the application is extracted into.
    pub target_dir: PathBuf,
    /// Web site name.
    pub site_name: String,
    /// Application pool name.
    pub pool_name: String,
    /// Listening port.
    pub port: u16,
    /// Host header binding, empty for any host.
    pub host_name: String,
    /// How long to wait for a running site to stop during upgrades.
    pub stop_timeout: Duration,
    /// Installer image to copy, without its payload, as the uninstaller.
    pub uninstaller_source: Option<PathBuf>,
    /// Directory receiving uninstaller copies.
    pub uninstaller_dir: PathBuf,
}

impl InstallPlan {
    /// Check the plan before anything touches the disk.
    pub fn validate(&self) -> Result<()> {
        validate_product_code(&self.product.product_code)?;
        if self.site_name.trim().is_empty() {
            return Err(Error::validation("site name must not be empty"));
        }
        if self.pool_name.trim().is_empty() {
            return Err(Error::validation("application pool name must not be empty"));
        }
        if self.port == 0 {
            return Err(Error::validation("port must be between 1 and 65535"));
        }
        if !self.target_dir.is_absolute() {
            return Err(Error::validation(format!(
                "target directory must be absolute: {}",
                self.target_dir.display()
            )));
        }
        Ok(())
    }

    /// Where the uninstaller copy for this product goes.
    pub fn uninstaller_path(&self) -> PathBuf {
        self.uninstaller_dir.join(format!(
            "{}-uninstall{}",
            self.product.product_code,
            std::env::consts::EXE_SUFFIX
        ))
    }
}

/// The collaborators a flow talks to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub sites: &'a dyn SiteDeployment,
    pub registry: &'a dyn AppRegistration,
    pub manifests: &'a ManifestStore,
}

/// Result of a successful install.
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// URL of the deployed site.
    pub url: Option<String>,
    /// Files extracted.
    pub files: usize,
    /// Whether a previous installation was replaced.
    pub upgrade: bool,
    /// The manifest written for this installation.
    pub manifest: InstallManifest,
}

/// Result of a successful uninstall.
#[derive(Debug, Clone, Default)]
pub struct UninstallReport {
    /// Files the process layer must remove once it exits.
    pub deferred_cleanup: Vec<PathBuf>,
}

/// Command line a program list runs to remove the product.
pub fn uninstall_command(uninstaller: &Path, product_code: &str) -> String {
    format!("\"{}\" /uninstall {}", uninstaller.display(), product_code)
}

/// Install the application described by `plan`.
///
/// `payload` is the archive found in the installer; `None` installs an
/// empty directory. The transcript holds every step taken, including the
/// failure when an error is returned.
pub fn run_install(
    plan: &InstallPlan,
    payload: Option<&[u8]>,
    collab: &Collaborators<'_>,
    transcript: &mut Transcript,
    progress: &mut dyn FnMut(Progress<'_>),
    cancel: &AtomicBool,
) -> Result<InstallReport> {
    let result = install_steps(plan, payload, collab, transcript, progress, cancel);
    if let Err(e) = &result {
        transcript.fail(e.to_string());
    }
    result
}

fn install_steps(
    plan: &InstallPlan,
    payload: Option<&[u8]>,
    collab: &Collaborators<'_>,
    transcript: &mut Transcript,
    progress: &mut dyn FnMut(Progress<'_>),
    cancel: &AtomicBool,
) -> Result<InstallReport> {
    plan.validate()?;
    let code = &plan.product.product_code;
    transcript.step(format!(
        "installing {} {} ({})",
        plan.product.display_name, plan.product.version, code
    ));

    // Upgrade detection
    let previous = collab.manifests.load(code)?;
    if let Some(prev) = &previous {
        transcript.step(format!(
            "found existing installation {} at {}",
            prev.version,
            prev.install_path.display()
        ));
        if collab.sites.exists(&prev.site_name) {
            let stopped = collab.sites.stop(&prev.site_name, plan.stop_timeout);
            if stopped.success {
                transcript.step(format!("stopped site '{}'", prev.site_name));
            } else {
                transcript.warn(format!(
                    "could not stop site '{}': {}",
                    prev.site_name,
                    stopped.detail()
                ));
            }
        }
        if prev.install_path != plan.target_dir {
            transcript.warn(format!(
                "previous files at {} are left in place",
                prev.install_path.display()
            ));
        }
    }
    let upgrade = previous.is_some();

    // Extraction
    std::fs::create_dir_all(&plan.target_dir)
        .map_err(|e| PackError::io("create directory", &plan.target_dir, e))?;
    let files = match payload {
        Some(archive) => {
            let files = extract_archive(archive, &plan.target_dir, progress, cancel)?;
            transcript.step(format!(
                "extracted {} files to {}",
                files,
                plan.target_dir.display()
            ));
            files
        }
        None => {
            transcript.warn(format!(
                "installer has no application payload, created empty directory {}",
                plan.target_dir.display()
            ));
            0
        }
    };

    // Site deployment
    let spec = SiteSpec {
        name: plan.site_name.clone(),
        physical_path: plan.target_dir.clone(),
        pool_name: plan.pool_name.clone(),
        port: plan.port,
        host_name: plan.host_name.clone(),
        create_new: !upgrade,
    };
    let deployed = collab.sites.deploy(&spec);
    if !deployed.success {
        return Err(Error::deployment(deployed.message));
    }
    transcript.step(deployed.message.clone());

    let started = collab.sites.start(&plan.site_name);
    if started.success {
        transcript.step(format!("started site '{}'", plan.site_name));
    } else {
        transcript.warn(format!(
            "site '{}' did not start: {}",
            plan.site_name,
            started.detail()
        ));
    }

    // Uninstaller
    let uninstaller = place_uninstaller(plan, transcript);

    // Registration
    let command = match &uninstaller {
        Some(path) => uninstall_command(path, code),
        None => String::new(),
    };
    let record = AppRecord {
        product_code: code.clone(),
        display_name: plan.product.display_name.clone(),
        version: plan.product.version.clone(),
        install_path: plan.target_dir.clone(),
        uninstall_command: command,
    };
    let registered = collab.registry.register(&record);
    if !registered.success {
        return Err(Error::registration(registered.detail()));
    }
    transcript.step(format!("registered '{}' in the program list", code));

    let manifest = InstallManifest {
        product_code: code.clone(),
        display_name: plan.product.display_name.clone(),
        version: plan.product.version.clone(),
        install_path: plan.target_dir.clone(),
        site_name: plan.site_name.clone(),
        pool_name: plan.pool_name.clone(),
        port: plan.port,
        host_name: plan.host_name.clone(),
        uninstaller,
        installed_at: timestamp(),
    };
    let path = collab.manifests.save(&manifest)?;
    transcript.step(format!("wrote manifest {}", path.display()));

    Ok(InstallReport {
        url: deployed.url,
        files,
        upgrade,
        manifest,
    })
}

fn place_uninstaller(plan: &InstallPlan, transcript: &mut Transcript) -> Option<PathBuf> {
    let Some(source) = &plan.uninstaller_source else {
        transcript.warn("no installer image available, uninstaller not placed");
        return None;
    };
    let dest = plan.uninstaller_path();
    let placed = std::fs::create_dir_all(&plan.uninstaller_dir)
        .map_err(|e| PackError::io("create directory", &plan.uninstaller_dir, e))
        .and_then(|_| copy_template_region(source, &dest));
    match placed {
        Ok(_) => {
            transcript.step(format!("placed uninstaller at {}", dest.display()));
            Some(dest)
        }
        Err(e) => {
            transcript.warn(format!("could not place uninstaller: {}", e));
            None
        }
    }
}

/// Remove the installation of `product_code`.
pub fn run_uninstall(
    product_code: &str,
    collab: &Collaborators<'_>,
    stop_timeout: Duration,
    transcript: &mut Transcript,
) -> Result<UninstallReport> {
    let result = uninstall_steps(product_code, collab, stop_timeout, transcript);
    if let Err(e) = &result {
        transcript.fail(e.to_string());
    }
    result
}

fn uninstall_steps(
    product_code: &str,
    collab: &Collaborators<'_>,
    stop_timeout: Duration,
    transcript: &mut Transcript,
) -> Result<UninstallReport> {
    validate_product_code(product_code)?;

    let manifest = collab.manifests.load(product_code)?;
    let record = collab.registry.lookup(product_code);

    let (install_path, site_name, uninstaller) = match (&manifest, &record) {
        (Some(m), _) => (m.install_path.clone(), Some(m.site_name.clone()), m.uninstaller.clone()),
        (None, Some(r)) => {
            transcript.warn(format!(
                "no manifest for '{}', using program list entry",
                product_code
            ));
            (r.install_path.clone(), None, None)
        }
        (None, None) => return Err(Error::NotInstalled(product_code.to_string())),
    };
    transcript.step(format!(
        "uninstalling '{}' from {}",
        product_code,
        install_path.display()
    ));

    if let Some(site) = &site_name {
        let stopped = collab.sites.stop(site, stop_timeout);
        if stopped.success {
            transcript.step(format!("stopped site '{}'", site));
        } else {
            transcript.warn(format!("could not stop site '{}': {}", site, stopped.detail()));
        }
        let removed = collab.sites.remove(site);
        if removed.success {
            transcript.step(format!("removed site '{}'", site));
        } else {
            transcript.warn(format!("could not remove site '{}': {}", site, removed.detail()));
        }
    }

    match std::fs::remove_dir_all(&install_path) {
        Ok(()) => transcript.step(format!("removed {}", install_path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            transcript.warn(format!("{} was already gone", install_path.display()))
        }
        Err(e) => transcript.warn(format!("could not remove {}: {}", install_path.display(), e)),
    }

    if record.is_some() {
        let unregistered = collab.registry.unregister(product_code);
        if !unregistered.success {
            return Err(Error::registration(unregistered.detail()));
        }
        transcript.step(format!("removed '{}' from the program list", product_code));
    }

    if collab.manifests.remove(product_code)? {
        transcript.step("removed install manifest");
    }

    let deferred_cleanup = uninstaller.into_iter().filter(|p| p.exists()).collect();
    Ok(UninstallReport { deferred_cleanup })
}
