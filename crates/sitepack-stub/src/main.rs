//! Installer template executable.
//!
//! Packaged installers are copies of this binary with a payload appended.
//! At run time it:
//! 1. Resolves its own image and reads the appended payload
//! 2. Extracts the application into the target directory
//! 3. Deploys the site, registers the application and writes a manifest
//!
//! Started with `/uninstall <code>` (or `--uninstall <code>`) it removes an
//! installation instead. Without `--quiet` the operator is prompted before
//! anything changes; exit codes are the same in both modes.

mod console;
mod embedded;

use clap::Parser;
use sitepack::config::SitepackConfig;
use sitepack::error::{Error, EXIT_IO, EXIT_OK, EXIT_VALIDATION};
use sitepack::install::{run_install, run_uninstall, Collaborators, InstallPlan};
use sitepack::manifest::{product_code_from_name, ManifestStore};
use sitepack::mode::{normalize_args, InstallerMode};
use sitepack::registry::{AppRegistration, MemoryRegistry, RedbRegistry};
use sitepack::site::{FileSiteHost, MemorySiteHost, SiteDeployment};
use sitepack::transcript::Transcript;
use sitepack_pack::archive::{list_entries, read_product_info};
use sitepack_pack::detect::{locate_payload, read_footer_location, resolve_self_image_path};
use sitepack_pack::{LocatedPayload, PayloadSource, ProductInfo, Progress};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Uninstaller copies directory inside the data directory.
const UNINSTALLERS_DIR: &str = "uninstallers";

/// Packaged web application installer.
#[derive(Parser, Debug)]
#[command(name = "setup")]
#[command(about = "Install the web application packaged in this executable")]
#[command(version)]
struct Args {
    /// Directory to install into [default: <install_root>/<site name>]
    #[arg(long, value_name = "DIR")]
    target: Option<PathBuf>,

    /// Site name [default: product code]
    #[arg(long, value_name = "NAME")]
    site_name: Option<String>,

    /// Application pool name [default: from config]
    #[arg(long, value_name = "NAME")]
    pool: Option<String>,

    /// Listening port [default: from config]
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Host name binding (empty for any host)
    #[arg(long, value_name = "HOST", default_value = "")]
    host: String,

    /// Product code (overrides the packaged one; selects the product to uninstall)
    #[arg(long, value_name = "CODE")]
    productcode: Option<String>,

    /// Remove an installation instead of installing
    #[arg(long, value_name = "CODE", num_args = 0..=1, default_missing_value = "")]
    uninstall: Option<String>,

    /// How long to wait for a site to stop (e.g. "30s")
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    stop_timeout: Option<Duration>,

    /// Run without prompts
    #[arg(short, long)]
    quiet: bool,

    /// Simulate the install in a scratch directory without touching the system
    #[arg(long)]
    dry_run: bool,

    /// Show payload info and exit
    #[arg(long)]
    info: bool,

    /// Print the transcript as JSON
    #[arg(long)]
    json: bool,

    /// Print debug information
    #[arg(long)]
    debug: bool,
}

/// Collaborators for one run, owned so they outlive the flow.
struct Backends {
    sites: Box<dyn SiteDeployment>,
    registry: Box<dyn AppRegistration>,
    manifests: ManifestStore,
    uninstaller_dir: PathBuf,
    scratch: Option<tempfile::TempDir>,
}

impl Backends {
    /// Local site table, program list and manifests in the data directory.
    fn open(config: &SitepackConfig) -> sitepack::Result<Self> {
        let data_dir = config.data_dir()?;
        Ok(Self {
            sites: Box::new(FileSiteHost::in_dir(&data_dir)),
            registry: Box::new(RedbRegistry::open_in(&data_dir)?),
            manifests: ManifestStore::in_dir(&data_dir),
            uninstaller_dir: data_dir.join(UNINSTALLERS_DIR),
            scratch: None,
        })
    }

    /// In-memory collaborators with files kept in a scratch directory.
    fn dry_run() -> sitepack::Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("sitepack-dry-run-")
            .tempdir()?;
        Ok(Self {
            sites: Box::new(MemorySiteHost::new()),
            registry: Box::new(MemoryRegistry::new()),
            manifests: ManifestStore::in_dir(scratch.path()),
            uninstaller_dir: scratch.path().join(UNINSTALLERS_DIR),
            scratch: Some(scratch),
        })
    }

    fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|d| d.path())
    }

    fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            sites: self.sites.as_ref(),
            registry: self.registry.as_ref(),
            manifests: &self.manifests,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse_from(normalize_args(
        std::env::args_os().map(|a| a.to_string_lossy().into_owned()),
    ));

    init_logging(args.debug);

    tracing::debug!(version = sitepack::VERSION, "starting installer");

    let mode = match InstallerMode::select(args.uninstall.as_deref(), args.productcode.as_deref()) {
        Ok(mode) => mode,
        Err(msg) => {
            eprintln!("error: {}", msg);
            return ExitCode::from(EXIT_VALIDATION);
        }
    };

    let config = match SitepackConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            SitepackConfig::default()
        }
    };

    let self_image = match resolve_self_image_path() {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!(error = %e, "could not resolve installer image");
            None
        }
    };

    let code = match &mode {
        InstallerMode::Install { product_code } => {
            let payload = find_payload(self_image.as_deref());
            if args.info {
                return ExitCode::from(print_info(&args, payload.as_ref()));
            }
            install(&args, &config, product_code.as_deref(), self_image, payload)
        }
        InstallerMode::Uninstall { product_code } => uninstall(&args, &config, product_code),
    };

    if !args.quiet && !args.json {
        console::wait_for_enter();
    }

    ExitCode::from(code)
}

/// Initialize the tracing subscriber.
///
/// Transcript entries are printed at the end of a run, so the library's
/// own events stay quiet unless `--debug` or `RUST_LOG` asks for them.
fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("sitepack=debug,sitepack_pack=debug,sitepack_stub=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sitepack=error,sitepack_pack=warn,sitepack_stub=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Appended footer first, then the payload compiled into the stub.
fn find_payload(self_image: Option<&Path>) -> Option<LocatedPayload> {
    let fallback = embedded::fallback_payload();
    match self_image {
        Some(image) => locate_payload(image, fallback),
        None => fallback.map(|bytes| LocatedPayload {
            source: PayloadSource::Embedded,
            archive: bytes.to_vec(),
        }),
    }
}

/// Product code used when neither the payload nor the image name supplies one.
const DEFAULT_PRODUCT: &str = "sitepack-app";

/// Product info from the payload, or one derived from the image name.
fn resolve_product(
    code_override: Option<&str>,
    payload: Option<&LocatedPayload>,
    self_image: Option<&Path>,
) -> ProductInfo {
    let mut product = payload
        .and_then(|p| read_product_info(&p.archive))
        .unwrap_or_else(|| {
            let name = self_image
                .and_then(|p| p.file_stem())
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| DEFAULT_PRODUCT.to_string());
            let code = product_code_from_name(&name).unwrap_or_else(|| DEFAULT_PRODUCT.to_string());
            ProductInfo::new(code, name, "0.0.0")
        });
    if let Some(code) = code_override {
        product.product_code = code.to_string();
    }
    product
}

fn stop_timeout(args: &Args, config: &SitepackConfig) -> Duration {
    args.stop_timeout.unwrap_or_else(|| {
        config.stop_timeout().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "invalid stop_timeout in config, using 30s");
            Duration::from_secs(30)
        })
    })
}

fn print_info(args: &Args, payload: Option<&LocatedPayload>) -> u8 {
    let Some(payload) = payload else {
        if args.json {
            println!("{}", serde_json::json!({ "payload": null }));
        } else {
            println!("No application payload (template installer)");
        }
        return EXIT_OK;
    };

    let entries = match list_entries(&payload.archive) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("error: {}", e);
            return EXIT_IO;
        }
    };
    let files = entries.iter().filter(|e| !e.is_dir).count();
    let product = read_product_info(&payload.archive);
    let template_size = match &payload.source {
        PayloadSource::Appended { image } => read_footer_location(image).ok().map(|l| l.template_len()),
        PayloadSource::Embedded => None,
    };

    if args.json {
        let out = serde_json::json!({
            "payload": {
                "source": payload.source.to_string(),
                "archive_size": payload.archive.len(),
                "template_size": template_size,
                "files": files,
                "directories": entries.len() - files,
                "product": product,
            }
        });
        println!("{}", out);
        return EXIT_OK;
    }

    println!("Payload: {}", payload.source);
    println!("Archive size: {} bytes", payload.archive.len());
    if let Some(size) = template_size {
        println!("Template size: {} bytes", size);
    }
    match &product {
        Some(p) => {
            println!("Product: {} ({})", p.display_name, p.product_code);
            println!("Version: {}", p.version);
        }
        None => println!("Product: -"),
    }
    println!("Files: {}", files);
    EXIT_OK
}

fn install(
    args: &Args,
    config: &SitepackConfig,
    code_override: Option<&str>,
    self_image: Option<PathBuf>,
    payload: Option<LocatedPayload>,
) -> u8 {
    let product = resolve_product(code_override, payload.as_ref(), self_image.as_deref());
    let backends = match open_backends(config, args.dry_run) {
        Ok(b) => b,
        Err(e) => return report_error(&e),
    };

    let site_name = args
        .site_name
        .clone()
        .unwrap_or_else(|| product.product_code.clone());
    let target_dir = match backends.scratch_dir() {
        Some(scratch) => scratch.join("site"),
        None => args
            .target
            .clone()
            .unwrap_or_else(|| config.install_root.join(&site_name)),
    };
    let plan = InstallPlan {
        product,
        target_dir,
        site_name,
        pool_name: args.pool.clone().unwrap_or_else(|| config.default_pool.clone()),
        port: args.port.unwrap_or(config.default_port),
        host_name: args.host.clone(),
        stop_timeout: stop_timeout(args, config),
        uninstaller_source: self_image,
        uninstaller_dir: backends.uninstaller_dir.clone(),
    };

    if !args.quiet {
        eprintln!(
            "{} {} ({})",
            plan.product.display_name, plan.product.version, plan.product.product_code
        );
        eprintln!("  Target: {}", plan.target_dir.display());
        eprintln!("  Site:   {} on port {}", plan.site_name, plan.port);
        if !console::confirm("Install?", true) {
            eprintln!("Cancelled");
            return EXIT_OK;
        }
    }

    let mut transcript = Transcript::new();
    if let Some(scratch) = backends.scratch_dir() {
        transcript.step(format!("dry run in {}", scratch.display()));
    } else if !console::is_elevated() {
        transcript.warn("not running with administrative rights, site changes may fail");
    }
    if let Some(p) = &payload {
        transcript.step(format!("found payload ({})", p.source));
    }

    console::install_interrupt_handler();

    let show_progress = !args.quiet && !args.json;
    let mut progress = |p: Progress<'_>| {
        if show_progress {
            eprint!("\rExtracting {}/{} files", p.done, p.total);
            if p.done == p.total {
                eprintln!();
            }
        }
    };

    let result = run_install(
        &plan,
        payload.as_ref().map(|p| p.archive.as_slice()),
        &backends.collaborators(),
        &mut transcript,
        &mut progress,
        &console::CANCEL,
    );

    match result {
        Ok(report) => {
            print_transcript(
                args,
                &transcript,
                serde_json::json!({
                    "success": true,
                    "url": report.url,
                    "files": report.files,
                    "upgrade": report.upgrade,
                    "install_path": report.manifest.install_path,
                }),
            );
            if !args.json {
                if let Some(url) = &report.url {
                    println!("Installed. Site available at {}", url);
                }
            }
            EXIT_OK
        }
        Err(e) => {
            if console::cancelled() {
                tracing::info!("install interrupted");
            }
            print_transcript(
                args,
                &transcript,
                serde_json::json!({ "success": false, "error": e.to_string() }),
            );
            e.exit_code()
        }
    }
}

fn uninstall(args: &Args, config: &SitepackConfig, product_code: &str) -> u8 {
    if args.dry_run {
        return preview_uninstall(config, product_code);
    }

    if !args.quiet && !console::confirm(&format!("Remove '{}'?", product_code), false) {
        eprintln!("Cancelled");
        return EXIT_OK;
    }

    let backends = match open_backends(config, false) {
        Ok(b) => b,
        Err(e) => return report_error(&e),
    };

    let mut transcript = Transcript::new();
    if !console::is_elevated() {
        transcript.warn("not running with administrative rights, site changes may fail");
    }

    let result = run_uninstall(
        product_code,
        &backends.collaborators(),
        stop_timeout(args, config),
        &mut transcript,
    );

    match result {
        Ok(report) => {
            run_deferred_cleanup(&report.deferred_cleanup, &mut transcript);
            print_transcript(args, &transcript, serde_json::json!({ "success": true }));
            EXIT_OK
        }
        Err(e) => {
            print_transcript(
                args,
                &transcript,
                serde_json::json!({ "success": false, "error": e.to_string() }),
            );
            e.exit_code()
        }
    }
}

/// Describe what an uninstall would remove without changing anything.
fn preview_uninstall(config: &SitepackConfig, product_code: &str) -> u8 {
    let manifest = config
        .data_dir()
        .and_then(|dir| ManifestStore::in_dir(&dir).load(product_code));
    match manifest {
        Ok(Some(m)) => {
            println!("Would stop and remove site '{}'", m.site_name);
            println!("Would remove {}", m.install_path.display());
            println!("Would remove '{}' from the program list", m.product_code);
            if let Some(u) = &m.uninstaller {
                println!("Would remove {}", u.display());
            }
            EXIT_OK
        }
        Ok(None) => report_error(&Error::NotInstalled(product_code.to_string())),
        Err(e) => report_error(&e),
    }
}

fn open_backends(config: &SitepackConfig, dry_run: bool) -> sitepack::Result<Backends> {
    if dry_run {
        Backends::dry_run()
    } else {
        Backends::open(config)
    }
}

/// Remove files the uninstall flow could not delete while running.
#[cfg(unix)]
fn run_deferred_cleanup(files: &[PathBuf], transcript: &mut Transcript) {
    for file in files {
        match std::fs::remove_file(file) {
            Ok(()) => transcript.step(format!("removed {}", file.display())),
            Err(e) => transcript.warn(format!("could not remove {}: {}", file.display(), e)),
        }
    }
}

/// Running images cannot be deleted here; leave them to the operator.
#[cfg(not(unix))]
fn run_deferred_cleanup(files: &[PathBuf], transcript: &mut Transcript) {
    for file in files {
        transcript.warn(format!(
            "{} is in use and must be deleted after this program exits",
            file.display()
        ));
    }
}

fn print_transcript(args: &Args, transcript: &Transcript, outcome: serde_json::Value) {
    if args.json {
        let out = serde_json::json!({
            "transcript": transcript.entries(),
            "result": outcome,
        });
        println!("{}", out);
    } else {
        print!("{}", transcript);
    }
}

fn report_error(e: &Error) -> u8 {
    tracing::error!(error = %e, "installer failed");
    eprintln!("error: {}", e);
    e.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitepack_pack::archive::compress_to_vec;

    fn parse(list: &[&str]) -> Args {
        Args::try_parse_from(normalize_args(list.iter().map(|s| s.to_string()))).unwrap()
    }

    #[test]
    fn test_parse_install_flags() {
        let args = parse(&[
            "setup",
            "--target",
            "/srv/shop",
            "--port",
            "8080",
            "--stop-timeout",
            "45s",
            "/quiet",
        ]);
        assert_eq!(args.target, Some(PathBuf::from("/srv/shop")));
        assert_eq!(args.port, Some(8080));
        assert_eq!(args.stop_timeout, Some(Duration::from_secs(45)));
        assert!(args.quiet);
        assert!(args.uninstall.is_none());
    }

    #[test]
    fn test_parse_uninstall_forms() {
        let args = parse(&["setup", "/uninstall", "shop"]);
        assert_eq!(args.uninstall.as_deref(), Some("shop"));

        let args = parse(&["setup", "--uninstall", "--productcode=shop"]);
        assert_eq!(args.uninstall.as_deref(), Some(""));
        assert_eq!(
            InstallerMode::select(args.uninstall.as_deref(), args.productcode.as_deref()).unwrap(),
            InstallerMode::Uninstall {
                product_code: "shop".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_product_from_payload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "hello").unwrap();
        let info = ProductInfo::new("shop", "Shop", "2.1.0");
        let (archive, _) = compress_to_vec(dir.path(), Some(info.to_json().as_str()), &mut |_| {}).unwrap();
        let payload = LocatedPayload {
            source: PayloadSource::Embedded,
            archive,
        };

        assert_eq!(resolve_product(None, Some(&payload), None), info);
        assert_eq!(
            resolve_product(Some("shop-eu"), Some(&payload), None).product_code,
            "shop-eu"
        );
    }

    #[test]
    fn test_resolve_product_without_payload() {
        let product = resolve_product(None, None, Some(Path::new("/tmp/blog-setup.exe")));
        assert_eq!(product.product_code, "blog-setup");
        assert_eq!(product.version, "0.0.0");

        assert_eq!(resolve_product(None, None, None).product_code, "sitepack-app");
    }

    #[test]
    fn test_resolve_product_sanitizes_download_name() {
        let product = resolve_product(None, None, Some(Path::new("/home/me/Shop Setup (1).exe")));
        assert_eq!(product.product_code, "Shop-Setup-1");
        assert_eq!(product.display_name, "Shop Setup (1)");
        assert!(sitepack::manifest::validate_product_code(&product.product_code).is_ok());

        let product = resolve_product(None, None, Some(Path::new("/tmp/(((.exe")));
        assert_eq!(product.product_code, "sitepack-app");
    }

    #[test]
    fn test_find_payload_from_appended_footer() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("plain");
        std::fs::write(&image, vec![0u8; 4096]).unwrap();
        if embedded::fallback_payload().is_none() {
            assert!(find_payload(Some(&image)).is_none());
        }

        let mut packed = vec![0u8; 4096];
        packed.extend_from_slice(sitepack_pack::MAGIC);
        packed.extend_from_slice(b"zipbytes");
        packed.extend_from_slice(&sitepack_pack::format::encode_trailer(8));
        let installer = dir.path().join("setup");
        std::fs::write(&installer, packed).unwrap();

        let found = find_payload(Some(&installer)).unwrap();
        assert_eq!(found.archive, b"zipbytes");
        assert!(matches!(found.source, PayloadSource::Appended { .. }));
    }

    #[test]
    fn test_dry_run_install_leaves_system_alone() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("index.html"), "hello").unwrap();
        let (archive, _) = compress_to_vec(src.path(), None, &mut |_| {}).unwrap();

        let backends = Backends::dry_run().unwrap();
        let scratch = backends.scratch_dir().unwrap().to_path_buf();
        let plan = InstallPlan {
            product: ProductInfo::new("shop", "Shop", "1.0"),
            target_dir: scratch.join("site"),
            site_name: "shop".to_string(),
            pool_name: "sitepack".to_string(),
            port: 8080,
            host_name: String::new(),
            stop_timeout: Duration::from_secs(1),
            uninstaller_source: None,
            uninstaller_dir: backends.uninstaller_dir.clone(),
        };
        let mut transcript = Transcript::new();
        let cancel = std::sync::atomic::AtomicBool::new(false);
        let report = run_install(
            &plan,
            Some(archive.as_slice()),
            &backends.collaborators(),
            &mut transcript,
            &mut |_| {},
            &cancel,
        )
        .unwrap();

        assert_eq!(report.files, 1);
        assert!(scratch.join("site").join("index.html").is_file());
        assert!(backends.registry.lookup("shop").is_some());

        drop(backends);
        assert!(!scratch.exists());
    }
}
