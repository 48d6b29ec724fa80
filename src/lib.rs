//! sitepack - self-contained web application installers.
//!
//! A published site directory is compressed and appended to a template
//! installer executable. When run, the installer finds its own payload,
//! extracts it and registers the application with the local site host.
//!
//! The payload format lives in [`sitepack_pack`]; this crate holds the
//! collaborators and the install and uninstall flows built on top of it.

pub mod config;
pub mod error;
pub mod install;
pub mod manifest;
pub mod mode;
pub mod registry;
pub mod site;
pub mod transcript;

pub use config::SitepackConfig;
pub use error::{Error, Result};
pub use install::{Collaborators, InstallPlan, InstallReport, UninstallReport};
pub use mode::InstallerMode;
pub use transcript::Transcript;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
