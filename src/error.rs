//! Error types for sitepack.

use sitepack_pack::PackError;
use thiserror::Error;

/// Result type alias using sitepack's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Process exit code for success.
pub const EXIT_OK: u8 = 0;
/// Process exit code for invalid input or options.
pub const EXIT_VALIDATION: u8 = 1;
/// Process exit code for I/O, packaging or extraction failures.
pub const EXIT_IO: u8 = 2;
/// Process exit code for a failing deployment or registration collaborator.
pub const EXIT_DEPLOYMENT: u8 = 3;

/// Errors that can occur in sitepack operations.
#[derive(Error, Debug)]
pub enum Error {
    // Payload errors
    /// Embedding or extraction failed.
    #[error(transparent)]
    Pack(#[from] PackError),

    // Input errors
    /// Invalid option or argument.
    #[error("invalid input: {0}")]
    Validation(String),

    /// No installation is recorded for a product code.
    #[error("no installation found for product code '{0}'")]
    NotInstalled(String),

    // Collaborator errors
    /// Site deployment collaborator reported failure.
    #[error("site deployment failed: {0}")]
    Deployment(String),

    /// Application registration collaborator reported failure.
    #[error("application registration failed: {0}")]
    Registration(String),

    // Persistence errors
    /// Install manifest could not be read or written.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Failed to load configuration.
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Failed to save configuration.
    #[error("failed to save config: {0}")]
    ConfigSave(String),

    /// Program list database error.
    #[error("database error: {0}")]
    Database(String),

    // IO errors
    /// IO error wrapper.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a validation error with a message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a deployment error with a message.
    pub fn deployment(msg: impl Into<String>) -> Self {
        Self::Deployment(msg.into())
    }

    /// Create a registration error with a message.
    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }

    /// Exit code for non-interactive runs.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Validation(_) | Error::NotInstalled(_) | Error::ConfigLoad(_) => EXIT_VALIDATION,
            Error::Pack(e) => match e {
                PackError::SourceNotFound(_)
                | PackError::EmptySource(_)
                | PackError::TemplateNotFound(_)
                | PackError::OutputIsTemplate(_)
                | PackError::InvalidSourcePath(_) => EXIT_VALIDATION,
                _ => EXIT_IO,
            },
            Error::Deployment(_) | Error::Registration(_) => EXIT_DEPLOYMENT,
            Error::Manifest(_) | Error::ConfigSave(_) | Error::Database(_) | Error::Io(_) => EXIT_IO,
        }
    }
}
