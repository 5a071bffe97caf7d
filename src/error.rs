//! Error types for scorm-runtime
//!
//! Runtime-API failures are not represented here: SCO content only ever sees
//! numeric codes through the adapter's error register (see
//! [`crate::runtime::ErrorCode`]).

use thiserror::Error;

/// Failure to turn `imsmanifest.xml` into a [`crate::manifest::PackageManifest`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManifestError {
    #[error("Malformed manifest XML: {0}")]
    Malformed(String),

    #[error("Manifest has no <manifest> root element")]
    MissingRoot,

    #[error("Manifest not found in package")]
    NotFound,
}

/// Failure talking to the backing store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The delivery mechanism is not available in this context
    /// (e.g. no unload-resilient channel).
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Attempt not found: {0}")]
    NotFound(String),
}

/// Failure opening or reading a package archive.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum ScormError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No async runtime available: {0}")]
    Runtime(String),
}
