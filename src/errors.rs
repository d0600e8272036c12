//! Error hierarchy for the watch engine.
//!
//! Fetch-level failures never surface here: they are modelled as
//! [`crate::FetchOutcome`] variants and contained inside each location's
//! scheduling loop. The types below cover setup and infrastructure failures
//! (configuration, proxy file loading, HTTP client construction, socket
//! binding, signal plumbing).

use std::path::PathBuf;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration source could not be read or deserialized
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration was read but violates a validation rule
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Proxy list file exists but could not be read or parsed
    #[error("Failed to load proxy file {path}: {reason}")]
    ProxyFile { path: PathBuf, reason: String },

    /// HTTP client construction failures
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Push-channel or metrics server failures (bind/accept)
    #[error("Server error: {0}")]
    Server(String),

    /// Site adapter could not build request URLs or parse a page
    #[error(transparent)]
    Parse(#[from] ParseFailure),

    #[error("{0}")]
    SignalSenderClosed(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Failure raised by a [`crate::SiteAdapter`] when a page does not look like
/// the calendar it expects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    /// Response body lacks the structure the adapter relies on
    #[error("unexpected page shape: {0}")]
    UnexpectedShape(String),

    /// A bookable entry was found but its identifier could not be decoded
    #[error("invalid slot entry: {0}")]
    InvalidSlot(String),

    /// The configured service URL cannot be turned into calendar URLs
    #[error("invalid service url: {0}")]
    InvalidServiceUrl(String),
}
