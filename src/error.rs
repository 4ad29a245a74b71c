//! Error types for the availability service and configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by an [`AvailabilityService`](crate::check::AvailabilityService).
///
/// None of these are retried automatically. During a background check they
/// degrade the availability state to `CheckFailed`; during submission they
/// end the attempt in a `Rejected` state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// Transport failure or timeout before a response was received.
    #[error("network failure: {0}")]
    Network(#[source] Box<ureq::Error>),
    /// `check-username` answered with a non-2xx status.
    #[error("unexpected status {status} from availability check")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },
    /// The response body was not the expected JSON.
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    /// `register` answered with a non-2xx status.
    #[error("{message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Plain-text reason supplied by the server.
        message: String,
    },
}

impl From<ureq::Error> for ServiceError {
    fn from(e: ureq::Error) -> Self {
        Self::Network(Box::new(e))
    }
}

/// Errors raised while loading or validating a [`Config`](crate::config::Config).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The service base address is not an absolute `http`/`https` URL.
    #[error("invalid base url `{url}`: {reason}")]
    InvalidBaseUrl {
        /// The rejected value.
        url: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// The config file could not be read.
    #[error("reading config {}: {source}", path.display())]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for [`Config`](crate::config::Config).
    #[error("parsing config {}: {source}", path.display())]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}
