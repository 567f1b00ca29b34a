//! Error handling for certificate checking runs.
//!
//! Only run-level failures are errors: bad configuration, unreadable input,
//! a client that cannot be built. Per-domain probe failures are never errors,
//! they are reported as [`ProbeStatus`](crate::ProbeStatus) values.

use std::fmt;

/// Main error type for cert-check operations.
#[derive(Debug, Clone)]
pub enum CertCheckError {
    /// A string that does not satisfy domain-name syntax
    InvalidDomain { domain: String, reason: String },

    /// Network setup errors (building the HTTPS client, etc.)
    NetworkError {
        message: String,
        source: Option<String>,
    },

    /// Configuration errors (invalid settings, bad config file, etc.)
    ConfigError { message: String },

    /// File I/O errors when reading domain lists or writing results
    FileError { path: String, message: String },

    /// Generic internal errors that don't fit other categories
    Internal { message: String },
}

impl CertCheckError {
    /// Create a new invalid domain error.
    pub fn invalid_domain<D: Into<String>, R: Into<String>>(domain: D, reason: R) -> Self {
        Self::InvalidDomain {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    /// Create a new network error with source information.
    pub fn network_with_source<M: Into<String>, S: Into<String>>(message: M, source: S) -> Self {
        Self::NetworkError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::FileError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl fmt::Display for CertCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDomain { domain, reason } => {
                write!(f, "Invalid domain '{}': {}", domain, reason)
            }
            Self::NetworkError { message, source } => {
                if let Some(source) = source {
                    write!(f, "Network error: {} (source: {})", message, source)
                } else {
                    write!(f, "Network error: {}", message)
                }
            }
            Self::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            Self::FileError { path, message } => {
                write!(f, "File error at '{}': {}", path, message)
            }
            Self::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for CertCheckError {}

impl From<reqwest::Error> for CertCheckError {
    fn from(err: reqwest::Error) -> Self {
        Self::network_with_source("Failed to create HTTPS client", err.to_string())
    }
}

impl From<toml::de::Error> for CertCheckError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError {
            message: format!("Failed to parse TOML configuration: {}", err),
        }
    }
}
