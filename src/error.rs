//! Centralized error types for eml2pdf.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the eml2pdf library.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified input file does not exist.
    #[error("Input file not found: {0}")]
    FileNotFound(PathBuf),

    /// The message could not be parsed or has no decodable body.
    #[error("Cannot parse message: {0}")]
    Parse(String),

    /// The body markup could not be laid out.
    #[error("Cannot render message body: {0}")]
    Render(String),

    /// A single attachment could not be converted.
    #[error("Cannot convert attachment '{filename}': {reason}")]
    Conversion { filename: String, reason: String },

    /// The merged document violates the page geometry contract.
    #[error("Merged document is inconsistent: {0}")]
    Merge(String),

    /// An external tool could not be launched, timed out, or exited abnormally.
    #[error("External tool '{program}' failed: {reason}")]
    Resource { program: String, reason: String },

    /// Low-level PDF object error.
    #[error("PDF error: {0}")]
    Pdf(String),

    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// How far an error is allowed to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Aborts conversion of the current message.
    Fatal,
    /// Handled where it occurs (plain-text fallback, retry).
    Recoverable,
    /// Confined to one attachment and replaced by a placeholder page.
    Contained,
}

impl Error {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `Conversion` variant for the named attachment.
    pub fn conversion(filename: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Conversion {
            filename: filename.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a `Resource` variant for the named program.
    pub fn resource(program: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Resource {
            program: program.into(),
            reason: reason.to_string(),
        }
    }

    /// Classify this error by the propagation policy.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Render(_) | Self::Resource { .. } => Severity::Recoverable,
            Self::Conversion { .. } => Severity::Contained,
            _ => Severity::Fatal,
        }
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `Error`
/// when no path context is available (rare, prefer `Error::io`).
impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

impl From<lopdf::Error> for Error {
    fn from(e: lopdf::Error) -> Self {
        Self::Pdf(e.to_string())
    }
}
