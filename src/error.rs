//! Error types for nfs-store
//!
//! This module defines the error hierarchy shared by every protocol client:
//! - Authentication rejections (re-prompt for credentials)
//! - Configuration and precondition failures (fix the setup)
//! - Transport and protocol failures (retry later)
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors carry the server or path they refer to
//! - Callers branch on `NfsError::kind()` rather than on variants

use thiserror::Error;

/// Broad classification of a client failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credentials rejected by the remote system, not retryable as-is
    Auth,
    /// Misconfiguration or an inconsistent remote state
    Precondition,
    /// I/O or protocol failure, may succeed on retry
    Transport,
}

/// Remote file-store client errors
#[derive(Error, Debug)]
pub enum NfsError {
    /// Credentials were rejected
    #[error("Authentication failed for '{username}' on '{server}': {reason}")]
    Auth {
        server: String,
        username: String,
        reason: String,
    },

    /// Invalid file system configuration or credentials
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Server presented a host key that does not match the pinned one
    #[error("Host key mismatch for '{server}': the server key does not match the configured key")]
    HostKeyMismatch { server: String },

    /// Target has neither a path nor an id, or the path is unusable
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Connection failed
    #[error("Failed to connect to '{server}': {reason}")]
    ConnectionFailed { server: String, reason: String },

    /// Directory operation failed
    #[error("Failed to read directory '{path}': {reason}")]
    ReadDirFailed { path: String, reason: String },

    /// Stat operation failed
    #[error("Failed to stat '{path}': {reason}")]
    StatFailed { path: String, reason: String },

    /// Opening a file for reading failed
    #[error("Failed to read file '{path}': {reason}")]
    ReadFailed { path: String, reason: String },

    /// Permission denied
    #[error("Permission denied: '{path}'")]
    PermissionDenied { path: String },

    /// Path not found
    #[error("Path not found: '{path}'")]
    NotFound { path: String },

    /// A lookup expected to be unique matched zero or several entries
    #[error("Expected exactly one entry for '{target}', found {count}")]
    Inconsistent { target: String, count: usize },

    /// Generic protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NfsError {
    /// Classify this error for recovery decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            NfsError::Auth { .. } => ErrorKind::Auth,
            NfsError::Config(_)
            | NfsError::HostKeyMismatch { .. }
            | NfsError::InvalidTarget(_)
            | NfsError::Inconsistent { .. } => ErrorKind::Precondition,
            _ => ErrorKind::Transport,
        }
    }

    /// Check if the remote system rejected the credentials
    pub fn is_auth(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }

    /// Check if the failure points at configuration rather than connectivity
    pub fn is_precondition(&self) -> bool {
        self.kind() == ErrorKind::Precondition
    }

    /// Check if this error means the live session should be discarded
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            NfsError::ConnectionFailed { .. } | NfsError::Io(_)
        )
    }
}

/// Configuration errors, surfaced when a client is built
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse a server URL
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A required option is absent from the option bag
    #[error("Missing option '{key}' for {protocol} file system")]
    MissingOption { key: String, protocol: String },

    /// Pinned host key is not in "<type> <base64>" form
    #[error("Invalid host key '{key}': {reason}")]
    InvalidHostKey { key: String, reason: String },

    /// Credentials do not fit the configured authentication type
    #[error("Credentials do not match authentication type {expected}")]
    CredentialsMismatch { expected: String },

    /// Authentication type unsupported by the protocol
    #[error("{protocol} does not support {auth} authentication")]
    UnsupportedAuth { protocol: String, auth: String },

    /// Protocol compiled out of this build
    #[error("{protocol} support is not enabled. Rebuild with --features {feature}")]
    Unsupported { protocol: String, feature: String },

    /// Configuration file could not be read
    #[error("Cannot read configuration '{path}': {reason}")]
    Unreadable { path: String, reason: String },
}

/// Remote call a failure is reported against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Directory listing
    ReadDir,
    /// Attribute lookup
    Stat,
    /// Opening or reading file content
    Read,
}

impl Operation {
    /// Error for a failure that is neither "not found" nor "permission denied"
    pub fn failed(self, path: &str, reason: impl Into<String>) -> NfsError {
        let path = path.to_string();
        let reason = reason.into();
        match self {
            Operation::ReadDir => NfsError::ReadDirFailed { path, reason },
            Operation::Stat => NfsError::StatFailed { path, reason },
            Operation::Read => NfsError::ReadFailed { path, reason },
        }
    }
}

/// Result type alias for NfsError
pub type NfsResult<T> = std::result::Result<T, NfsError>;
