//! Configuration types for nfs-store
//!
//! This module defines:
//! - File system and file store configuration (loaded from JSON)
//! - Credentials supplied by the caller
//! - Server URL parsing
//! - CLI argument parsing using clap derive macros

pub use crate::error::ConfigError;
use clap::{Parser, Subcommand};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Option bag keys understood by the protocol clients
pub mod options {
    /// NTLM domain for SMB logins
    pub const SAMBA_DOMAIN: &str = "SAMBA_DOMAIN";
    /// Share name for SMB file systems, e.g. "/data"
    pub const SAMBA_SHARE_NAME: &str = "SAMBA_SHARE_NAME";
    /// Pinned SFTP host key in "<type> <base64>" form
    pub const SFTP_SERVER_PUBLIC_KEY: &str = "SFTP_SERVER_PUBLIC_KEY";
    /// iRODS zone name
    pub const IRODS_ZONE: &str = "IRODS_ZONE";
    /// iRODS home collection override
    pub const IRODS_HOME_DIR: &str = "IRODS_HOME_DIR";
}

/// Default connect/read timeout for protocol sessions
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default date rendering for tree nodes
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Regex for parsing server URLs
static SERVER_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: scheme://host:port/path, host:port, host/path, host
    Regex::new(r"^(?:([A-Za-z][A-Za-z0-9+.\-]*)://)?([^:/\s]+)(?::(\d+))?(/\S*)?$")
        .expect("Invalid server URL regex")
});

/// Regex for a pinned host key: "<type> <base64>" with an optional comment
static HOST_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(ssh-rsa|ssh-dss|ssh-ed25519|ecdsa-sha2-nistp(?:256|384|521))\s+([A-Za-z0-9+/]+={0,2})(?:\s+\S.*)?$")
        .expect("Invalid host key regex")
});

/// Remote protocol of a file system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolType {
    /// SSH File Transfer Protocol
    Sftp,
    /// SMB through an explicit NTLM principal and smb:// URLs
    Samba,
    /// SMB2/3 with host, share and share-relative paths
    Smbj,
    /// iRODS data grid
    Irods,
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolType::Sftp => "SFTP",
            ProtocolType::Samba => "SAMBA",
            ProtocolType::Smbj => "SMBJ",
            ProtocolType::Irods => "IRODS",
        };
        f.write_str(name)
    }
}

/// How users authenticate against a file system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthType {
    /// Username and password
    #[default]
    Password,
    /// Username and private key
    Pubkey,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthType::Password => f.write_str("PASSWORD"),
            AuthType::Pubkey => f.write_str("PUBKEY"),
        }
    }
}

/// An administrator-defined remote file system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemConfig {
    /// Identifier of the stored configuration
    #[serde(default)]
    pub id: Option<i64>,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Remote protocol
    pub protocol: ProtocolType,

    /// Authentication type
    #[serde(default)]
    pub auth_type: AuthType,

    /// Base URL or host name
    pub url: String,

    /// Port, overriding any port in the URL
    #[serde(default)]
    pub port: Option<u16>,

    /// Protocol-specific options (see [`options`])
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl FileSystemConfig {
    /// Create a configuration with an empty option bag
    pub fn new(protocol: ProtocolType, url: impl Into<String>) -> Self {
        Self {
            id: None,
            name: String::new(),
            protocol,
            auth_type: AuthType::Password,
            url: url.into(),
            port: None,
            options: BTreeMap::new(),
        }
    }

    /// Set an option, builder style
    pub fn with_option(mut self, key: &str, value: impl Into<String>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// Set the authentication type, builder style
    pub fn with_auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = auth_type;
        self
    }

    /// Look up a non-blank option value
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Look up an option that must be present
    pub fn required_option(&self, key: &str) -> Result<&str, ConfigError> {
        self.option(key).ok_or_else(|| ConfigError::MissingOption {
            key: key.to_string(),
            protocol: self.protocol.to_string(),
        })
    }

    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&text).map_err(|e| match e {
            ConfigError::Unreadable { reason, .. } => ConfigError::Unreadable {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Parse a configuration from a JSON document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Unreadable {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Check that the credentials fit the configured authentication type
    pub fn check_credentials(&self, credentials: &Credentials) -> Result<(), ConfigError> {
        let matches = matches!(
            (self.auth_type, credentials),
            (AuthType::Password, Credentials::Password { .. })
                | (AuthType::Pubkey, Credentials::KeyPair { .. })
        );
        if matches {
            Ok(())
        } else {
            Err(ConfigError::CredentialsMismatch {
                expected: self.auth_type.to_string(),
            })
        }
    }
}

/// A user's saved folder on a file system, used as the logic-path anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStoreConfig {
    /// Identifier of the saved folder
    pub id: i64,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Remote path of the folder
    pub path: String,

    /// File system the folder belongs to
    #[serde(default)]
    pub file_system_id: Option<i64>,
}

impl FileStoreConfig {
    /// Create an anchor folder
    pub fn new(id: i64, path: impl Into<String>) -> Self {
        Self {
            id,
            name: String::new(),
            path: path.into(),
            file_system_id: None,
        }
    }
}

/// Resolved user credentials
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username and password
    Password { username: String, password: String },
    /// Username and PEM private key with optional passphrase
    KeyPair {
        username: String,
        private_key: String,
        passphrase: Option<String>,
    },
}

impl Credentials {
    /// Password credentials
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Key pair credentials
    pub fn key_pair(
        username: impl Into<String>,
        private_key: impl Into<String>,
        passphrase: Option<String>,
    ) -> Self {
        Credentials::KeyPair {
            username: username.into(),
            private_key: private_key.into(),
            passphrase,
        }
    }

    /// The login name
    pub fn username(&self) -> &str {
        match self {
            Credentials::Password { username, .. } | Credentials::KeyPair { username, .. } => {
                username
            }
        }
    }

    /// True when a username and a secret or key are present
    pub fn is_complete(&self) -> bool {
        match self {
            Credentials::Password { username, password } => {
                !username.is_empty() && !password.is_empty()
            }
            Credentials::KeyPair {
                username,
                private_key,
                ..
            } => !username.is_empty() && !private_key.is_empty(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::KeyPair {
                username,
                passphrase,
                ..
            } => f
                .debug_struct("KeyPair")
                .field("username", username)
                .field("private_key", &"<redacted>")
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Transport settings applied to every session a client opens
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Connect and read timeout
    pub timeout: Duration,

    /// chrono format used for tree node dates
    pub date_format: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

/// Parsed server URL components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUrl {
    /// Scheme, lowercased (sftp, smb, https, ...)
    pub scheme: Option<String>,

    /// Server hostname or IP
    pub host: String,

    /// Optional port
    pub port: Option<u16>,

    /// Path after the authority (may be empty)
    pub path: String,
}

impl ServerUrl {
    /// Parse a server URL string
    ///
    /// Accepts formats:
    /// - scheme://host
    /// - scheme://host:port/path
    /// - host
    /// - host:port
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();

        let caps = SERVER_URL_REGEX
            .captures(url)
            .ok_or_else(|| ConfigError::InvalidUrl {
                url: url.to_string(),
                reason: "Expected format: scheme://host[:port][/path]".into(),
            })?;

        let host = caps
            .get(2)
            .map(|m| m.as_str().to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::InvalidUrl {
                url: url.to_string(),
                reason: "Missing host".into(),
            })?;

        let port = match caps.get(3) {
            Some(m) => Some(m.as_str().parse::<u16>().map_err(|_| ConfigError::InvalidUrl {
                url: url.to_string(),
                reason: format!("Invalid port '{}'", m.as_str()),
            })?),
            None => None,
        };

        Ok(Self {
            scheme: caps.get(1).map(|m| m.as_str().to_ascii_lowercase()),
            host,
            port,
            path: caps
                .get(4)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        })
    }

    /// Port from the URL, or the given default
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    /// Format as a connection string for display
    pub fn to_display_string(&self) -> String {
        let scheme = self.scheme.as_deref().unwrap_or("");
        let prefix = if scheme.is_empty() {
            String::new()
        } else {
            format!("{}://", scheme)
        };
        match self.port {
            Some(p) => format!("{}{}:{}{}", prefix, self.host, p, self.path),
            None => format!("{}{}{}", prefix, self.host, self.path),
        }
    }
}

/// Validate a pinned host key and return its (type, base64) parts
pub fn parse_host_key(key: &str) -> Result<(String, String), ConfigError> {
    let caps = HOST_KEY_REGEX
        .captures(key.trim())
        .ok_or_else(|| ConfigError::InvalidHostKey {
            key: key.to_string(),
            reason: "Expected '<key-type> <base64-key>'".into(),
        })?;
    Ok((caps[1].to_string(), caps[2].to_string()))
}

/// Browse and download files on remote file stores
#[derive(Parser, Debug, Clone)]
#[command(
    name = "nfs-store",
    version,
    about = "Browse and download files on SFTP, SMB and iRODS file stores",
    long_about = "Connects to a remote file system described by a JSON configuration\n\
                  and lists, inspects or downloads files through the matching protocol client.",
    after_help = "EXAMPLES:\n    \
        nfs-store -c sftp.json -u alice ls\n    \
        nfs-store -c smb.json -u alice ls /projects --order bydate\n    \
        nfs-store -c irods.json -u rods stat --id 10294\n    \
        nfs-store -c sftp.json -u alice get data/run1.csv -o run1.csv"
)]
pub struct CliArgs {
    /// File system configuration (JSON)
    #[arg(short, long, value_name = "FILE", env = "NFS_STORE_CONFIG")]
    pub config: PathBuf,

    /// Login name
    #[arg(short, long, env = "NFS_STORE_USER")]
    pub username: String,

    /// Password (for PASSWORD file systems)
    #[arg(long, env = "NFS_STORE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Private key file (for PUBKEY file systems)
    #[arg(long, value_name = "FILE")]
    pub key_file: Option<PathBuf>,

    /// Private key passphrase
    #[arg(long, env = "NFS_STORE_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, value_name = "SECS")]
    pub timeout: u64,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Check that a remote path is reachable and readable
    Check {
        /// Remote path (defaults to the current directory)
        #[arg(value_name = "PATH", default_value = "")]
        path: String,
    },

    /// List one level of a remote directory
    Ls {
        /// Remote path (defaults to the current directory)
        #[arg(value_name = "PATH", default_value = "")]
        path: String,

        /// Ordering: byname or bydate
        #[arg(long, default_value = "byname")]
        order: String,

        /// Anchor folder path for logic paths
        #[arg(long, value_name = "PATH", requires = "anchor_id")]
        anchor_path: Option<String>,

        /// Anchor folder id for logic paths
        #[arg(long, value_name = "ID", requires = "anchor_path")]
        anchor_id: Option<i64>,
    },

    /// Show metadata of a remote file or folder
    Stat {
        /// Remote path
        #[arg(value_name = "PATH")]
        path: Option<String>,

        /// Native object id (iRODS)
        #[arg(long, value_name = "ID")]
        id: Option<i64>,

        /// Treat the target as a folder and list its content
        #[arg(long)]
        folder: bool,
    },

    /// Download a remote file
    Get {
        /// Remote path
        #[arg(value_name = "PATH")]
        path: Option<String>,

        /// Native object id (iRODS)
        #[arg(long, value_name = "ID")]
        id: Option<i64>,

        /// Local output file (defaults to the remote file name)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}
