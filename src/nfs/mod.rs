//! Remote file-store access
//!
//! This module provides one capability contract, [`NfsClient`], and a
//! client per remote protocol behind it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 NfsClient (trait)                    │
//! │  - tree listing, file/folder queries, downloads     │
//! │  - identical semantics for every protocol           │
//! └─────────────────────────────────────────────────────┘
//!          │              │               │
//!          ▼              ▼               ▼
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//! │  SftpClient  │ │ CifsClient / │ │ IrodsClient  │
//! │    (ssh2)    │ │  Smb2Client  │ │ (HTTP API)   │
//! │              │ │   (pavao)    │ │              │
//! └──────────────┘ └──────────────┘ └──────────────┘
//!          │              │               │
//!          ▼              ▼               ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                    SessionSlot                       │
//! │  - one live session per client, behind one mutex    │
//! │  - lazy connect, liveness check before every call   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use nfs_store::config::{ClientOptions, Credentials, FileSystemConfig, ProtocolType};
//! use nfs_store::nfs::{create_client, NfsTarget};
//!
//! let config = FileSystemConfig::new(ProtocolType::Sftp, "sftp://files.example.org");
//! let client = create_client(
//!     &config,
//!     Credentials::password("alice", "secret"),
//!     &ClientOptions::default(),
//! )
//! .unwrap();
//!
//! let tree = client.create_file_tree("", "byname", None).unwrap();
//! for node in &tree.nodes {
//!     println!("{} {}", if node.is_folder { "d" } else { "-" }, node.node_path);
//! }
//!
//! let file = client.query_for_nfs_file(&NfsTarget::path("notes.txt")).unwrap();
//! client.close_session();
//! ```

pub mod irods;
#[cfg(feature = "irods")]
pub mod irods_http;
pub mod path;
pub mod session;
pub mod sftp;
pub mod smb;
#[cfg(feature = "sftp")]
pub mod ssh;
pub mod tree;
pub mod types;

pub use irods::{IrodsClient, IrodsConnector, IrodsEntry, IrodsObjectType, IrodsSession};
pub use session::{RemoteSession, SessionSlot};
pub use sftp::{SftpClient, SftpConnector, SftpSession};
pub use smb::{CifsClient, Smb2Client, SmbConnector, SmbLocation, SmbSession};
pub use tree::{build_file_tree, DateFormatter, NfsFileTreeNode, OrderType};
pub use types::{
    EntryType, NfsFileDetails, NfsFolderDetails, NfsResourceDetails, NfsTarget, RemoteEntry,
    ResourceKind,
};

use crate::config::{ClientOptions, ConfigError, Credentials, FileStoreConfig, FileSystemConfig, ProtocolType};
use crate::error::{NfsError, NfsResult};
use tracing::warn;

/// Capability contract shared by every protocol client
///
/// Implementations serialize their own calls: one client instance runs one
/// protocol operation at a time. Distinct instances are independent.
pub trait NfsClient: Send + Sync {
    /// Protocol this client speaks
    fn protocol(&self) -> ProtocolType;

    /// Login name the client was built with
    fn username(&self) -> &str;

    /// True once credentials are established (not necessarily connected)
    fn is_user_logged_in(&self) -> bool;

    /// Connect if needed and check that `path` can be read
    fn try_connect_and_read_target(&self, path: &str) -> NfsResult<()>;

    /// List one level of `path` as a tree node
    ///
    /// An empty path or "." lists the current directory; the returned
    /// root then carries the resolved working directory as its path.
    fn create_file_tree(
        &self,
        path: &str,
        order: &str,
        anchor: Option<&FileStoreConfig>,
    ) -> NfsResult<NfsFileTreeNode>;

    /// Resolve a single file's metadata without opening it
    ///
    /// Zero or several matches are logged and reported as `None`.
    fn query_for_nfs_file(&self, target: &NfsTarget) -> NfsResult<Option<NfsFileDetails>>;

    /// Resolve a single file and open it for reading
    ///
    /// The returned details carry a stream positioned at the start of the
    /// content; closing it is the caller's job.
    fn query_nfs_file_for_download(&self, target: &NfsTarget) -> NfsResult<NfsFileDetails>;

    /// Resolve a folder and one level of its children
    fn query_for_nfs_folder(&self, target: &NfsTarget) -> NfsResult<Option<NfsFolderDetails>>;

    /// Release the live session, channel before session
    ///
    /// Idempotent and safe on a client that never connected.
    fn close_session(&self);

    /// Whether "." resolves to a meaningful home directory
    fn supports_current_dir(&self) -> bool;

    /// Whether paths outside the configured base can be browsed
    fn supports_extra_dirs(&self) -> bool;
}

/// Build a client for a file system configuration and user credentials
///
/// Configuration problems (bad URL, malformed host key, missing options,
/// credentials of the wrong kind) fail here rather than on first use.
pub fn create_client(
    config: &FileSystemConfig,
    credentials: Credentials,
    options: &ClientOptions,
) -> NfsResult<Box<dyn NfsClient>> {
    config.check_credentials(&credentials)?;
    match config.protocol {
        ProtocolType::Sftp => sftp_client(config, credentials, options),
        ProtocolType::Samba => cifs_client(config, credentials, options),
        ProtocolType::Smbj => smb2_client(config, credentials, options),
        ProtocolType::Irods => irods_client(config, credentials, options),
    }
}

#[cfg(feature = "sftp")]
fn sftp_client(
    config: &FileSystemConfig,
    credentials: Credentials,
    options: &ClientOptions,
) -> NfsResult<Box<dyn NfsClient>> {
    let connector = ssh::Ssh2Connector::new(config, credentials.clone(), options)?;
    Ok(Box::new(
        SftpClient::new(connector, &credentials, options).with_file_system_id(config.id),
    ))
}

#[cfg(not(feature = "sftp"))]
fn sftp_client(
    _config: &FileSystemConfig,
    _credentials: Credentials,
    _options: &ClientOptions,
) -> NfsResult<Box<dyn NfsClient>> {
    Err(unsupported(ProtocolType::Sftp, "sftp"))
}

#[cfg(feature = "smb")]
fn cifs_client(
    config: &FileSystemConfig,
    credentials: Credentials,
    options: &ClientOptions,
) -> NfsResult<Box<dyn NfsClient>> {
    let location = SmbLocation::from_config(config)?;
    let auth = smb::NtlmAuth::from_config(config, &credentials)?;
    let connector = smb::native::PavaoConnector::for_urls(&location, &auth);
    Ok(Box::new(
        CifsClient::new(connector, location, auth, options).with_file_system_id(config.id),
    ))
}

#[cfg(not(feature = "smb"))]
fn cifs_client(
    _config: &FileSystemConfig,
    _credentials: Credentials,
    _options: &ClientOptions,
) -> NfsResult<Box<dyn NfsClient>> {
    Err(unsupported(ProtocolType::Samba, "smb"))
}

#[cfg(feature = "smb")]
fn smb2_client(
    config: &FileSystemConfig,
    credentials: Credentials,
    options: &ClientOptions,
) -> NfsResult<Box<dyn NfsClient>> {
    let location = SmbLocation::from_config(config)?;
    let auth = smb::NtlmAuth::from_config(config, &credentials)?;
    let connector = smb::native::PavaoConnector::for_share(&location, &auth);
    Ok(Box::new(
        Smb2Client::new(connector, location, &auth, options).with_file_system_id(config.id),
    ))
}

#[cfg(not(feature = "smb"))]
fn smb2_client(
    _config: &FileSystemConfig,
    _credentials: Credentials,
    _options: &ClientOptions,
) -> NfsResult<Box<dyn NfsClient>> {
    Err(unsupported(ProtocolType::Smbj, "smb"))
}

#[cfg(feature = "irods")]
fn irods_client(
    config: &FileSystemConfig,
    credentials: Credentials,
    options: &ClientOptions,
) -> NfsResult<Box<dyn NfsClient>> {
    let connector = irods_http::IrodsHttpConnector::new(config, credentials.clone(), options)?;
    Ok(Box::new(
        IrodsClient::new(connector, &credentials, options).with_file_system_id(config.id),
    ))
}

#[cfg(not(feature = "irods"))]
fn irods_client(
    _config: &FileSystemConfig,
    _credentials: Credentials,
    _options: &ClientOptions,
) -> NfsResult<Box<dyn NfsClient>> {
    Err(unsupported(ProtocolType::Irods, "irods"))
}

#[allow(dead_code)]
fn unsupported(protocol: ProtocolType, feature: &str) -> NfsError {
    ConfigError::Unsupported {
        protocol: protocol.to_string(),
        feature: feature.to_string(),
    }
    .into()
}

/// The path of a target, for protocols that address by path only
pub(crate) fn target_path(target: &NfsTarget) -> NfsResult<String> {
    match target.path.as_deref() {
        Some(p) if !p.trim().is_empty() => Ok(path::sanitize(p)),
        _ => Err(NfsError::InvalidTarget(format!(
            "{} has no path; this protocol addresses files by path",
            target
        ))),
    }
}

/// Reject a target with neither a path nor an id
pub(crate) fn check_target(target: &NfsTarget) -> NfsResult<()> {
    if target.is_resolvable() {
        Ok(())
    } else {
        Err(NfsError::InvalidTarget(format!(
            "{} has neither a path nor an id",
            target
        )))
    }
}

/// Pick the one entry a lookup is expected to produce
pub(crate) fn single_entry<T>(target: &str, mut entries: Vec<T>) -> NfsResult<T> {
    match entries.len() {
        1 => Ok(entries.remove(0)),
        0 => Err(NfsError::NotFound {
            path: target.to_string(),
        }),
        count => Err(NfsError::Inconsistent {
            target: target.to_string(),
            count,
        }),
    }
}

/// Report a missing or ambiguous lookup as "not found"
pub(crate) fn consistent_query<T>(result: NfsResult<Option<T>>) -> NfsResult<Option<T>> {
    match result {
        Err(NfsError::Inconsistent { target, count }) => {
            warn!(target = %target, count, "Expected exactly one remote entry, treating as not found");
            Ok(None)
        }
        Err(NfsError::NotFound { path }) => {
            warn!(path = %path, "Remote entry not found");
            Ok(None)
        }
        other => other,
    }
}

/// Like [`consistent_query`], but also swallows transport failures
///
/// Rejected credentials still propagate.
// TODO: review whether transport failures should propagate here instead of reading as "not found"
pub(crate) fn resilient_query<T>(target: &NfsTarget, result: NfsResult<Option<T>>) -> NfsResult<Option<T>> {
    match consistent_query(result) {
        Err(e) if e.is_auth() => Err(e),
        Err(e) => {
            warn!(target = %target, error = %e, "Query failed, treating as not found");
            Ok(None)
        }
        found => found,
    }
}
