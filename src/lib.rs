//! nfs-store - Remote File-Store Client Layer
//!
//! Protocol clients that let an application browse, inspect and download
//! files on administrator-configured remote file systems, behind one
//! protocol-neutral contract.
//!
//! # Features
//!
//! - **One Contract**: [`nfs::NfsClient`] covers tree listing, file and
//!   folder queries and downloads with identical semantics per protocol.
//!
//! - **Protocols**: SFTP (ssh2), SMB through URLs or share-relative paths
//!   (libsmbclient via pavao) and iRODS (HTTP API via reqwest).
//!
//! - **Session Lifecycle**: each client owns one lazily opened session,
//!   checks it before every operation, reconnects inline and serializes
//!   its own calls.
//!
//! - **UI-Ready Output**: tree nodes and resource details are plain
//!   serde-serializable structs with formatted sizes, dates and paths
//!   relative to a user's anchor folder.
//!
//! # Example
//!
//! ```bash
//! # List the home directory of an SFTP file system
//! nfs-store -c sftp.json -u alice ls
//!
//! # Newest first, with logic paths relative to a saved folder
//! nfs-store -c smb.json -u alice ls /projects --order bydate --anchor-path /projects --anchor-id 4
//!
//! # Download an iRODS data object by catalog id
//! nfs-store -c irods.json -u rods get --id 10294 -o result.csv
//! ```

pub mod config;
pub mod error;
pub mod nfs;
pub mod progress;

pub use config::{ClientOptions, Credentials, FileStoreConfig, FileSystemConfig, ProtocolType};
pub use error::{ConfigError, ErrorKind, NfsError, NfsResult};
pub use nfs::{create_client, NfsClient, NfsFileTreeNode, NfsTarget};
