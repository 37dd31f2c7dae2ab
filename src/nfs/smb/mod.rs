//! SMB clients
//!
//! Two clients share one session contract and one path algebra:
//!
//! - [`CifsClient`] addresses everything through full `smb://` URLs and an
//!   explicit NTLM principal; directory URLs end with '/'.
//! - [`Smb2Client`] connects to a host and share and addresses files by
//!   share-relative backslash paths.
//!
//! UI paths for both are '/'-separated and relative to the configured base
//! folder ([`SmbLocation::after_share_path`]). The libsmbclient-backed
//! connector lives in [`native`] behind the `smb` feature.

pub mod cifs;
pub mod location;
#[cfg(feature = "smb")]
pub mod native;
pub mod smb2;

pub use cifs::CifsClient;
pub use location::SmbLocation;
pub use smb2::Smb2Client;

use crate::config::{options, AuthType, ConfigError, Credentials, FileSystemConfig};
use crate::error::NfsResult;
use crate::nfs::session::RemoteSession;
use crate::nfs::types::RemoteEntry;
use std::fmt;
use std::io::Read;

/// Workgroup used when no domain is configured
pub const DEFAULT_DOMAIN: &str = "WORKGROUP";

/// An open SMB connection
///
/// The meaning of `path` depends on the client: a full URL for
/// [`CifsClient`], a share-relative backslash path for [`Smb2Client`].
pub trait SmbSession: RemoteSession {
    /// Entries of the directory at `path`, unfiltered
    fn list(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>>;

    /// Entries matching `path` itself (normally zero or one)
    fn lookup(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>>;

    /// Open the file at `path` for reading
    fn open(&mut self, path: &str) -> NfsResult<Box<dyn Read + Send>>;
}

/// Opens SMB sessions for one server, share and user
pub trait SmbConnector: Send + Sync {
    type Session: SmbSession;

    /// Server label for logs and errors
    fn server(&self) -> &str;

    /// Connect and authenticate
    fn connect(&self) -> NfsResult<Self::Session>;
}

/// NTLM principal for SMB logins
#[derive(Clone, PartialEq, Eq)]
pub struct NtlmAuth {
    pub domain: String,
    pub username: String,
    pub password: String,
}

impl NtlmAuth {
    pub fn new(
        domain: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Build the principal from the configured domain and password credentials
    ///
    /// SMB supports password logins only.
    pub fn from_config(config: &FileSystemConfig, credentials: &Credentials) -> Result<Self, ConfigError> {
        let password = match (config.auth_type, credentials) {
            (AuthType::Password, Credentials::Password { password, .. }) => password,
            _ => {
                return Err(ConfigError::UnsupportedAuth {
                    protocol: config.protocol.to_string(),
                    auth: config.auth_type.to_string(),
                })
            }
        };
        let domain = config.option(options::SAMBA_DOMAIN).unwrap_or(DEFAULT_DOMAIN);
        Ok(Self::new(domain, credentials.username(), password.as_str()))
    }
}

impl fmt::Debug for NtlmAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtlmAuth")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolType;

    #[test]
    fn test_ntlm_from_config() {
        let config = FileSystemConfig::new(ProtocolType::Samba, "smb://nas/share")
            .with_option(options::SAMBA_DOMAIN, "CAMPUS");
        let auth = NtlmAuth::from_config(&config, &Credentials::password("alice", "pw")).unwrap();
        assert_eq!(auth, NtlmAuth::new("CAMPUS", "alice", "pw"));
        assert!(!format!("{:?}", auth).contains("pw\""));

        let config = FileSystemConfig::new(ProtocolType::Smbj, "smb://nas/share");
        let auth = NtlmAuth::from_config(&config, &Credentials::password("bob", "pw")).unwrap();
        assert_eq!(auth.domain, DEFAULT_DOMAIN);
    }

    #[test]
    fn test_ntlm_rejects_key_pairs() {
        let config = FileSystemConfig::new(ProtocolType::Samba, "smb://nas/share")
            .with_auth_type(AuthType::Pubkey);
        let err = NtlmAuth::from_config(&config, &Credentials::key_pair("alice", "key", None))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnsupportedAuth { .. }));
    }
}
