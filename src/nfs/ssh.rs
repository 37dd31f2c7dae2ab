//! ssh2-backed SFTP sessions
//!
//! libssh2 sessions are blocking and must not be used from two threads at
//! once; [`crate::nfs::SessionSlot`] guarantees that for every client.

use crate::config::{options, parse_host_key, ClientOptions, ConfigError, Credentials, FileSystemConfig, ServerUrl};
use crate::error::{NfsError, NfsResult, Operation};
use crate::nfs::path::file_name;
use crate::nfs::session::RemoteSession;
use crate::nfs::sftp::{SftpConnector, SftpSession};
use crate::nfs::types::{EntryType, RemoteEntry};
use ssh2::{CheckResult, ErrorCode, FileStat, KnownHostFileKind, Session, Sftp};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Keepalive interval used by the liveness check
const KEEPALIVE_SECS: u32 = 30;

/// SFTP status codes (LIBSSH2_FX_*)
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;

/// libssh2 session error codes that mean the transport is gone
const SOCKET_ERRORS: [i32; 5] = [
    -7,  // LIBSSH2_ERROR_SOCKET_SEND
    -9,  // LIBSSH2_ERROR_TIMEOUT
    -13, // LIBSSH2_ERROR_SOCKET_DISCONNECT
    -30, // LIBSSH2_ERROR_SOCKET_TIMEOUT
    -43, // LIBSSH2_ERROR_SOCKET_RECV
];

/// libssh2 session error codes raised by a rejected login
const AUTH_ERRORS: [i32; 4] = [
    -15, // LIBSSH2_ERROR_PASSWORD_EXPIRED
    -16, // LIBSSH2_ERROR_FILE (unusable private key or passphrase)
    -18, // LIBSSH2_ERROR_AUTHENTICATION_FAILED
    -19, // LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED
];

/// Opens ssh2 sessions for one server and user
pub struct Ssh2Connector {
    host: String,
    port: u16,
    server: String,
    credentials: Credentials,
    host_key: Option<String>,
    timeout: Duration,
}

impl Ssh2Connector {
    /// Validate the configuration and build a connector
    ///
    /// A pinned host key that is not in "<type> <base64>" form is rejected
    /// here, before any connection is attempted.
    pub fn new(
        config: &FileSystemConfig,
        credentials: Credentials,
        options: &ClientOptions,
    ) -> Result<Self, ConfigError> {
        let url = ServerUrl::parse(&config.url)?;
        if let Some(scheme) = url.scheme.as_deref() {
            if scheme != "sftp" && scheme != "ssh" {
                return Err(ConfigError::InvalidUrl {
                    url: config.url.clone(),
                    reason: format!("Unexpected scheme '{}' for SFTP", scheme),
                });
            }
        }
        config.check_credentials(&credentials)?;

        let host_key = match config.option(options::SFTP_SERVER_PUBLIC_KEY) {
            Some(key) => {
                parse_host_key(key)?;
                Some(key.to_string())
            }
            None => None,
        };

        let port = config.port.unwrap_or(url.port_or(DEFAULT_SSH_PORT));
        Ok(Self {
            server: format!("{}:{}", url.host, port),
            host: url.host,
            port,
            credentials,
            host_key,
            timeout: options.timeout,
        })
    }

    fn open_tcp(&self) -> NfsResult<TcpStream> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.connection_failed(e.to_string()))?
            .next()
            .ok_or_else(|| self.connection_failed("Host did not resolve".into()))?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| self.connection_failed(e.to_string()))?;
        tcp.set_read_timeout(Some(self.timeout))?;
        tcp.set_write_timeout(Some(self.timeout))?;
        Ok(tcp)
    }

    /// Compare the server key against the pinned one, if any
    fn verify_host_key(&self, session: &Session) -> NfsResult<()> {
        let Some(pinned) = &self.host_key else {
            return Ok(());
        };

        let mismatch = || NfsError::HostKeyMismatch {
            server: self.server.clone(),
        };
        let (key, _) = session.host_key().ok_or_else(mismatch)?;

        // known_hosts entries for non-default ports use "[host]:port"
        let host_entry = if self.port == DEFAULT_SSH_PORT {
            self.host.clone()
        } else {
            format!("[{}]:{}", self.host, self.port)
        };

        let mut known = session
            .known_hosts()
            .map_err(|e| NfsError::Protocol(e.message().to_string()))?;
        known
            .read_str(&format!("{} {}", host_entry, pinned), KnownHostFileKind::OpenSSH)
            .map_err(|e| ConfigError::InvalidHostKey {
                key: pinned.clone(),
                reason: e.message().to_string(),
            })?;

        match known.check_port(&self.host, self.port, key) {
            CheckResult::Match => Ok(()),
            _ => Err(mismatch()),
        }
    }

    fn authenticate(&self, session: &Session) -> NfsResult<()> {
        let username = self.credentials.username();
        let result = match &self.credentials {
            Credentials::Password { password, .. } => session.userauth_password(username, password),
            Credentials::KeyPair {
                private_key,
                passphrase,
                ..
            } => session.userauth_pubkey_memory(username, None, private_key, passphrase.as_deref()),
        };

        let auth_failed = |reason: String| NfsError::Auth {
            server: self.server.clone(),
            username: username.to_string(),
            reason,
        };

        match result {
            Ok(()) if session.authenticated() => Ok(()),
            Ok(()) => Err(auth_failed("Server did not accept the credentials".into())),
            Err(e) => match e.code() {
                ErrorCode::Session(code) if AUTH_ERRORS.contains(&code) => {
                    Err(auth_failed(e.message().to_string()))
                }
                _ => Err(self.connection_failed(e.message().to_string())),
            },
        }
    }

    fn connection_failed(&self, reason: String) -> NfsError {
        NfsError::ConnectionFailed {
            server: self.server.clone(),
            reason,
        }
    }
}

impl SftpConnector for Ssh2Connector {
    type Session = Ssh2Session;

    fn server(&self) -> &str {
        &self.server
    }

    fn connect(&self) -> NfsResult<Ssh2Session> {
        debug!("Connecting to {} as {}", self.server, self.credentials.username());
        let tcp = self.open_tcp()?;

        let mut session = Session::new().map_err(|e| self.connection_failed(e.message().to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session
            .handshake()
            .map_err(|e| self.connection_failed(e.message().to_string()))?;

        self.verify_host_key(&session)?;
        self.authenticate(&session)?;
        session.set_keepalive(true, KEEPALIVE_SECS);

        let sftp = session
            .sftp()
            .map_err(|e| self.connection_failed(e.message().to_string()))?;

        Ok(Ssh2Session {
            session,
            sftp: Some(sftp),
            server: self.server.clone(),
            broken: false,
        })
    }
}

/// An authenticated ssh2 session with an open SFTP channel
pub struct Ssh2Session {
    session: Session,
    sftp: Option<Sftp>,
    server: String,
    broken: bool,
}

impl Ssh2Session {
    fn channel(&self) -> NfsResult<&Sftp> {
        self.sftp.as_ref().ok_or_else(|| NfsError::ConnectionFailed {
            server: self.server.clone(),
            reason: "SFTP channel is closed".into(),
        })
    }

    /// Translate an ssh2 error and mark the session broken on transport loss
    fn fail(&mut self, err: ssh2::Error, path: &str, op: Operation) -> NfsError {
        let err = translate_error(err, path, &self.server, op);
        if err.should_reconnect() {
            self.broken = true;
        }
        err
    }
}

impl RemoteSession for Ssh2Session {
    fn is_alive(&mut self) -> bool {
        !self.broken && self.sftp.is_some() && self.session.keepalive_send().is_ok()
    }

    fn close(&mut self) {
        // Channel first, then the session
        drop(self.sftp.take());
        if let Err(e) = self.session.disconnect(None, "Closing session", None) {
            debug!("Disconnect from {} failed: {}", self.server, e);
        }
    }
}

impl SftpSession for Ssh2Session {
    fn realpath(&mut self, path: &str) -> NfsResult<String> {
        let result = self.channel()?.realpath(Path::new(path));
        result
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|e| self.fail(e, path, Operation::Stat))
    }

    fn list(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>> {
        let result = self.channel()?.readdir(Path::new(path));
        let entries = result.map_err(|e| self.fail(e, path, Operation::ReadDir))?;
        debug!("readdir {} returned {} entries", path, entries.len());

        Ok(entries
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_string_lossy().into_owned();
                Some(entry_from_stat(name, &stat))
            })
            .collect())
    }

    fn lookup(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>> {
        let result = self.channel()?.stat(Path::new(path));
        match result {
            Ok(stat) => Ok(vec![entry_from_stat(file_name(path).to_string(), &stat)]),
            Err(e) if matches!(e.code(), ErrorCode::SFTP(FX_NO_SUCH_FILE)) => Ok(Vec::new()),
            Err(e) => Err(self.fail(e, path, Operation::Stat)),
        }
    }

    fn open(&mut self, path: &str) -> NfsResult<Box<dyn Read + Send>> {
        let result = self.channel()?.open(Path::new(path));
        let file = result.map_err(|e| self.fail(e, path, Operation::Read))?;
        Ok(Box::new(file))
    }
}

/// Convert an SFTP attribute block to a listing entry
fn entry_from_stat(name: String, stat: &FileStat) -> RemoteEntry {
    let entry_type = match stat.perm {
        Some(mode) => EntryType::from_mode(mode),
        None if stat.is_dir() => EntryType::Directory,
        None => EntryType::File,
    };
    RemoteEntry {
        name,
        entry_type,
        size: if entry_type.is_folder_like() { 0 } else { stat.size.unwrap_or(0) },
        modified_millis: stat
            .mtime
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| secs * 1000),
        nfs_id: None,
    }
}

/// Convert ssh2 errors to NfsError
fn translate_error(err: ssh2::Error, path: &str, server: &str, op: Operation) -> NfsError {
    match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) => NfsError::NotFound {
            path: path.to_string(),
        },
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => NfsError::PermissionDenied {
            path: path.to_string(),
        },
        ErrorCode::Session(code) if SOCKET_ERRORS.contains(&code) => NfsError::ConnectionFailed {
            server: server.to_string(),
            reason: err.message().to_string(),
        },
        _ => op.failed(path, err.message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolType;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";

    fn config(url: &str) -> FileSystemConfig {
        FileSystemConfig::new(ProtocolType::Sftp, url)
    }

    #[test]
    fn test_connector_from_config() {
        let connector = Ssh2Connector::new(
            &config("sftp://files.example.org:2222").with_option(options::SFTP_SERVER_PUBLIC_KEY, KEY),
            Credentials::password("alice", "pw"),
            &ClientOptions::default(),
        )
        .unwrap();
        assert_eq!(connector.server(), "files.example.org:2222");
        assert_eq!(connector.host_key.as_deref(), Some(KEY));
    }

    #[test]
    fn test_port_override() {
        let mut cfg = config("files.example.org");
        cfg.port = Some(8022);
        let connector =
            Ssh2Connector::new(&cfg, Credentials::password("alice", "pw"), &ClientOptions::default())
                .unwrap();
        assert_eq!(connector.port, 8022);
    }

    #[test]
    fn test_malformed_host_key_rejected() {
        let err = Ssh2Connector::new(
            &config("files.example.org").with_option(options::SFTP_SERVER_PUBLIC_KEY, "garbage"),
            Credentials::password("alice", "pw"),
            &ClientOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::InvalidHostKey { .. }));
    }

    #[test]
    fn test_wrong_scheme_rejected() {
        assert!(Ssh2Connector::new(
            &config("https://files.example.org"),
            Credentials::password("alice", "pw"),
            &ClientOptions::default(),
        )
        .is_err());
    }

    #[test]
    fn test_translate_error() {
        let server = "files.example.org:22";
        let missing = ssh2::Error::new(ErrorCode::SFTP(FX_NO_SUCH_FILE), "No such file");
        assert!(matches!(
            translate_error(missing, "/a", server, Operation::Stat),
            NfsError::NotFound { .. }
        ));

        let dropped = ssh2::Error::new(ErrorCode::Session(-13), "Disconnected");
        assert!(translate_error(dropped, "/a", server, Operation::ReadDir).should_reconnect());

        // SSH_FX_FAILURE
        let failure = ssh2::Error::new(ErrorCode::SFTP(4), "Failure");
        assert!(matches!(
            translate_error(failure, "/data", server, Operation::ReadDir),
            NfsError::ReadDirFailed { .. }
        ));
        let failure = ssh2::Error::new(ErrorCode::SFTP(4), "Failure");
        assert!(matches!(
            translate_error(failure, "/data/a", server, Operation::Stat),
            NfsError::StatFailed { .. }
        ));
    }

    #[test]
    fn test_entry_from_stat() {
        let stat = FileStat {
            size: Some(4096),
            uid: None,
            gid: None,
            perm: Some(0o040755),
            atime: None,
            mtime: Some(1_700_000_000),
        };
        let entry = entry_from_stat("data".into(), &stat);
        assert!(entry.is_folder());
        assert_eq!(entry.size, 0);
        assert_eq!(entry.modified_millis, Some(1_700_000_000_000));

        let stat = FileStat {
            perm: Some(0o100644),
            ..stat
        };
        let entry = entry_from_stat("a.txt".into(), &stat);
        assert!(!entry.is_folder());
        assert_eq!(entry.size, 4096);
    }
}
