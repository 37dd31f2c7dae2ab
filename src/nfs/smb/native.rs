//! libsmbclient-backed SMB sessions (pavao)
//!
//! One connector serves both SMB clients; [`PathStyle`] decides how the
//! paths handed to a session are turned into libsmbclient paths.

use crate::error::{NfsError, NfsResult, Operation};
use crate::nfs::path::{file_name, parent_path};
use crate::nfs::session::RemoteSession;
use crate::nfs::smb::location::{decode_segment, encode_segment};
use crate::nfs::smb::{NtlmAuth, SmbConnector, SmbLocation, SmbSession};
use crate::nfs::types::{EntryType, RemoteEntry};
use pavao::{SmbClient, SmbCredentials, SmbDirentType, SmbOpenOptions, SmbOptions};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::time::UNIX_EPOCH;
use tracing::debug;

/// How session paths are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    /// Full `smb://host/share/...` URLs
    Url,
    /// Share-relative backslash paths
    ShareRelative,
}

/// Opens libsmbclient contexts for one server
pub struct PavaoConnector {
    server: String,
    location: SmbLocation,
    auth: NtlmAuth,
    style: PathStyle,
}

impl PavaoConnector {
    /// Connector for URL-addressed sessions
    pub fn for_urls(location: &SmbLocation, auth: &NtlmAuth) -> Self {
        Self::new(location, auth, PathStyle::Url)
    }

    /// Connector for sessions bound to the configured share
    pub fn for_share(location: &SmbLocation, auth: &NtlmAuth) -> Self {
        Self::new(location, auth, PathStyle::ShareRelative)
    }

    fn new(location: &SmbLocation, auth: &NtlmAuth, style: PathStyle) -> Self {
        Self {
            server: location.server_url(),
            location: location.clone(),
            auth: auth.clone(),
            style,
        }
    }
}

impl SmbConnector for PavaoConnector {
    type Session = PavaoSession;

    fn server(&self) -> &str {
        &self.server
    }

    fn connect(&self) -> NfsResult<PavaoSession> {
        let share = match self.style {
            PathStyle::Url => String::new(),
            PathStyle::ShareRelative => format!("/{}", self.location.share_name()),
        };
        debug!(
            "Connecting to {}{} as {}\\{}",
            self.server, share, self.auth.domain, self.auth.username
        );

        let credentials = SmbCredentials::default()
            .server(self.server.as_str())
            .share(share.as_str())
            .username(self.auth.username.as_str())
            .password(self.auth.password.as_str())
            .workgroup(self.auth.domain.as_str());
        let client = SmbClient::new(credentials, SmbOptions::default().one_share_per_server(true))
            .map_err(|e| NfsError::ConnectionFailed {
                server: self.server.clone(),
                reason: e.to_string(),
            })?;

        let mut session = PavaoSession {
            client: Some(client),
            location: self.location.clone(),
            style: self.style,
            server: self.server.clone(),
            broken: false,
        };

        // libsmbclient authenticates lazily; list the base folder now
        let base = match self.style {
            PathStyle::Url => self.location.url_for(".", true),
            PathStyle::ShareRelative => self.location.remote_path_without_share_name("."),
        };
        if let Err(e) = session.list(&base) {
            session.close();
            return Err(match e {
                NfsError::PermissionDenied { .. } => NfsError::Auth {
                    server: self.server.clone(),
                    username: self.auth.username.clone(),
                    reason: "Access denied".into(),
                },
                NfsError::ReadDirFailed { reason, .. } => NfsError::ConnectionFailed {
                    server: self.server.clone(),
                    reason,
                },
                other => other,
            });
        }
        Ok(session)
    }
}

/// A libsmbclient context
pub struct PavaoSession {
    client: Option<SmbClient>,
    location: SmbLocation,
    style: PathStyle,
    server: String,
    broken: bool,
}

// SAFETY: the libsmbclient context is only used by one thread at a time.
// Sessions live inside a SessionSlot whose mutex is held for every call.
unsafe impl Send for PavaoSession {}

impl PavaoSession {
    fn client(&self) -> NfsResult<&SmbClient> {
        self.client.as_ref().ok_or_else(|| NfsError::ConnectionFailed {
            server: self.server.clone(),
            reason: "SMB context is closed".into(),
        })
    }

    /// libsmbclient path ('/'-separated, leading '/', percent-encoded) of a
    /// session path
    fn smb_path(&self, path: &str) -> String {
        let raw = match self.style {
            PathStyle::Url => self.location.path_of_url(path).to_string(),
            PathStyle::ShareRelative => path
                .split(['\\', '/'])
                .filter(|s| !s.is_empty())
                .map(encode_segment)
                .collect::<Vec<_>>()
                .join("/"),
        };
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    /// Translate a pavao error
    ///
    /// libsmbclient reports dropped connections as generic failures, so
    /// anything but "not found" or "permission denied" marks the session
    /// broken.
    fn fail(&mut self, path: &str, err: pavao::SmbError, op: Operation) -> NfsError {
        let err = classify(err.to_string(), path, op);
        if !matches!(err, NfsError::NotFound { .. } | NfsError::PermissionDenied { .. }) {
            self.broken = true;
        }
        err
    }

    fn entry(&self, smb_path: &str, name: String, entry_type: EntryType) -> RemoteEntry {
        let mut entry = RemoteEntry {
            name,
            entry_type,
            size: 0,
            modified_millis: None,
            nfs_id: None,
        };
        if let Some(Ok(stat)) = self.client.as_ref().map(|c| c.stat(smb_path)) {
            if !entry_type.is_folder_like() {
                entry.size = stat.size;
            }
            entry.modified_millis = stat
                .modified
                .duration_since(UNIX_EPOCH)
                .ok()
                .and_then(|d| i64::try_from(d.as_millis()).ok());
        }
        entry
    }
}

fn classify(reason: String, path: &str, op: Operation) -> NfsError {
    let lower = reason.to_ascii_lowercase();
    if lower.contains("no such file") || lower.contains("not found") {
        NfsError::NotFound {
            path: path.to_string(),
        }
    } else if lower.contains("permission denied") || lower.contains("access denied") {
        NfsError::PermissionDenied {
            path: path.to_string(),
        }
    } else {
        op.failed(path, reason)
    }
}

/// Copy a remote file into an anonymous temp file, rewound for reading
fn spool(reader: &mut impl Read) -> io::Result<File> {
    let mut file = tempfile::tempfile()?;
    io::copy(reader, &mut file)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

fn entry_type(kind: SmbDirentType) -> Option<EntryType> {
    match kind {
        SmbDirentType::Dir => Some(EntryType::Directory),
        SmbDirentType::File => Some(EntryType::File),
        SmbDirentType::Link => Some(EntryType::Symlink),
        _ => None,
    }
}

impl RemoteSession for PavaoSession {
    fn is_alive(&mut self) -> bool {
        !self.broken && self.client.is_some()
    }

    fn close(&mut self) {
        drop(self.client.take());
    }
}

impl SmbSession for PavaoSession {
    fn list(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>> {
        let smb_path = self.smb_path(path);
        let result = self.client()?.list_dir(smb_path.as_str());
        let dirents = result.map_err(|e| self.fail(path, e, Operation::ReadDir))?;

        Ok(dirents
            .iter()
            .filter_map(|d| {
                let kind = entry_type(d.get_type())?;
                let child = format!("{}/{}", smb_path.trim_end_matches('/'), encode_segment(d.name()));
                Some(self.entry(&child, d.name().to_string(), kind))
            })
            .collect())
    }

    fn lookup(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>> {
        let smb_path = self.smb_path(path);
        let name = decode_segment(file_name(&smb_path)).into_owned();
        let parent = parent_path(&smb_path).unwrap_or_else(|| "/".to_string());

        let result = self.client()?.list_dir(parent.as_str());
        let dirents = match result {
            Ok(d) => d,
            Err(e) => {
                return match self.fail(path, e, Operation::Stat) {
                    NfsError::NotFound { .. } => Ok(Vec::new()),
                    other => Err(other),
                }
            }
        };

        Ok(dirents
            .iter()
            .filter(|d| d.name() == name)
            .filter_map(|d| Some(self.entry(&smb_path, name.clone(), entry_type(d.get_type())?)))
            .collect())
    }

    fn open(&mut self, path: &str) -> NfsResult<Box<dyn Read + Send>> {
        let smb_path = self.smb_path(path);
        // SmbFile borrows the context, so it is spooled to disk before the lock is released
        let result = self
            .client()?
            .open_with(smb_path.as_str(), SmbOpenOptions::default().read(true))
            .map(|mut file| spool(&mut file));
        match result {
            Ok(Ok(file)) => Ok(Box::new(file)),
            Ok(Err(e)) => Err(Operation::Read.failed(path, e.to_string())),
            Err(e) => Err(self.fail(path, e, Operation::Read)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(style: PathStyle) -> PavaoSession {
        PavaoSession {
            client: None,
            location: SmbLocation::parse("smb://nas/lab/projects", None).unwrap(),
            style,
            server: "smb://nas".into(),
            broken: false,
        }
    }

    #[test]
    fn test_smb_paths() {
        let urls = session(PathStyle::Url);
        assert_eq!(urls.smb_path("smb://nas/lab/projects/a/"), "/lab/projects/a");

        let share = session(PathStyle::ShareRelative);
        assert_eq!(share.smb_path("projects\\a\\b.txt"), "/projects/a/b.txt");
        assert_eq!(share.smb_path(""), "/");
        assert_eq!(
            share.smb_path("projects\\raw\\50% done.txt"),
            "/projects/raw/50%25%20done.txt"
        );

        let location = SmbLocation::parse("smb://nas/lab/projects", None).unwrap();
        let url = location.url_for("raw/50% done.txt", false);
        assert_eq!(urls.smb_path(&url), "/lab/projects/raw/50%25%20done.txt");
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            classify("No such file or directory".into(), "a", Operation::Stat),
            NfsError::NotFound { .. }
        ));
        assert!(matches!(
            classify("Permission denied".into(), "a", Operation::ReadDir),
            NfsError::PermissionDenied { .. }
        ));
        assert!(matches!(
            classify("Connection reset by peer".into(), "a", Operation::ReadDir),
            NfsError::ReadDirFailed { .. }
        ));
        assert!(matches!(
            classify("Input/output error".into(), "a/b.txt", Operation::Read),
            NfsError::ReadFailed { .. }
        ));
    }

    #[test]
    fn test_spool_reads_back_full_content() {
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut file = spool(&mut content.as_slice()).unwrap();

        let mut read_back = Vec::new();
        file.read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back.len(), 100_000);
        assert_eq!(read_back, content);
    }

    #[test]
    fn test_closed_session() {
        let mut s = session(PathStyle::Url);
        s.close();
        assert!(!s.is_alive());
        s.close();
        assert!(s.list("smb://nas/lab/").is_err());
    }
}
