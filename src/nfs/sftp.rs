//! SFTP client
//!
//! [`SftpClient`] implements [`NfsClient`] over any [`SftpConnector`]. The
//! ssh2-backed connector lives in [`crate::nfs::ssh`]; tests plug in fakes.

use crate::config::{ClientOptions, Credentials, FileStoreConfig, ProtocolType};
use crate::error::{NfsError, NfsResult};
use crate::nfs::path::{canonical, filter_listing, is_current_dir, parent_path, sanitize};
use crate::nfs::session::{RemoteSession, SessionSlot};
use crate::nfs::tree::{build_file_tree, DateFormatter, NfsFileTreeNode, OrderType};
use crate::nfs::types::{NfsFileDetails, NfsFolderDetails, NfsResourceDetails, NfsTarget, RemoteEntry};
use crate::nfs::{consistent_query, resilient_query, single_entry, target_path, NfsClient};
use std::io::Read;
use tracing::debug;

/// An open SSH session with its SFTP channel
pub trait SftpSession: RemoteSession {
    /// Absolute form of `path`; "." gives the working directory
    fn realpath(&mut self, path: &str) -> NfsResult<String>;

    /// Entries of the directory at `path`, unfiltered
    fn list(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>>;

    /// Entries matching `path` itself (normally zero or one)
    fn lookup(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>>;

    /// Open the file at `path` for reading
    fn open(&mut self, path: &str) -> NfsResult<Box<dyn Read + Send>>;
}

/// Opens SFTP sessions for one server and user
pub trait SftpConnector: Send + Sync {
    type Session: SftpSession;

    /// Server label for logs and errors
    fn server(&self) -> &str;

    /// Connect, verify the host key, authenticate and open the channel
    fn connect(&self) -> NfsResult<Self::Session>;
}

/// SFTP implementation of [`NfsClient`]
pub struct SftpClient<C: SftpConnector> {
    connector: C,
    username: String,
    logged_in: bool,
    file_system_id: Option<i64>,
    formatter: DateFormatter,
    slot: SessionSlot<C::Session>,
}

impl<C: SftpConnector> SftpClient<C> {
    /// Create a client; no connection is made until the first operation
    pub fn new(connector: C, credentials: &Credentials, options: &ClientOptions) -> Self {
        let slot = SessionSlot::new(connector.server());
        Self {
            connector,
            username: credentials.username().to_string(),
            logged_in: credentials.is_complete(),
            file_system_id: None,
            formatter: DateFormatter::new(options.date_format.clone()),
            slot,
        }
    }

    /// Tag resolved resources with the owning file system id
    pub fn with_file_system_id(mut self, id: Option<i64>) -> Self {
        self.file_system_id = id;
        self
    }

    fn with_session<R>(&self, op: impl FnOnce(&mut C::Session) -> NfsResult<R>) -> NfsResult<R> {
        self.slot.with_session(|| self.connector.connect(), op)
    }

    fn details(&self, entry: &RemoteEntry, full_path: &str) -> NfsResourceDetails {
        let mut details =
            NfsResourceDetails::from_entry(entry, full_path.to_string(), parent_path(full_path));
        details.file_system_id = self.file_system_id;
        details
    }

    fn find_file(&self, path: &str) -> NfsResult<Option<NfsFileDetails>> {
        let entry = single_entry(path, self.with_session(|s| s.lookup(path))?)?;
        if entry.is_folder() {
            debug!("{} is a folder, not a file", path);
            return Ok(None);
        }
        Ok(Some(NfsFileDetails::new(self.details(&entry, path))))
    }

    fn find_folder(&self, path: &str) -> NfsResult<Option<NfsFolderDetails>> {
        let (entry, children) = self.with_session(|s| {
            let entry = single_entry(path, s.lookup(path)?)?;
            if !entry.is_folder() {
                return Ok((entry, Vec::new()));
            }
            let children = s.list(path)?;
            Ok((entry, children))
        })?;

        if !entry.is_folder() {
            debug!("{} is a file, not a folder", path);
            return Ok(None);
        }

        let mut folder = NfsFolderDetails::new(self.details(&entry, path));
        for child in filter_listing(children) {
            let child_path = canonical(&child.name, path);
            folder.add_content(self.details(&child, &child_path));
        }
        Ok(Some(folder))
    }
}

impl<C: SftpConnector> NfsClient for SftpClient<C> {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Sftp
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn is_user_logged_in(&self) -> bool {
        self.logged_in
    }

    fn try_connect_and_read_target(&self, path: &str) -> NfsResult<()> {
        let path = sanitize(path);
        self.with_session(|s| s.list(&path).map(|_| ()))
    }

    fn create_file_tree(
        &self,
        path: &str,
        order: &str,
        anchor: Option<&FileStoreConfig>,
    ) -> NfsResult<NfsFileTreeNode> {
        let listing_path = sanitize(path);
        let (root_path, entries) = self.with_session(|s| {
            let root_path = if is_current_dir(&listing_path) {
                s.realpath(&listing_path)?
            } else {
                listing_path.clone()
            };
            Ok((root_path, s.list(&listing_path)?))
        })?;

        let entries = filter_listing(entries);
        debug!("Listed {} entries under {}", entries.len(), root_path);

        Ok(build_file_tree(
            &root_path,
            &listing_path,
            &entries,
            OrderType::parse(order),
            anchor,
            &self.formatter,
        ))
    }

    fn query_for_nfs_file(&self, target: &NfsTarget) -> NfsResult<Option<NfsFileDetails>> {
        let path = target_path(target)?;
        resilient_query(target, self.find_file(&path))
    }

    fn query_nfs_file_for_download(&self, target: &NfsTarget) -> NfsResult<NfsFileDetails> {
        let path = target_path(target)?;
        let (entry, stream) = self.with_session(|s| {
            let entry = single_entry(&path, s.lookup(&path)?)?;
            if entry.is_folder() {
                return Err(NfsError::InvalidTarget(format!("{} is a folder", path)));
            }
            let stream = s.open(&path)?;
            Ok((entry, stream))
        })?;

        debug!("Opened {} for download ({} bytes)", path, entry.size);
        Ok(NfsFileDetails::new(self.details(&entry, &path)).with_stream(stream))
    }

    fn query_for_nfs_folder(&self, target: &NfsTarget) -> NfsResult<Option<NfsFolderDetails>> {
        let path = target_path(target)?;
        consistent_query(self.find_folder(&path))
    }

    fn close_session(&self) {
        self.slot.close();
    }

    fn supports_current_dir(&self) -> bool {
        true
    }

    fn supports_extra_dirs(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeServer {
        connects: AtomicUsize,
        closes: AtomicUsize,
    }

    struct FakeConnector {
        server: Arc<FakeServer>,
        reject_login: bool,
    }

    struct FakeSession {
        server: Arc<FakeServer>,
    }

    impl RemoteSession for FakeSession {
        fn is_alive(&mut self) -> bool {
            true
        }

        fn close(&mut self) {
            self.server.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SftpSession for FakeSession {
        fn realpath(&mut self, path: &str) -> NfsResult<String> {
            Ok(if path == "." { "/home/alice".into() } else { path.into() })
        }

        fn list(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>> {
            match path {
                "." | "/home/alice" => Ok(vec![
                    RemoteEntry::directory(".", None),
                    RemoteEntry::directory("..", None),
                    RemoteEntry::file(".profile", 10, None),
                    RemoteEntry::directory("data", Some(1_700_000_000_000)),
                    RemoteEntry::file("notes.txt", 42, Some(1_600_000_000_000)),
                ]),
                _ => Err(NfsError::NotFound { path: path.into() }),
            }
        }

        fn lookup(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>> {
            match path {
                "notes.txt" => Ok(vec![RemoteEntry::file("notes.txt", 42, None)]),
                "data" | "/home/alice" => Ok(vec![RemoteEntry::directory("data", None)]),
                "dup.txt" => Ok(vec![
                    RemoteEntry::file("dup.txt", 1, None),
                    RemoteEntry::file("dup.txt", 1, None),
                ]),
                _ => Ok(vec![]),
            }
        }

        fn open(&mut self, _path: &str) -> NfsResult<Box<dyn Read + Send>> {
            Ok(Box::new(Cursor::new(b"hello".to_vec())))
        }
    }

    impl SftpConnector for FakeConnector {
        type Session = FakeSession;

        fn server(&self) -> &str {
            "fake"
        }

        fn connect(&self) -> NfsResult<FakeSession> {
            self.server.connects.fetch_add(1, Ordering::SeqCst);
            if self.reject_login {
                return Err(NfsError::Auth {
                    server: "fake".into(),
                    username: "alice".into(),
                    reason: "password rejected".into(),
                });
            }
            Ok(FakeSession {
                server: Arc::clone(&self.server),
            })
        }
    }

    fn client(reject_login: bool) -> (SftpClient<FakeConnector>, Arc<FakeServer>) {
        let server = Arc::new(FakeServer::default());
        let connector = FakeConnector {
            server: Arc::clone(&server),
            reject_login,
        };
        let client = SftpClient::new(
            connector,
            &Credentials::password("alice", "pw"),
            &ClientOptions::default(),
        )
        .with_file_system_id(Some(3));
        (client, server)
    }

    #[test]
    fn test_tree_of_current_dir() {
        let (client, server) = client(false);
        let tree = client.create_file_tree("", "byname", None).unwrap();
        assert_eq!(tree.node_path, "/home/alice");
        let names: Vec<_> = tree.nodes.iter().map(|n| n.node_name.as_str()).collect();
        assert_eq!(names, vec!["data", "notes.txt"]);
        assert_eq!(tree.nodes[1].node_path, "notes.txt");
        assert_eq!(server.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_query_file() {
        let (client, _) = client(false);
        let file = client
            .query_for_nfs_file(&NfsTarget::path("notes.txt"))
            .unwrap()
            .unwrap();
        assert_eq!(file.name(), "notes.txt");
        assert_eq!(file.size(), 42);
        assert_eq!(file.details.file_system_id, Some(3));
        assert!(file.input_stream.is_none());

        assert!(client.query_for_nfs_file(&NfsTarget::path("data")).unwrap().is_none());
        assert!(client.query_for_nfs_file(&NfsTarget::path("dup.txt")).unwrap().is_none());
        assert!(client.query_for_nfs_file(&NfsTarget::path("missing")).unwrap().is_none());
    }

    #[test]
    fn test_download() {
        let (client, _) = client(false);
        let mut file = client
            .query_nfs_file_for_download(&NfsTarget::path("notes.txt"))
            .unwrap();
        let mut content = String::new();
        file.take_stream().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");

        let err = client
            .query_nfs_file_for_download(&NfsTarget::path("dup.txt"))
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(matches!(
            client.query_nfs_file_for_download(&NfsTarget::path("missing")),
            Err(NfsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_query_folder() {
        let (client, _) = client(false);
        let folder = client
            .query_for_nfs_folder(&NfsTarget::path("/home/alice"))
            .unwrap()
            .unwrap();
        assert_eq!(folder.content.len(), 2);
        assert_eq!(folder.content[1].file_system_full_path, "/home/alice/notes.txt");
        assert!(client
            .query_for_nfs_folder(&NfsTarget::path("notes.txt"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_auth_failure_propagates() {
        let (client, _) = client(true);
        assert!(client.try_connect_and_read_target("").unwrap_err().is_auth());
        assert!(client
            .query_for_nfs_file(&NfsTarget::path("notes.txt"))
            .unwrap_err()
            .is_auth());
    }

    #[test]
    fn test_path_required() {
        let (client, _) = client(false);
        assert!(client
            .query_for_nfs_file(&NfsTarget::id(4))
            .unwrap_err()
            .is_precondition());
    }

    #[test]
    fn test_close_session() {
        let (client, server) = client(false);
        client.close_session();
        client.try_connect_and_read_target(".").unwrap();
        client.close_session();
        client.close_session();
        assert_eq!(server.closes.load(Ordering::SeqCst), 1);
    }
}
