//! SMB client addressed by full `smb://` URLs

use crate::config::{ClientOptions, FileStoreConfig, ProtocolType};
use crate::error::{NfsError, NfsResult};
use crate::nfs::path::{canonical, file_name, filter_listing, is_current_dir, parent_path, sanitize};
use crate::nfs::session::SessionSlot;
use crate::nfs::smb::{NtlmAuth, SmbConnector, SmbLocation, SmbSession};
use crate::nfs::tree::{build_file_tree, DateFormatter, NfsFileTreeNode, OrderType};
use crate::nfs::types::{NfsFileDetails, NfsFolderDetails, NfsResourceDetails, NfsTarget, RemoteEntry};
use crate::nfs::{consistent_query, resilient_query, single_entry, target_path, NfsClient};
use tracing::debug;

/// SMB client using an explicit NTLM principal and URL addressing
pub struct CifsClient<C: SmbConnector> {
    connector: C,
    location: SmbLocation,
    auth: NtlmAuth,
    file_system_id: Option<i64>,
    formatter: DateFormatter,
    slot: SessionSlot<C::Session>,
}

impl<C: SmbConnector> CifsClient<C> {
    /// Create a client; no connection is made until the first operation
    pub fn new(connector: C, location: SmbLocation, auth: NtlmAuth, options: &ClientOptions) -> Self {
        let slot = SessionSlot::new(connector.server());
        Self {
            connector,
            location,
            auth,
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

    /// The parsed server location
    pub fn location(&self) -> &SmbLocation {
        &self.location
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

    /// Look up one entry by URL, file form first
    fn lookup(&self, session: &mut C::Session, path: &str) -> NfsResult<RemoteEntry> {
        let url = self.location.url_for(path, false);
        debug!("Looking up {}", url);
        single_entry(path, trim_names(session.lookup(&url)?))
    }

    fn find_file(&self, path: &str) -> NfsResult<Option<NfsFileDetails>> {
        let entry = self.with_session(|s| self.lookup(s, path))?;
        if entry.is_folder() {
            debug!("{} is a folder, not a file", path);
            return Ok(None);
        }
        Ok(Some(NfsFileDetails::new(self.details(&entry, path))))
    }

    fn find_folder(&self, path: &str) -> NfsResult<Option<NfsFolderDetails>> {
        let (entry, children) = self.with_session(|s| {
            let entry = if is_base(path) {
                RemoteEntry::directory(self.base_name(), None)
            } else {
                self.lookup(s, path)?
            };
            if !entry.is_folder() {
                return Ok((entry, Vec::new()));
            }
            let children = s.list(&self.location.url_for(path, true))?;
            Ok((entry, trim_names(children)))
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

    fn base_name(&self) -> String {
        let base = self.location.after_share_path().replace('\\', "/");
        match file_name(&base) {
            "" => self.location.share_name().to_string(),
            name => name.to_string(),
        }
    }
}

impl<C: SmbConnector> NfsClient for CifsClient<C> {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Samba
    }

    fn username(&self) -> &str {
        &self.auth.username
    }

    fn is_user_logged_in(&self) -> bool {
        !self.auth.username.is_empty() && !self.auth.password.is_empty()
    }

    fn try_connect_and_read_target(&self, path: &str) -> NfsResult<()> {
        let url = self.location.url_for(&sanitize(path), true);
        self.with_session(|s| s.list(&url).map(|_| ()))
    }

    fn create_file_tree(
        &self,
        path: &str,
        order: &str,
        anchor: Option<&FileStoreConfig>,
    ) -> NfsResult<NfsFileTreeNode> {
        let listing_path = sanitize(path);
        let url = self.location.url_for(&listing_path, true);
        let entries = self.with_session(|s| s.list(&url))?;
        let entries = filter_listing(trim_names(entries));
        debug!("Listed {} entries under {}", entries.len(), url);

        // The configured base folder is the root of the browsable tree
        let root_path = if is_current_dir(&listing_path) { "/" } else { listing_path.as_str() };
        Ok(build_file_tree(
            root_path,
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
            let entry = self.lookup(s, &path)?;
            if entry.is_folder() {
                return Err(NfsError::InvalidTarget(format!("{} is a folder", path)));
            }
            let stream = s.open(&self.location.url_for(&path, false))?;
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
        false
    }

    fn supports_extra_dirs(&self) -> bool {
        false
    }
}

/// True for the paths that name the configured base folder
pub(crate) fn is_base(path: &str) -> bool {
    is_current_dir(path) || path == "/"
}

/// URL listings report directory names with a trailing '/'
fn trim_names(entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
    entries
        .into_iter()
        .map(|mut e| {
            let trimmed = e.name.trim_end_matches('/');
            if trimmed.len() != e.name.len() {
                e.name = trimmed.to_string();
            }
            e
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfs::session::RemoteSession;
    use parking_lot::Mutex;
    use std::io::{Cursor, Read};
    use std::sync::Arc;

    const BASE: &str = "smb://nas.example.org/lab/projects/";

    struct FakeConnector {
        seen: Arc<Mutex<Vec<String>>>,
    }

    struct FakeSession {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl RemoteSession for FakeSession {
        fn is_alive(&mut self) -> bool {
            true
        }

        fn close(&mut self) {}
    }

    impl SmbSession for FakeSession {
        fn list(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>> {
            self.seen.lock().push(path.to_string());
            match path {
                BASE => Ok(vec![
                    RemoteEntry::directory("run1/", Some(1_700_000_000_000)),
                    RemoteEntry::file("readme.md", 120, Some(1_600_000_000_000)),
                    RemoteEntry::file(".DS_Store", 6, None),
                ]),
                _ => Ok(vec![]),
            }
        }

        fn lookup(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>> {
            self.seen.lock().push(path.to_string());
            match path {
                "smb://nas.example.org/lab/projects/readme.md" => {
                    Ok(vec![RemoteEntry::file("readme.md", 120, None)])
                }
                "smb://nas.example.org/lab/projects/run1" => {
                    Ok(vec![RemoteEntry::directory("run1/", None)])
                }
                _ => Ok(vec![]),
            }
        }

        fn open(&mut self, _path: &str) -> NfsResult<Box<dyn Read + Send>> {
            Ok(Box::new(Cursor::new(b"# readme".to_vec())))
        }
    }

    impl SmbConnector for FakeConnector {
        type Session = FakeSession;

        fn server(&self) -> &str {
            "nas.example.org"
        }

        fn connect(&self) -> NfsResult<FakeSession> {
            Ok(FakeSession {
                seen: Arc::clone(&self.seen),
            })
        }
    }

    fn client() -> (CifsClient<FakeConnector>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let location = SmbLocation::parse("smb://nas.example.org/lab/projects", None).unwrap();
        let client = CifsClient::new(
            FakeConnector {
                seen: Arc::clone(&seen),
            },
            location,
            NtlmAuth::new("CAMPUS", "alice", "pw"),
            &ClientOptions::default(),
        );
        (client, seen)
    }

    #[test]
    fn test_tree_uses_directory_urls() {
        let (client, seen) = client();
        let tree = client.create_file_tree("", "byname", None).unwrap();
        assert_eq!(seen.lock()[0], BASE);
        assert_eq!(tree.node_path, "/");
        let names: Vec<_> = tree.nodes.iter().map(|n| n.node_name.as_str()).collect();
        assert_eq!(names, vec!["readme.md", "run1"]);
        assert!(tree.nodes[1].is_folder);
    }

    #[test]
    fn test_file_and_folder_queries() {
        let (client, _) = client();
        let file = client
            .query_for_nfs_file(&NfsTarget::path("/readme.md"))
            .unwrap()
            .unwrap();
        assert_eq!(file.size(), 120);
        assert_eq!(file.details.file_system_parent_path.as_deref(), Some("/"));

        let folder = client
            .query_for_nfs_folder(&NfsTarget::path("/"))
            .unwrap()
            .unwrap();
        assert_eq!(folder.details.name, "projects");
        assert_eq!(folder.content.len(), 2);

        assert!(client
            .query_for_nfs_file(&NfsTarget::path("/run1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_download() {
        let (client, _) = client();
        let mut file = client
            .query_nfs_file_for_download(&NfsTarget::path("readme.md"))
            .unwrap();
        let mut content = String::new();
        file.take_stream().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "# readme");
    }

    #[test]
    fn test_capabilities() {
        let (client, _) = client();
        assert_eq!(client.protocol(), ProtocolType::Samba);
        assert_eq!(client.username(), "alice");
        assert!(client.is_user_logged_in());
        assert!(!client.supports_current_dir());
        client.close_session();
    }
}
