//! SMB2/3 client addressed by share-relative paths

use crate::config::{ClientOptions, FileStoreConfig, ProtocolType};
use crate::error::{NfsError, NfsResult};
use crate::nfs::path::{canonical, file_name, filter_listing, is_current_dir, parent_path, sanitize};
use crate::nfs::session::SessionSlot;
use crate::nfs::smb::cifs::is_base;
use crate::nfs::smb::{NtlmAuth, SmbConnector, SmbLocation, SmbSession};
use crate::nfs::tree::{build_file_tree, DateFormatter, NfsFileTreeNode, OrderType};
use crate::nfs::types::{NfsFileDetails, NfsFolderDetails, NfsResourceDetails, NfsTarget, RemoteEntry};
use crate::nfs::{consistent_query, resilient_query, single_entry, target_path, NfsClient};
use tracing::debug;

/// SMB client connected to one host and share
pub struct Smb2Client<C: SmbConnector> {
    connector: C,
    location: SmbLocation,
    username: String,
    logged_in: bool,
    file_system_id: Option<i64>,
    formatter: DateFormatter,
    slot: SessionSlot<C::Session>,
}

impl<C: SmbConnector> Smb2Client<C> {
    /// Create a client; no connection is made until the first operation
    pub fn new(connector: C, location: SmbLocation, auth: &NtlmAuth, options: &ClientOptions) -> Self {
        let slot = SessionSlot::new(format!("{}/{}", connector.server(), location.share_name()));
        Self {
            connector,
            location,
            username: auth.username.clone(),
            logged_in: !auth.username.is_empty() && !auth.password.is_empty(),
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

    fn share_path(&self, path: &str) -> String {
        self.location.remote_path_without_share_name(path)
    }

    fn details(&self, entry: &RemoteEntry, full_path: &str) -> NfsResourceDetails {
        let mut details =
            NfsResourceDetails::from_entry(entry, full_path.to_string(), parent_path(full_path));
        details.file_system_id = self.file_system_id;
        details
    }

    fn find_file(&self, path: &str) -> NfsResult<Option<NfsFileDetails>> {
        let share_path = self.share_path(path);
        let entry = single_entry(path, self.with_session(|s| s.lookup(&share_path))?)?;
        if entry.is_folder() {
            debug!("{} is a folder, not a file", path);
            return Ok(None);
        }
        Ok(Some(NfsFileDetails::new(self.details(&entry, path))))
    }

    fn find_folder(&self, path: &str) -> NfsResult<Option<NfsFolderDetails>> {
        let share_path = self.share_path(path);
        let (entry, children) = self.with_session(|s| {
            let entry = if is_base(path) {
                let base = share_path.replace('\\', "/");
                let name = match file_name(&base) {
                    "" => self.location.share_name(),
                    name => name,
                };
                RemoteEntry::directory(name, None)
            } else {
                single_entry(path, s.lookup(&share_path)?)?
            };
            if !entry.is_folder() {
                return Ok((entry, Vec::new()));
            }
            let children = s.list(&share_path)?;
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

impl<C: SmbConnector> NfsClient for Smb2Client<C> {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Smbj
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn is_user_logged_in(&self) -> bool {
        self.logged_in
    }

    fn try_connect_and_read_target(&self, path: &str) -> NfsResult<()> {
        let share_path = self.share_path(&sanitize(path));
        self.with_session(|s| s.list(&share_path).map(|_| ()))
    }

    fn create_file_tree(
        &self,
        path: &str,
        order: &str,
        anchor: Option<&FileStoreConfig>,
    ) -> NfsResult<NfsFileTreeNode> {
        let listing_path = sanitize(path);
        let share_path = self.share_path(&listing_path);
        let entries = filter_listing(self.with_session(|s| s.list(&share_path))?);
        debug!(
            "Listed {} entries under \\\\{}\\{}\\{}",
            entries.len(),
            self.location.host(),
            self.location.share_name(),
            share_path
        );

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
        let share_path = self.share_path(&path);
        let (entry, stream) = self.with_session(|s| {
            let entry = single_entry(&path, s.lookup(&share_path)?)?;
            if entry.is_folder() {
                return Err(NfsError::InvalidTarget(format!("{} is a folder", path)));
            }
            let stream = s.open(&share_path)?;
            Ok((entry, stream))
        })?;

        debug!("Opened {} for download ({} bytes)", share_path, entry.size);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfs::session::RemoteSession;
    use std::io::{Cursor, Read};

    struct FakeConnector;

    struct FakeSession;

    impl RemoteSession for FakeSession {
        fn is_alive(&mut self) -> bool {
            true
        }

        fn close(&mut self) {}
    }

    impl SmbSession for FakeSession {
        fn list(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>> {
            match path {
                "snapped\\replicated\\Rspace" => Ok(vec![
                    RemoteEntry::directory("Nigel_Goddard_Test", Some(1_700_000_000_000)),
                    RemoteEntry::file("index.html", 900, Some(1_650_000_000_000)),
                ]),
                "snapped\\replicated\\Rspace\\Nigel_Goddard_Test" => Ok(vec![
                    RemoteEntry::file("small.txt", 11, Some(1_690_000_000_000)),
                    RemoteEntry::file("~$lock", 1, None),
                ]),
                _ => Err(NfsError::NotFound { path: path.into() }),
            }
        }

        fn lookup(&mut self, path: &str) -> NfsResult<Vec<RemoteEntry>> {
            match path {
                "snapped\\replicated\\Rspace\\Nigel_Goddard_Test\\small.txt" => {
                    Ok(vec![RemoteEntry::file("small.txt", 11, None)])
                }
                "snapped\\replicated\\Rspace\\Nigel_Goddard_Test" => {
                    Ok(vec![RemoteEntry::directory("Nigel_Goddard_Test", None)])
                }
                _ => Ok(vec![]),
            }
        }

        fn open(&mut self, _path: &str) -> NfsResult<Box<dyn Read + Send>> {
            Ok(Box::new(Cursor::new(b"small file\n".to_vec())))
        }
    }

    impl SmbConnector for FakeConnector {
        type Session = FakeSession;

        fn server(&self) -> &str {
            "nasr.man.ac.uk"
        }

        fn connect(&self) -> NfsResult<FakeSession> {
            Ok(FakeSession)
        }
    }

    fn client() -> Smb2Client<FakeConnector> {
        let location = SmbLocation::parse(
            "smb://nasr.man.ac.uk/flsrss$/snapped/replicated/Rspace",
            Some("/flsrss$"),
        )
        .unwrap();
        Smb2Client::new(
            FakeConnector,
            location,
            &NtlmAuth::new("MAN", "nigel", "pw"),
            &ClientOptions::default(),
        )
    }

    #[test]
    fn test_tree_of_base_folder() {
        let tree = client().create_file_tree(".", "bydate", None).unwrap();
        assert_eq!(tree.node_path, "/");
        let names: Vec<_> = tree.nodes.iter().map(|n| n.node_name.as_str()).collect();
        assert_eq!(names, vec!["Nigel_Goddard_Test", "index.html"]);
    }

    #[test]
    fn test_tree_of_subfolder() {
        let tree = client()
            .create_file_tree("/Nigel_Goddard_Test/", "byname", None)
            .unwrap();
        assert_eq!(tree.node_path, "/Nigel_Goddard_Test");
        assert_eq!(tree.nodes.len(), 2);
        assert_eq!(tree.nodes[0].node_path, "/Nigel_Goddard_Test/small.txt");
    }

    #[test]
    fn test_file_query_and_download() {
        let client = client();
        let target = NfsTarget::path("/Nigel_Goddard_Test/small.txt");
        let file = client.query_for_nfs_file(&target).unwrap().unwrap();
        assert_eq!(file.name(), "small.txt");
        assert_eq!(file.details.file_system_parent_path.as_deref(), Some("/Nigel_Goddard_Test"));

        let mut file = client.query_nfs_file_for_download(&target).unwrap();
        let mut content = String::new();
        file.take_stream().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "small file\n");
    }

    #[test]
    fn test_folder_query() {
        let client = client();
        let folder = client
            .query_for_nfs_folder(&NfsTarget::path("/Nigel_Goddard_Test"))
            .unwrap()
            .unwrap();
        assert_eq!(folder.content.len(), 2);

        let base = client
            .query_for_nfs_folder(&NfsTarget::path("."))
            .unwrap()
            .unwrap();
        assert_eq!(base.details.name, "Rspace");

        assert!(client
            .query_for_nfs_folder(&NfsTarget::path("/missing"))
            .unwrap()
            .is_none());
    }
}
