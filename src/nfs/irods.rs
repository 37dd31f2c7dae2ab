//! iRODS client
//!
//! iRODS entries are collections (folders) or data objects (files), each
//! with a numeric catalog id. Targets resolve by id when one is given and
//! by logical path otherwise. The HTTP API backend lives in
//! [`crate::nfs::irods_http`].

use crate::config::{ClientOptions, Credentials, FileStoreConfig, ProtocolType};
use crate::error::{NfsError, NfsResult};
use crate::nfs::path::{canonical, file_name, is_current_dir, parent_path, sanitize};
use crate::nfs::session::{RemoteSession, SessionSlot};
use crate::nfs::tree::{build_file_tree, DateFormatter, NfsFileTreeNode, OrderType};
use crate::nfs::types::{
    EntryType, NfsFileDetails, NfsFolderDetails, NfsResourceDetails, NfsTarget, RemoteEntry,
};
use crate::nfs::{check_target, consistent_query, resilient_query, single_entry, NfsClient};
use std::collections::HashSet;
use std::io::Read;
use tracing::debug;

/// Catalog object type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrodsObjectType {
    Collection,
    DataObject,
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrodsEntry {
    /// Catalog id
    pub id: i64,

    /// Collection or data object
    pub object_type: IrodsObjectType,

    /// Full logical path
    pub path: String,

    /// Size in bytes (data objects)
    pub size: u64,

    /// Last modification time (Unix millis)
    pub modified_millis: Option<i64>,
}

impl IrodsEntry {
    /// A collection entry
    pub fn collection(id: i64, path: impl Into<String>, modified_millis: Option<i64>) -> Self {
        Self {
            id,
            object_type: IrodsObjectType::Collection,
            path: path.into(),
            size: 0,
            modified_millis,
        }
    }

    /// A data object entry
    pub fn data_object(id: i64, path: impl Into<String>, size: u64, modified_millis: Option<i64>) -> Self {
        Self {
            id,
            object_type: IrodsObjectType::DataObject,
            path: path.into(),
            size,
            modified_millis,
        }
    }

    /// Last path component
    pub fn name(&self) -> &str {
        file_name(&self.path)
    }

    /// Check if this entry is a collection
    pub fn is_collection(&self) -> bool {
        self.object_type == IrodsObjectType::Collection
    }

    /// Normalized listing entry
    pub fn to_remote_entry(&self) -> RemoteEntry {
        let entry_type = match self.object_type {
            IrodsObjectType::Collection => EntryType::Directory,
            IrodsObjectType::DataObject => EntryType::File,
        };
        RemoteEntry {
            name: self.name().to_string(),
            entry_type,
            size: self.size,
            modified_millis: self.modified_millis,
            nfs_id: Some(self.id),
        }
    }
}

/// An authenticated iRODS session
pub trait IrodsSession: RemoteSession {
    /// Collections and data objects directly inside `collection`
    fn list_collection(&mut self, collection: &str) -> NfsResult<Vec<IrodsEntry>>;

    /// Entries with catalog id `id`
    fn find_by_id(&mut self, id: i64) -> NfsResult<Vec<IrodsEntry>>;

    /// Entries at logical path `path`
    fn find_by_path(&mut self, path: &str) -> NfsResult<Vec<IrodsEntry>>;

    /// Open the data object at `path` for reading
    fn open(&mut self, path: &str) -> NfsResult<Box<dyn Read + Send>>;
}

/// Opens iRODS sessions for one zone and user
pub trait IrodsConnector: Send + Sync {
    type Session: IrodsSession;

    /// Server label for logs and errors
    fn server(&self) -> &str;

    /// Home collection of the user
    fn home_collection(&self) -> &str;

    /// Authenticate and open a session
    fn connect(&self) -> NfsResult<Self::Session>;
}

/// iRODS implementation of [`NfsClient`]
pub struct IrodsClient<C: IrodsConnector> {
    connector: C,
    username: String,
    logged_in: bool,
    file_system_id: Option<i64>,
    formatter: DateFormatter,
    slot: SessionSlot<C::Session>,
}

impl<C: IrodsConnector> IrodsClient<C> {
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

    /// Logical path of a user path; relative paths live under the home collection
    fn absolute(&self, path: &str) -> String {
        let path = sanitize(path);
        let home = self.connector.home_collection();
        if is_current_dir(&path) {
            home.to_string()
        } else if path.starts_with('/') {
            path
        } else {
            canonical(&path, home)
        }
    }

    /// Resolve a target to its catalog entries, by id first
    fn resolve(&self, session: &mut C::Session, target: &NfsTarget) -> NfsResult<Vec<IrodsEntry>> {
        let entries = match (target.nfs_id, target.path.as_deref()) {
            (Some(id), _) => session.find_by_id(id)?,
            (None, Some(path)) if !path.trim().is_empty() => {
                session.find_by_path(&self.absolute(path))?
            }
            _ => {
                return Err(NfsError::InvalidTarget(format!(
                    "{} has neither a path nor an id",
                    target
                )))
            }
        };
        Ok(dedupe(entries))
    }

    fn details(&self, entry: &IrodsEntry) -> NfsResourceDetails {
        let mut details = NfsResourceDetails::from_entry(
            &entry.to_remote_entry(),
            entry.path.clone(),
            parent_path(&entry.path),
        );
        details.file_system_id = self.file_system_id;
        details
    }

    fn find_file(&self, target: &NfsTarget) -> NfsResult<Option<NfsFileDetails>> {
        let entries = self.with_session(|s| self.resolve(s, target))?;
        let entry = single_entry(&target.to_string(), entries)?;
        if entry.is_collection() {
            debug!("{} is a collection, not a data object", entry.path);
            return Ok(None);
        }
        Ok(Some(NfsFileDetails::new(self.details(&entry))))
    }

    fn find_folder(&self, target: &NfsTarget) -> NfsResult<Option<NfsFolderDetails>> {
        let (entry, children) = self.with_session(|s| {
            let entry = single_entry(&target.to_string(), self.resolve(s, target)?)?;
            if !entry.is_collection() {
                return Ok((entry, Vec::new()));
            }
            let children = s.list_collection(&entry.path)?;
            Ok((entry, dedupe(children)))
        })?;

        if !entry.is_collection() {
            debug!("{} is a data object, not a collection", entry.path);
            return Ok(None);
        }

        let mut folder = NfsFolderDetails::new(self.details(&entry));
        for child in &children {
            folder.add_content(self.details(child));
        }
        Ok(Some(folder))
    }
}

impl<C: IrodsConnector> NfsClient for IrodsClient<C> {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Irods
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn is_user_logged_in(&self) -> bool {
        self.logged_in
    }

    fn try_connect_and_read_target(&self, path: &str) -> NfsResult<()> {
        let collection = self.absolute(path);
        self.with_session(|s| s.list_collection(&collection).map(|_| ()))
    }

    fn create_file_tree(
        &self,
        path: &str,
        order: &str,
        anchor: Option<&FileStoreConfig>,
    ) -> NfsResult<NfsFileTreeNode> {
        let listing_path = sanitize(path);
        let collection = self.absolute(&listing_path);
        let entries = self.with_session(|s| s.list_collection(&collection))?;

        let entries: Vec<RemoteEntry> = dedupe(entries)
            .iter()
            .map(IrodsEntry::to_remote_entry)
            .collect();
        debug!("Listed {} entries under {}", entries.len(), collection);

        Ok(build_file_tree(
            &collection,
            &listing_path,
            &entries,
            OrderType::parse(order),
            anchor,
            &self.formatter,
        ))
    }

    fn query_for_nfs_file(&self, target: &NfsTarget) -> NfsResult<Option<NfsFileDetails>> {
        check_target(target)?;
        resilient_query(target, self.find_file(target))
    }

    fn query_nfs_file_for_download(&self, target: &NfsTarget) -> NfsResult<NfsFileDetails> {
        let (entry, stream) = self.with_session(|s| {
            let entry = single_entry(&target.to_string(), self.resolve(s, target)?)?;
            if entry.is_collection() {
                return Err(NfsError::InvalidTarget(format!("{} is a collection", entry.path)));
            }
            let stream = s.open(&entry.path)?;
            Ok((entry, stream))
        })?;

        debug!("Opened {} for download ({} bytes)", entry.path, entry.size);
        Ok(NfsFileDetails::new(self.details(&entry)).with_stream(stream))
    }

    fn query_for_nfs_folder(&self, target: &NfsTarget) -> NfsResult<Option<NfsFolderDetails>> {
        check_target(target)?;
        consistent_query(self.find_folder(target))
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

/// Drop repeated catalog rows (one per replica) keeping the first
pub fn dedupe(entries: Vec<IrodsEntry>) -> Vec<IrodsEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert((e.object_type, e.id)))
        .collect()
}
