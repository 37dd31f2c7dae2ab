//! Remote entry types and data structures
//!
//! These types represent entries returned from the protocol clients,
//! normalized so that callers never see protocol-specific shapes.

use serde::Serialize;
use std::fmt;
use std::io::Read;

/// Type of remote entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Regular file or data object
    File,
    /// Directory or collection
    Directory,
    /// Symbolic link
    Symlink,
    /// Anything else (devices, pipes, shares of other kinds)
    Unknown,
}

impl EntryType {
    /// Convert from Unix mode bits
    pub fn from_mode(mode: u32) -> Self {
        match mode & 0o170000 {
            0o100000 => EntryType::File,      // S_IFREG
            0o040000 => EntryType::Directory, // S_IFDIR
            0o120000 => EntryType::Symlink,   // S_IFLNK
            _ => EntryType::Unknown,
        }
    }

    /// Check if this is a regular file
    pub fn is_file(&self) -> bool {
        *self == EntryType::File
    }

    /// Check if this is a directory
    pub fn is_dir(&self) -> bool {
        *self == EntryType::Directory
    }

    /// Check if this entry is presented as a folder
    ///
    /// Links are browsed like directories.
    pub fn is_folder_like(&self) -> bool {
        matches!(self, EntryType::Directory | EntryType::Symlink)
    }
}

/// One entry of a native listing, normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Entry name (not full path)
    pub name: String,

    /// Entry type
    pub entry_type: EntryType,

    /// Size in bytes (0 for folders)
    pub size: u64,

    /// Last modification time (Unix millis)
    pub modified_millis: Option<i64>,

    /// Native object id, for protocols that have one
    pub nfs_id: Option<i64>,
}

impl RemoteEntry {
    /// A file entry
    pub fn file(name: impl Into<String>, size: u64, modified_millis: Option<i64>) -> Self {
        Self {
            name: name.into(),
            entry_type: EntryType::File,
            size,
            modified_millis,
            nfs_id: None,
        }
    }

    /// A directory entry
    pub fn directory(name: impl Into<String>, modified_millis: Option<i64>) -> Self {
        Self {
            name: name.into(),
            entry_type: EntryType::Directory,
            size: 0,
            modified_millis,
            nfs_id: None,
        }
    }

    /// Attach a native id, builder style
    pub fn with_id(mut self, id: i64) -> Self {
        self.nfs_id = Some(id);
        self
    }

    /// Check if this entry is presented as a folder
    pub fn is_folder(&self) -> bool {
        self.entry_type.is_folder_like()
    }
}

/// What a caller asks for: a remote path, a native id, or both
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NfsTarget {
    /// Remote path
    pub path: Option<String>,

    /// Native object id (iRODS)
    pub nfs_id: Option<i64>,
}

impl NfsTarget {
    /// Target addressed by path
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            nfs_id: None,
        }
    }

    /// Target addressed by native id
    pub fn id(nfs_id: i64) -> Self {
        Self {
            path: None,
            nfs_id: Some(nfs_id),
        }
    }

    /// Target with both a path and an id
    pub fn new(path: Option<String>, nfs_id: Option<i64>) -> Self {
        Self { path, nfs_id }
    }

    /// True when a path or an id is present
    pub fn is_resolvable(&self) -> bool {
        self.nfs_id.is_some() || self.path.as_deref().is_some_and(|p| !p.trim().is_empty())
    }
}

impl fmt::Display for NfsTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, self.nfs_id) {
            (Some(path), Some(id)) => write!(f, "{} (id {})", path, id),
            (Some(path), None) => f.write_str(path),
            (None, Some(id)) => write!(f, "id {}", id),
            (None, None) => f.write_str("<empty target>"),
        }
    }
}

/// Kind of a resolved resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    File,
    Folder,
}

/// Metadata common to files and folders
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NfsResourceDetails {
    /// Entry name
    pub name: String,

    /// Full remote path
    pub file_system_full_path: String,

    /// Parent remote path
    pub file_system_parent_path: Option<String>,

    /// File or folder
    pub kind: ResourceKind,

    /// Native object id, when known
    pub nfs_id: Option<i64>,

    /// Size in bytes (files only)
    pub size: Option<u64>,

    /// Last modification time (Unix millis)
    pub modified_millis: Option<i64>,

    /// Configuration id of the owning file system
    pub file_system_id: Option<i64>,
}

impl NfsResourceDetails {
    /// Build details for an entry found under `parent_path`
    pub fn from_entry(entry: &RemoteEntry, full_path: String, parent_path: Option<String>) -> Self {
        let kind = if entry.is_folder() {
            ResourceKind::Folder
        } else {
            ResourceKind::File
        };
        Self {
            name: entry.name.clone(),
            file_system_full_path: full_path,
            file_system_parent_path: parent_path,
            kind,
            nfs_id: entry.nfs_id,
            size: (kind == ResourceKind::File).then_some(entry.size),
            modified_millis: entry.modified_millis,
            file_system_id: None,
        }
    }

    /// Check if this resource is a folder
    pub fn is_folder(&self) -> bool {
        self.kind == ResourceKind::Folder
    }
}

/// A resolved file, optionally with an open content stream
pub struct NfsFileDetails {
    /// File metadata
    pub details: NfsResourceDetails,

    /// Content stream positioned at offset 0, owned by the caller
    pub input_stream: Option<Box<dyn Read + Send>>,
}

impl NfsFileDetails {
    /// Metadata-only file details
    pub fn new(details: NfsResourceDetails) -> Self {
        Self {
            details,
            input_stream: None,
        }
    }

    /// Attach an open content stream
    pub fn with_stream(mut self, stream: Box<dyn Read + Send>) -> Self {
        self.input_stream = Some(stream);
        self
    }

    /// File name
    pub fn name(&self) -> &str {
        &self.details.name
    }

    /// Full remote path
    pub fn full_path(&self) -> &str {
        &self.details.file_system_full_path
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.details.size.unwrap_or(0)
    }

    /// Take ownership of the content stream
    pub fn take_stream(&mut self) -> Option<Box<dyn Read + Send>> {
        self.input_stream.take()
    }
}

impl fmt::Debug for NfsFileDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NfsFileDetails")
            .field("details", &self.details)
            .field("input_stream", &self.input_stream.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

/// A resolved folder with one level of children
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NfsFolderDetails {
    /// Folder metadata
    #[serde(flatten)]
    pub details: NfsResourceDetails,

    /// Direct children, files and folders
    pub content: Vec<NfsResourceDetails>,
}

impl NfsFolderDetails {
    /// Folder without content
    pub fn new(details: NfsResourceDetails) -> Self {
        Self {
            details,
            content: Vec::new(),
        }
    }

    /// Add a child resource
    pub fn add_content(&mut self, child: NfsResourceDetails) {
        self.content.push(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_from_mode() {
        assert_eq!(EntryType::from_mode(0o100644), EntryType::File);
        assert_eq!(EntryType::from_mode(0o040755), EntryType::Directory);
        assert_eq!(EntryType::from_mode(0o120777), EntryType::Symlink);
        assert_eq!(EntryType::from_mode(0o020666), EntryType::Unknown);
    }

    #[test]
    fn test_folder_like() {
        assert!(EntryType::Directory.is_folder_like());
        assert!(EntryType::Symlink.is_folder_like());
        assert!(!EntryType::File.is_folder_like());
    }

    #[test]
    fn test_target_resolvable() {
        assert!(NfsTarget::path("/data").is_resolvable());
        assert!(NfsTarget::id(42).is_resolvable());
        assert!(!NfsTarget::default().is_resolvable());
        assert!(!NfsTarget::path("  ").is_resolvable());
        assert_eq!(NfsTarget::new(Some("/a".into()), Some(3)).to_string(), "/a (id 3)");
    }

    #[test]
    fn test_resource_from_entry() {
        let file = RemoteEntry::file("run1.csv", 2048, Some(1_600_000_000_000)).with_id(9);
        let details =
            NfsResourceDetails::from_entry(&file, "/data/run1.csv".into(), Some("/data".into()));
        assert_eq!(details.kind, ResourceKind::File);
        assert_eq!(details.size, Some(2048));
        assert_eq!(details.nfs_id, Some(9));

        let dir = RemoteEntry::directory("raw", None);
        let details = NfsResourceDetails::from_entry(&dir, "/data/raw".into(), Some("/data".into()));
        assert!(details.is_folder());
        assert_eq!(details.size, None);
    }

    #[test]
    fn test_file_details_stream() {
        let entry = RemoteEntry::file("a.txt", 3, None);
        let details = NfsResourceDetails::from_entry(&entry, "a.txt".into(), None);
        let mut file = NfsFileDetails::new(details).with_stream(Box::new(std::io::Cursor::new(b"abc".to_vec())));

        let mut content = String::new();
        file.take_stream().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "abc");
        assert!(file.input_stream.is_none());
        assert_eq!(file.size(), 3);
    }
}
