//! File tree nodes built from one level of a remote listing

use crate::config::{FileStoreConfig, DEFAULT_DATE_FORMAT};
use crate::nfs::path::{canonical, file_name, logic_path};
use crate::nfs::types::RemoteEntry;
use chrono::DateTime;
use humansize::{format_size, DECIMAL};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt::Write;

/// Ordering applied to the children of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Case-insensitive name, ascending
    #[default]
    ByName,
    /// Modification date, newest first
    ByDate,
}

impl OrderType {
    /// Parse an order spec such as "byname" or "bydate"
    ///
    /// Unknown specs fall back to by-name.
    pub fn parse(spec: &str) -> Self {
        match spec.trim().to_ascii_lowercase().as_str() {
            "bydate" | "date" => OrderType::ByDate,
            _ => OrderType::ByName,
        }
    }

    fn compare(&self, a: &NfsFileTreeNode, b: &NfsFileTreeNode) -> Ordering {
        match self {
            OrderType::ByName => a
                .node_name
                .to_lowercase()
                .cmp(&b.node_name.to_lowercase()),
            // Undated nodes go last
            OrderType::ByDate => match (a.file_date_millis, b.file_date_millis) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        }
    }
}

/// Renders modification times for tree nodes
///
/// Each client owns its own instance.
#[derive(Debug, Clone)]
pub struct DateFormatter {
    pattern: String,
}

impl DateFormatter {
    /// Formatter with a chrono format pattern (UTC)
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// Format Unix millis, None when out of range or the pattern is invalid
    pub fn format_millis(&self, millis: i64) -> Option<String> {
        let dt = DateTime::from_timestamp_millis(millis)?;
        let mut out = String::new();
        write!(out, "{}", dt.format(&self.pattern)).ok()?;
        Some(out)
    }
}

impl Default for DateFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT)
    }
}

/// One level of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NfsFileTreeNode {
    /// Protocol-native path
    pub node_path: String,

    /// Display name
    pub node_name: String,

    /// Path relative to the anchor folder
    pub logic_path: String,

    /// Folder or file
    pub is_folder: bool,

    /// Human-readable size (files only)
    pub file_size: Option<String>,

    /// Size in bytes (files only)
    pub file_size_bytes: Option<u64>,

    /// Formatted modification date
    pub file_date: Option<String>,

    /// Modification time (Unix millis)
    pub file_date_millis: Option<i64>,

    /// Native object id, when known
    pub nfs_id: Option<i64>,

    /// Ordering applied to `nodes`
    pub order_type: OrderType,

    /// Child nodes
    pub nodes: Vec<NfsFileTreeNode>,
}

impl NfsFileTreeNode {
    /// A folder node with no children
    pub fn folder(node_path: impl Into<String>, order_type: OrderType) -> Self {
        let node_path = node_path.into();
        Self {
            node_name: file_name(&node_path).to_string(),
            logic_path: node_path.clone(),
            node_path,
            is_folder: true,
            file_size: None,
            file_size_bytes: None,
            file_date: None,
            file_date_millis: None,
            nfs_id: None,
            order_type,
            nodes: Vec::new(),
        }
    }

    /// A node for one listing entry at `node_path`
    pub fn from_entry(
        entry: &RemoteEntry,
        node_path: String,
        order_type: OrderType,
        anchor: Option<&FileStoreConfig>,
        formatter: &DateFormatter,
    ) -> Self {
        let is_folder = entry.is_folder();
        let (file_size, file_size_bytes) = if is_folder {
            (None, None)
        } else {
            (Some(format_size(entry.size, DECIMAL)), Some(entry.size))
        };

        Self {
            node_name: entry.name.clone(),
            logic_path: logic_path(&node_path, anchor),
            node_path,
            is_folder,
            file_size,
            file_size_bytes,
            file_date: entry
                .modified_millis
                .and_then(|ms| formatter.format_millis(ms)),
            file_date_millis: entry.modified_millis,
            nfs_id: entry.nfs_id,
            order_type,
            nodes: Vec::new(),
        }
    }

    /// Append a child node
    pub fn add_node(&mut self, node: NfsFileTreeNode) {
        self.nodes.push(node);
    }

    /// Stable sort of the children by this node's ordering
    pub fn sort_nodes(&mut self) {
        let order = self.order_type;
        self.nodes.sort_by(|a, b| order.compare(a, b));
    }

    /// Number of folder children
    pub fn folder_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_folder).count()
    }
}

/// Build a tree node from one level of a native listing
///
/// `root_path` is the resolved path shown for the root; children are
/// placed at `canonical(name, listing_path)` so a current-directory
/// listing keeps relative child paths. Logic paths are always computed
/// from the resolved location under `root_path`.
pub fn build_file_tree(
    root_path: &str,
    listing_path: &str,
    entries: &[RemoteEntry],
    order_type: OrderType,
    anchor: Option<&FileStoreConfig>,
    formatter: &DateFormatter,
) -> NfsFileTreeNode {
    let mut root = NfsFileTreeNode::folder(root_path, order_type);
    root.logic_path = logic_path(root_path, anchor);

    for entry in entries {
        let child_path = canonical(&entry.name, listing_path);
        let mut node =
            NfsFileTreeNode::from_entry(entry, child_path, order_type, anchor, formatter);
        node.logic_path = logic_path(&canonical(&entry.name, root_path), anchor);
        root.add_node(node);
    }

    root.sort_nodes();
    root
}
