//! Remote path helpers shared by all protocol clients
//!
//! Paths here are UI-facing, '/'-separated strings. Protocol-specific
//! translation (SMB backslashes, share names) lives with each client.

use crate::config::FileStoreConfig;
use crate::nfs::types::RemoteEntry;

/// The current-directory marker
pub const CURRENT_DIR: &str = ".";

/// Check if a path is the current-directory shorthand
pub fn is_current_dir(path: &str) -> bool {
    path == CURRENT_DIR
}

/// Normalize a user-supplied path
///
/// Blank input becomes the current-directory marker, repeated separators
/// collapse to one and a trailing separator is dropped (except for root).
pub fn sanitize(path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        return CURRENT_DIR.to_string();
    }

    let mut out = String::with_capacity(path.len());
    let mut prev_sep = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_sep {
                out.push(c);
            }
            prev_sep = true;
        } else {
            out.push(c);
            prev_sep = false;
        }
    }

    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Path of `name` inside `parent`
///
/// Under the current-directory marker the name is returned as-is.
pub fn canonical(name: &str, parent: &str) -> String {
    if parent.is_empty() || is_current_dir(parent) {
        return name.to_string();
    }
    let parent = parent.trim_end_matches('/');
    format!("{}/{}", parent, name)
}

/// Check if a listing entry name should reach callers
///
/// Drops ".", ".." and hidden names.
pub fn is_visible(name: &str) -> bool {
    !name.is_empty() && !name.starts_with(CURRENT_DIR)
}

/// Remove ".", ".." and hidden entries from a listing
pub fn filter_listing(entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
    entries.into_iter().filter(|e| is_visible(&e.name)).collect()
}

/// Parent of a '/'-separated path, if it has one
pub fn parent_path(path: &str) -> Option<String> {
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/".to_string()),
        Some(0) => None,
        Some(pos) => Some(path[..pos].to_string()),
        None => None,
    }
}

/// Last component of a '/'-separated path
pub fn file_name(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    path.rsplit('/').next().unwrap_or(path)
}

/// Path of a node as shown relative to the user's anchor folder
///
/// Without an anchor the node path is returned. Nodes at or below the
/// anchor become "<anchor id>:/<relative path>"; anything else keeps its
/// node path.
pub fn logic_path(node_path: &str, anchor: Option<&FileStoreConfig>) -> String {
    let Some(anchor) = anchor else {
        return node_path.to_string();
    };

    let base = sanitize(&anchor.path);
    let node = sanitize(node_path);

    let relative = if node == base {
        Some("")
    } else if base == "/" {
        node.strip_prefix('/')
    } else {
        node.strip_prefix(base.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    };

    match relative {
        Some(rest) => format!("{}:/{}", anchor.id, rest),
        None => node_path.to_string(),
    }
}
