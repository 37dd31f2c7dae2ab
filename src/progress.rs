//! Terminal output for the nfs-store CLI
//!
//! Listings and metadata are printed with console styling; downloads show
//! an indicatif progress bar driven by a counting reader.

use crate::nfs::{NfsFileTreeNode, NfsFolderDetails, NfsResourceDetails};
use chrono::DateTime;
use console::style;
use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Read};
use std::time::Duration;

/// Progress bar for one download
pub struct DownloadProgress {
    /// Progress bar
    bar: ProgressBar,
}

impl DownloadProgress {
    /// Create a bar for a download of `total` bytes (0 when unknown)
    pub fn new(name: &str, total: u64) -> Self {
        let bar = if total > 0 {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                    .expect("Invalid progress template")
                    .progress_chars("=> "),
            );
            bar
        } else {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg} {bytes} ({bytes_per_sec})")
                    .expect("Invalid progress template")
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
            );
            bar
        };

        bar.set_message(name.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// A progress display that draws nothing (quiet mode)
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Wrap a reader so every read advances the bar
    pub fn wrap<R: Read>(&self, inner: R) -> ProgressReader<R> {
        ProgressReader {
            inner,
            bar: self.bar.clone(),
        }
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

/// Reader that reports bytes read to a progress bar
pub struct ProgressReader<R> {
    inner: R,
    bar: ProgressBar,
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bar.inc(n as u64);
        Ok(n)
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

fn format_millis(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Print a header before talking to the server
pub fn print_header(server: &str, protocol: &str, username: &str) {
    println!();
    println!(
        "{} {}",
        style("nfs-store").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Server:").bold(), server);
    println!("  {} {}", style("Protocol:").bold(), protocol);
    println!("  {} {}", style("User:").bold(), username);
    println!();
}

/// Print one level of a file tree
pub fn print_tree(tree: &NfsFileTreeNode) {
    println!("{}", style(&tree.node_path).bold());
    if tree.logic_path != tree.node_path {
        println!("  {} {}", style("Logic path:").dim(), tree.logic_path);
    }
    println!("{}", style("─".repeat(50)).dim());

    for node in &tree.nodes {
        let date = node.file_date.as_deref().unwrap_or("");
        if node.is_folder {
            println!(
                "  {:>10}  {:16}  {}/",
                "",
                date,
                style(&node.node_name).blue().bold()
            );
        } else {
            println!(
                "  {:>10}  {:16}  {}",
                node.file_size.as_deref().unwrap_or(""),
                date,
                node.node_name
            );
        }
    }

    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} folders, {} files",
        format_number(tree.folder_count() as u64),
        format_number((tree.nodes.len() - tree.folder_count()) as u64)
    );
    println!();
}

/// Print metadata of a resolved file or folder
pub fn print_resource(resource: &NfsResourceDetails) {
    let kind = if resource.is_folder() { "folder" } else { "file" };
    println!("{} ({})", style(&resource.name).bold(), kind);
    println!("  {} {}", style("Path:").bold(), resource.file_system_full_path);
    if let Some(parent) = &resource.file_system_parent_path {
        println!("  {} {}", style("Parent:").bold(), parent);
    }
    if let Some(id) = resource.nfs_id {
        println!("  {} {}", style("Id:").bold(), id);
    }
    if let Some(size) = resource.size {
        println!(
            "  {} {} ({} bytes)",
            style("Size:").bold(),
            format_size(size, DECIMAL),
            format_number(size)
        );
    }
    println!("  {} {}", style("Modified:").bold(), format_millis(resource.modified_millis));
}

/// Print a folder and its direct children
pub fn print_folder(folder: &NfsFolderDetails) {
    print_resource(&folder.details);
    println!("  {} {}", style("Entries:").bold(), format_number(folder.content.len() as u64));
    for child in &folder.content {
        let name = if child.is_folder() {
            style(format!("{}/", child.name)).blue().bold().to_string()
        } else {
            child.name.clone()
        };
        println!("    {}", name);
    }
}

/// Print a summary after a download
pub fn print_download_summary(remote: &str, local: &str, bytes: u64, duration: Duration) {
    let duration_secs = duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        bytes as f64 / duration_secs
    } else {
        0.0
    };

    println!();
    println!("{}", style("Download Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Remote:").bold(), remote);
    println!("  {} {}", style("Local:").bold(), local);
    println!(
        "  {} {} ({} bytes)",
        style("Size:").bold(),
        format_size(bytes, DECIMAL),
        format_number(bytes)
    );
    println!(
        "  {} {:.1}s ({}/s)",
        style("Duration:").bold(),
        duration_secs,
        format_size(rate as u64, DECIMAL)
    );
    println!();
}
