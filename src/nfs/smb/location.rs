//! SMB path algebra
//!
//! Pure functions only: a configured `smb://host[:port]/share/base` URL is
//! split into host, port, share name and after-share path, and UI paths are
//! mapped to share-relative backslash paths or full URLs.

use crate::config::{options, ConfigError, FileSystemConfig};
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Default SMB port
pub const DEFAULT_SMB_PORT: u16 = 445;

/// Regex for parsing SMB URLs
static SMB_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: smb://host, smb://host:port, smb://host/share/base
    Regex::new(r"(?i)^smb://([^/:\s]+)(?::(\d+))?(/.*)?$").expect("Invalid SMB URL regex")
});

/// Parsed location of an SMB file system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbLocation {
    host: String,
    port: Option<u16>,
    share_name: String,
    after_share_path: String,
}

impl SmbLocation {
    /// Parse a configured URL, with an optional configured share name
    ///
    /// The configured share wins over the URL's first segment; leading and
    /// trailing '/' are ignored. When the URL's first segment is the share
    /// it is not repeated in the after-share path.
    pub fn parse(url: &str, configured_share: Option<&str>) -> Result<Self, ConfigError> {
        let url = url.trim();
        let caps = SMB_URL_REGEX
            .captures(url)
            .ok_or_else(|| ConfigError::InvalidUrl {
                url: url.to_string(),
                reason: "Expected format: smb://host[:port]/share[/path]".into(),
            })?;

        let host = caps[1].to_string();
        let port = match caps.get(2) {
            Some(m) => Some(m.as_str().parse::<u16>().map_err(|_| ConfigError::InvalidUrl {
                url: url.to_string(),
                reason: format!("Invalid port '{}'", m.as_str()),
            })?),
            None => None,
        };

        let segments = split_segments(caps.get(3).map_or("", |m| m.as_str()));
        let configured = configured_share
            .map(|s| s.trim().trim_matches('/'))
            .filter(|s| !s.is_empty());

        let share_name = match (configured, segments.first()) {
            (Some(share), _) => share.to_string(),
            (None, Some(first)) => first.to_string(),
            (None, None) => {
                return Err(ConfigError::MissingOption {
                    key: options::SAMBA_SHARE_NAME.to_string(),
                    protocol: "SMB".to_string(),
                })
            }
        };

        let rest = match segments.first() {
            Some(first) if first.eq_ignore_ascii_case(&share_name) => &segments[1..],
            _ => &segments[..],
        };

        Ok(Self {
            host,
            port,
            share_name,
            after_share_path: join_backslash(rest, true),
        })
    }

    /// Parse the location of a file system configuration
    pub fn from_config(config: &FileSystemConfig) -> Result<Self, ConfigError> {
        let mut location = Self::parse(&config.url, config.option(options::SAMBA_SHARE_NAME))?;
        if config.port.is_some() {
            location.port = config.port;
        }
        Ok(location)
    }

    /// Server host name
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, if one was configured
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Share name without separators
    pub fn share_name(&self) -> &str {
        &self.share_name
    }

    /// Base folder inside the share, "\a\b" form (empty at the share root)
    pub fn after_share_path(&self) -> &str {
        &self.after_share_path
    }

    /// `smb://host[:port]`
    pub fn server_url(&self) -> String {
        match self.port {
            Some(port) => format!("smb://{}:{}", self.host, port),
            None => format!("smb://{}", self.host),
        }
    }

    /// Share-relative backslash path of a UI path
    ///
    /// A path that already starts with the share name is taken as
    /// share-absolute; anything else is relative to the base folder.
    pub fn remote_path_without_share_name(&self, path: &str) -> String {
        let segments = split_segments(path);
        match segments.first() {
            Some(first) if first.eq_ignore_ascii_case(&self.share_name) => {
                join_backslash(&segments[1..], false)
            }
            _ => {
                let mut full = split_segments(&self.after_share_path);
                full.extend(segments);
                join_backslash(&full, false)
            }
        }
    }

    /// Full `smb://` URL of a UI path; directory URLs end with '/'
    ///
    /// Segments below the share are percent-encoded.
    pub fn url_for(&self, path: &str, is_dir: bool) -> String {
        let remote = self.remote_path_without_share_name(path);
        let relative = split_segments(&remote)
            .into_iter()
            .map(encode_segment)
            .collect::<Vec<_>>()
            .join("/");
        let mut url = format!("{}/{}/", self.server_url(), self.share_name);
        if !relative.is_empty() {
            url.push_str(&relative);
            if is_dir {
                url.push('/');
            }
        }
        url
    }

    /// Share-relative '/' path of a full URL produced by [`Self::url_for`]
    pub fn path_of_url<'a>(&self, url: &'a str) -> &'a str {
        let server = self.server_url();
        match url.get(..server.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(&server) => &url[server.len()..],
            _ => url,
        }
    }
}

/// Percent-encode one path segment for an `smb://` URL
pub fn encode_segment(segment: &str) -> Cow<'_, str> {
    urlencoding::encode(segment)
}

/// Undo [`encode_segment`]; malformed escapes are kept as they are
pub fn decode_segment(segment: &str) -> Cow<'_, str> {
    urlencoding::decode(segment).unwrap_or(Cow::Borrowed(segment))
}

/// Non-empty path segments, '/' or '\' separated, without "."
fn split_segments(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}

fn join_backslash(segments: &[&str], leading: bool) -> String {
    if segments.is_empty() {
        return String::new();
    }
    let joined = segments.join("\\");
    if leading {
        format!("\\{}", joined)
    } else {
        joined
    }
}
