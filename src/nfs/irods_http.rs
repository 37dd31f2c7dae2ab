//! iRODS sessions over the iRODS HTTP API
//!
//! Authentication trades basic credentials for a bearer token; catalog
//! lookups are GenQuery requests so every entry carries its numeric id.

use crate::config::{options, ClientOptions, ConfigError, Credentials, FileSystemConfig, ServerUrl};
use crate::error::{NfsError, NfsResult};
use crate::nfs::irods::{IrodsConnector, IrodsEntry, IrodsSession};
use crate::nfs::path::{canonical, file_name, parent_path, sanitize};
use crate::nfs::session::RemoteSession;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;
use tracing::debug;

/// GenQuery status for an empty result set
const CAT_NO_ROWS_FOUND: i64 = -808000;

/// Rows requested per GenQuery page
const PAGE_ROWS: usize = 256;

const COLLECTION_COLUMNS: &str = "COLL_ID, COLL_NAME, COLL_MODIFY_TIME";
const DATA_COLUMNS: &str = "DATA_ID, COLL_NAME, DATA_NAME, DATA_SIZE, DATA_MODIFY_TIME";

/// Opens HTTP API sessions for one zone and user
pub struct IrodsHttpConnector {
    base_url: String,
    server: String,
    home: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl IrodsHttpConnector {
    /// Validate the configuration and build a connector
    ///
    /// `url` is the HTTP API base, e.g.
    /// `https://irods.example.org/irods-http-api/0.3.0`.
    pub fn new(
        config: &FileSystemConfig,
        credentials: Credentials,
        options: &ClientOptions,
    ) -> Result<Self, ConfigError> {
        let url = ServerUrl::parse(&config.url)?;
        let scheme = match url.scheme.as_deref() {
            None => "https",
            Some(s @ ("http" | "https")) => s,
            Some(other) => {
                return Err(ConfigError::InvalidUrl {
                    url: config.url.clone(),
                    reason: format!("Unexpected scheme '{}' for the iRODS HTTP API", other),
                })
            }
        };

        let (username, password) = match credentials {
            Credentials::Password { username, password } => (username, password),
            Credentials::KeyPair { .. } => {
                return Err(ConfigError::UnsupportedAuth {
                    protocol: config.protocol.to_string(),
                    auth: config.auth_type.to_string(),
                })
            }
        };

        let zone = config.required_option(options::IRODS_ZONE)?;
        let home = match config.option(options::IRODS_HOME_DIR) {
            Some(home) => sanitize(home),
            None => format!("/{}/home/{}", zone.trim_matches('/'), username),
        };

        let authority = match config.port.or(url.port) {
            Some(port) => format!("{}:{}", url.host, port),
            None => url.host.clone(),
        };

        Ok(Self {
            base_url: format!("{}://{}{}", scheme, authority, url.path.trim_end_matches('/')),
            server: authority,
            home,
            username,
            password,
            timeout: options.timeout,
        })
    }

    /// HTTP API base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn connection_failed(&self, reason: String) -> NfsError {
        NfsError::ConnectionFailed {
            server: self.server.clone(),
            reason,
        }
    }
}

impl IrodsConnector for IrodsHttpConnector {
    type Session = IrodsHttpSession;

    fn server(&self) -> &str {
        &self.server
    }

    fn home_collection(&self) -> &str {
        &self.home
    }

    fn connect(&self) -> NfsResult<IrodsHttpSession> {
        debug!("Authenticating {} against {}", self.username, self.base_url);
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| self.connection_failed(e.to_string()))?;

        let response = client
            .post(format!("{}/authenticate", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .map_err(|e| self.connection_failed(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(NfsError::Auth {
                    server: self.server.clone(),
                    username: self.username.clone(),
                    reason: "Credentials rejected".into(),
                })
            }
            status => {
                return Err(self.connection_failed(format!("Authentication returned {}", status)))
            }
        }

        let token = response
            .text()
            .map_err(|e| self.connection_failed(e.to_string()))?
            .trim()
            .to_string();

        Ok(IrodsHttpSession {
            client,
            base_url: self.base_url.clone(),
            server: self.server.clone(),
            token: Some(token),
            broken: false,
        })
    }
}

/// GenQuery response body
#[derive(Debug, Deserialize)]
struct QueryResponse {
    irods_response: IrodsStatus,
    #[serde(default)]
    rows: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct IrodsStatus {
    status_code: i64,
    #[serde(default)]
    status_message: Option<String>,
}

/// A bearer-token session against the HTTP API
pub struct IrodsHttpSession {
    client: Client,
    base_url: String,
    server: String,
    token: Option<String>,
    broken: bool,
}

impl IrodsHttpSession {
    fn authorized(&self, request: RequestBuilder) -> NfsResult<RequestBuilder> {
        let token = self.token.as_deref().ok_or_else(|| NfsError::ConnectionFailed {
            server: self.server.clone(),
            reason: "Session is closed".into(),
        })?;
        Ok(request.bearer_auth(token))
    }

    /// Send a request, mapping HTTP failures to NfsError
    fn send(&mut self, request: RequestBuilder, path: &str) -> NfsResult<Response> {
        let result = self.authorized(request)?.send();
        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.broken = true;
                return Err(NfsError::ConnectionFailed {
                    server: self.server.clone(),
                    reason: e.to_string(),
                });
            }
        };

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => {
                // Expired token; the next operation re-authenticates
                self.broken = true;
                Err(NfsError::ConnectionFailed {
                    server: self.server.clone(),
                    reason: "Session token rejected".into(),
                })
            }
            StatusCode::FORBIDDEN => Err(NfsError::PermissionDenied {
                path: path.to_string(),
            }),
            StatusCode::NOT_FOUND => Err(NfsError::NotFound {
                path: path.to_string(),
            }),
            status => Err(NfsError::Protocol(format!("{} returned {}", path, status))),
        }
    }

    /// Run a GenQuery and return every row, page by page
    fn query(&mut self, genquery: &str) -> NfsResult<Vec<Vec<String>>> {
        debug!("GenQuery: {}", genquery);
        collect_pages(PAGE_ROWS, |offset, count| self.query_page(genquery, offset, count))
    }

    /// Fetch the rows of one page starting at `offset`
    fn query_page(&mut self, genquery: &str, offset: usize, count: usize) -> NfsResult<Vec<Vec<String>>> {
        let offset = offset.to_string();
        let count = count.to_string();
        let request = self.client.get(format!("{}/query", self.base_url)).query(&[
            ("op", "execute_genquery"),
            ("query", genquery),
            ("offset", offset.as_str()),
            ("count", count.as_str()),
        ]);
        let response = self.send(request, genquery)?;

        let body: QueryResponse = response
            .json()
            .map_err(|e| NfsError::Protocol(format!("Malformed GenQuery response: {}", e)))?;

        match body.irods_response.status_code {
            0 => Ok(body.rows),
            CAT_NO_ROWS_FOUND => Ok(Vec::new()),
            code => Err(NfsError::Protocol(format!(
                "GenQuery failed with status {}: {}",
                code,
                body.irods_response.status_message.unwrap_or_default()
            ))),
        }
    }

    fn collections(&mut self, condition: &str) -> NfsResult<Vec<IrodsEntry>> {
        self.query(&format!("SELECT {} WHERE {}", COLLECTION_COLUMNS, condition))?
            .iter()
            .map(|row| parse_collection_row(row))
            .collect()
    }

    fn data_objects(&mut self, condition: &str) -> NfsResult<Vec<IrodsEntry>> {
        self.query(&format!("SELECT {} WHERE {}", DATA_COLUMNS, condition))?
            .iter()
            .map(|row| parse_data_row(row))
            .collect()
    }
}

impl RemoteSession for IrodsHttpSession {
    fn is_alive(&mut self) -> bool {
        !self.broken && self.token.is_some()
    }

    fn close(&mut self) {
        self.token = None;
    }
}

impl IrodsSession for IrodsHttpSession {
    fn list_collection(&mut self, collection: &str) -> NfsResult<Vec<IrodsEntry>> {
        let literal = quoted(collection)?;
        let mut entries: Vec<IrodsEntry> = self
            .collections(&format!("COLL_PARENT_NAME = {}", literal))?
            .into_iter()
            .filter(|e| e.path != collection)
            .collect();
        entries.extend(self.data_objects(&format!("COLL_NAME = {}", literal))?);
        Ok(entries)
    }

    fn find_by_id(&mut self, id: i64) -> NfsResult<Vec<IrodsEntry>> {
        let data = self.data_objects(&format!("DATA_ID = '{}'", id))?;
        if !data.is_empty() {
            return Ok(data);
        }
        self.collections(&format!("COLL_ID = '{}'", id))
    }

    fn find_by_path(&mut self, path: &str) -> NfsResult<Vec<IrodsEntry>> {
        if let Some(parent) = parent_path(path) {
            let data = self.data_objects(&format!(
                "COLL_NAME = {} AND DATA_NAME = {}",
                quoted(&parent)?,
                quoted(file_name(path))?
            ))?;
            if !data.is_empty() {
                return Ok(data);
            }
        }
        self.collections(&format!("COLL_NAME = {}", quoted(path)?))
    }

    fn open(&mut self, path: &str) -> NfsResult<Box<dyn Read + Send>> {
        let request = self
            .client
            .get(format!("{}/data-objects", self.base_url))
            .query(&[("op", "read"), ("lpath", path)]);
        let response = self.send(request, path)?;
        Ok(Box::new(response))
    }
}

/// Keep fetching pages until one comes back empty
///
/// A short page is not the end: the server caps `count` at its own
/// per-query row limit.
fn collect_pages<F>(count: usize, mut fetch: F) -> NfsResult<Vec<Vec<String>>>
where
    F: FnMut(usize, usize) -> NfsResult<Vec<Vec<String>>>,
{
    let mut rows = Vec::new();
    loop {
        let page = fetch(rows.len(), count)?;
        if page.is_empty() {
            return Ok(rows);
        }
        rows.extend(page);
    }
}

/// GenQuery string literal; single quotes cannot be escaped
fn quoted(value: &str) -> NfsResult<String> {
    if value.contains('\'') {
        return Err(NfsError::InvalidTarget(format!(
            "iRODS paths cannot contain single quotes: {}",
            value
        )));
    }
    Ok(format!("'{}'", value))
}

fn column<'a>(row: &'a [String], index: usize) -> NfsResult<&'a str> {
    row.get(index)
        .map(|s| s.as_str())
        .ok_or_else(|| NfsError::Protocol(format!("GenQuery row has {} columns", row.len())))
}

fn parse_number(row: &[String], index: usize) -> NfsResult<i64> {
    let value = column(row, index)?;
    value
        .trim()
        .parse()
        .map_err(|_| NfsError::Protocol(format!("Expected a number, got '{}'", value)))
}

/// Catalog times are seconds since the epoch, zero padded
fn parse_modify_time(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok().map(|secs| secs * 1000)
}

/// Parse a `COLL_ID, COLL_NAME, COLL_MODIFY_TIME` row
fn parse_collection_row(row: &[String]) -> NfsResult<IrodsEntry> {
    Ok(IrodsEntry::collection(
        parse_number(row, 0)?,
        column(row, 1)?,
        parse_modify_time(column(row, 2)?),
    ))
}

/// Parse a `DATA_ID, COLL_NAME, DATA_NAME, DATA_SIZE, DATA_MODIFY_TIME` row
fn parse_data_row(row: &[String]) -> NfsResult<IrodsEntry> {
    let size = u64::try_from(parse_number(row, 3)?).unwrap_or(0);
    Ok(IrodsEntry::data_object(
        parse_number(row, 0)?,
        canonical(column(row, 2)?, column(row, 1)?),
        size,
        parse_modify_time(column(row, 4)?),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthType, ProtocolType};

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn config() -> FileSystemConfig {
        FileSystemConfig::new(ProtocolType::Irods, "https://irods.example.org/irods-http-api/0.3.0/")
            .with_option(options::IRODS_ZONE, "tempZone")
    }

    #[test]
    fn test_connector_from_config() {
        let connector = IrodsHttpConnector::new(
            &config(),
            Credentials::password("rods", "rods"),
            &ClientOptions::default(),
        )
        .unwrap();
        assert_eq!(connector.base_url(), "https://irods.example.org/irods-http-api/0.3.0");
        assert_eq!(connector.home_collection(), "/tempZone/home/rods");
        assert_eq!(connector.server(), "irods.example.org");
    }

    #[test]
    fn test_home_override_and_port() {
        let mut cfg = config().with_option(options::IRODS_HOME_DIR, "/tempZone/projects/lab/");
        cfg.port = Some(9000);
        let connector =
            IrodsHttpConnector::new(&cfg, Credentials::password("rods", "rods"), &ClientOptions::default())
                .unwrap();
        assert_eq!(connector.home_collection(), "/tempZone/projects/lab");
        assert_eq!(connector.base_url(), "https://irods.example.org:9000/irods-http-api/0.3.0");
    }

    #[test]
    fn test_config_errors() {
        let no_zone = FileSystemConfig::new(ProtocolType::Irods, "https://irods.example.org");
        assert!(matches!(
            IrodsHttpConnector::new(&no_zone, Credentials::password("rods", "rods"), &ClientOptions::default()),
            Err(ConfigError::MissingOption { .. })
        ));

        let keyed = config().with_auth_type(AuthType::Pubkey);
        assert!(matches!(
            IrodsHttpConnector::new(&keyed, Credentials::key_pair("rods", "key", None), &ClientOptions::default()),
            Err(ConfigError::UnsupportedAuth { .. })
        ));

        let ftp = FileSystemConfig::new(ProtocolType::Irods, "ftp://irods.example.org")
            .with_option(options::IRODS_ZONE, "tempZone");
        assert!(IrodsHttpConnector::new(&ftp, Credentials::password("rods", "rods"), &ClientOptions::default())
            .is_err());
    }

    #[test]
    fn test_parse_rows() {
        let coll = parse_collection_row(&row(&["10012", "/tempZone/home/rods/runs", "01700000000"])).unwrap();
        assert!(coll.is_collection());
        assert_eq!(coll.name(), "runs");
        assert_eq!(coll.modified_millis, Some(1_700_000_000_000));

        let data = parse_data_row(&row(&["10294", "/tempZone/home/rods", "a.txt", "1024", "01600000000"]))
            .unwrap();
        assert_eq!(data.path, "/tempZone/home/rods/a.txt");
        assert_eq!(data.size, 1024);
        assert_eq!(data.id, 10294);

        assert!(parse_data_row(&row(&["x", "/z", "a", "1", "0"])).is_err());
        assert!(parse_collection_row(&row(&["1"])).is_err());
    }

    #[test]
    fn test_collect_pages() {
        let pages = vec![
            vec![row(&["1", "/z/a", "0"]), row(&["2", "/z/b", "0"])],
            vec![row(&["3", "/z/c", "0"])],
            vec![],
        ];
        let mut offsets = Vec::new();
        let rows = collect_pages(2, |offset, count| {
            assert_eq!(count, 2);
            offsets.push(offset);
            Ok(pages[offsets.len() - 1].clone())
        })
        .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2][0], "3");
        assert_eq!(offsets, vec![0, 2, 3]);
    }

    #[test]
    fn test_collect_pages_stops_on_error() {
        let mut calls = 0;
        let result = collect_pages(2, |_, _| {
            calls += 1;
            if calls == 1 {
                Ok(vec![row(&["1"]), row(&["2"])])
            } else {
                Err(NfsError::Protocol("GenQuery failed".into()))
            }
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_quoted() {
        assert_eq!(quoted("/tempZone/home").unwrap(), "'/tempZone/home'");
        assert!(quoted("/tempZone/it's").unwrap_err().is_precondition());
    }

    #[test]
    fn test_query_response_parsing() {
        let body: QueryResponse = serde_json::from_str(
            r#"{"irods_response":{"status_code":0},"rows":[["1","/z","01"]]}"#,
        )
        .unwrap();
        assert_eq!(body.rows.len(), 1);

        let empty: QueryResponse =
            serde_json::from_str(r#"{"irods_response":{"status_code":-808000}}"#).unwrap();
        assert!(empty.rows.is_empty());
    }
}
