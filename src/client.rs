//! HTTP client for the building gateway's bulk object service.
//!
//! - Blocking client using `ureq` (no async).
//! - Basic authentication on every request.
//! - Bulk read / bulk write of point references, plus the stat views endpoint
//!   that returns a stat representation document.
//!
//! Request failures never surface as `Err` from the bulk calls: they are
//! folded into a [`BulkResponse`] carrying the HTTP status (0 when the
//! request never produced one) so the sync cycles can classify them.

use crate::models::status::ConnectionError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const BULK_READ_PATH: &str = "/api/.bulk/read";
const BULK_WRITE_PATH: &str = "/api/.bulk/write";
const VIEWS_PATH: &str = "/api/.views";
const PING_PATH: &str = "/api/.bacnet";
/// Status reported for requests that failed before any HTTP status arrived.
pub const TRANSPORT_FAILURE: u16 = 0;

#[derive(Debug)]
pub enum ClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_json::Error),
}

impl ClientError {
    /// HTTP status to classify; transport failures report [`TRANSPORT_FAILURE`].
    pub fn status(&self) -> u16 {
        match self {
            ClientError::Http { status, .. } => *status,
            _ => TRANSPORT_FAILURE,
        }
    }
}

impl core::fmt::Display for ClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ClientError::Transport(s) => write!(f, "transport error: {}", s),
            ClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            ClientError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<serde_json::Error> for ClientError {
    fn from(value: serde_json::Error) -> Self {
        ClientError::Json(value)
    }
}

impl From<ureq::Error> for ClientError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::Transport(t) => ClientError::Transport(t.to_string()),
            ureq::Error::Status(status, resp) => {
                let body = resp.into_string().unwrap_or_else(|_| String::from("<no body>"));
                ClientError::Http { status, message: body }
            }
        }
    }
}

/// Per-reference entry of a bulk response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointResult {
    pub value: Option<String>,
    pub error_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub status: u16,
    /// Error attached to the whole request rather than a single point.
    pub error_text: Option<String>,
    pub values: BTreeMap<String, PointResult>,
}

impl BulkResponse {
    pub fn ok(values: BTreeMap<String, PointResult>) -> Self {
        BulkResponse {
            status: 200,
            error_text: None,
            values,
        }
    }

    pub fn failed(status: u16) -> Self {
        BulkResponse {
            status,
            ..Default::default()
        }
    }
}

/// Remote side of the sync engine.
pub trait Gateway: Send + Sync {
    /// Check that the server is reachable and accepts the credentials.
    fn connect(&self) -> Result<(), ConnectionError>;
    fn bulk_read(&self, references: &BTreeSet<String>) -> BulkResponse;
    fn bulk_write(&self, values: &BTreeMap<String, String>) -> BulkResponse;
    /// Fetch the representation document of a named stat.
    fn get_stat(&self, name: &str) -> Result<Value, ClientError>;
}

pub struct EwebClient {
    agent: ureq::Agent,
    base_url: String,
    authorization: String,
}

impl EwebClient {
    pub fn new(url: &str, username: &str, password: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        EwebClient {
            agent,
            base_url: normalize_base_url(url),
            authorization: format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password))),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn get(&self, path: &str) -> ureq::Request {
        self.agent
            .get(&self.url(path))
            .set("Accept", "application/json")
            .set("Authorization", &self.authorization)
            .query("alt", "json")
    }

    fn post_bulk(&self, path: &str, body: Value) -> BulkResponse {
        let resp = self
            .agent
            .post(&self.url(path))
            .set("Accept", "application/json")
            .set("Authorization", &self.authorization)
            .send_json(body);
        match resp {
            Ok(r) => {
                let status = r.status();
                match parse_bulk_body(status, r.into_reader()) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        log::warn!("{} returned an unreadable body: {}", path, e);
                        BulkResponse::failed(TRANSPORT_FAILURE)
                    }
                }
            }
            Err(e) => {
                let e = ClientError::from(e);
                log::debug!("{} failed: {}", path, e);
                BulkResponse::failed(e.status())
            }
        }
    }
}

impl Gateway for EwebClient {
    fn connect(&self) -> Result<(), ConnectionError> {
        let status = match self.get(PING_PATH).call() {
            Ok(r) => r.status(),
            Err(e) => ClientError::from(e).status(),
        };
        match ConnectionError::from_status(status) {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn bulk_read(&self, references: &BTreeSet<String>) -> BulkResponse {
        self.post_bulk(BULK_READ_PATH, json!({ "references": references }))
    }

    fn bulk_write(&self, values: &BTreeMap<String, String>) -> BulkResponse {
        self.post_bulk(BULK_WRITE_PATH, json!({ "values": values }))
    }

    fn get_stat(&self, name: &str) -> Result<Value, ClientError> {
        let res = self.get(&format!("{}/{}", VIEWS_PATH, name)).call()?;
        Ok(serde_json::from_reader(res.into_reader())?)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBulk {
    #[serde(default)]
    error_text: Option<String>,
    #[serde(default)]
    values: BTreeMap<String, WirePoint>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePoint {
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    error_text: Option<String>,
}

/// Decode a bulk response body. Scalars are accepted as values; anything else
/// is treated as no value.
pub fn parse_bulk_body(status: u16, reader: impl std::io::Read) -> Result<BulkResponse, serde_json::Error> {
    let WireBulk { error_text, values } = serde_json::from_reader(reader)?;
    let values = values
        .into_iter()
        .map(|(reference, p)| {
            let value = p.value.and_then(|v| match v {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            });
            (
                reference,
                PointResult {
                    value,
                    error_text: p.error_text,
                },
            )
        })
        .collect();
    Ok(BulkResponse {
        status,
        error_text: error_text.filter(|t| !t.is_empty()),
        values,
    })
}

/// Servers are often entered without a scheme; plain http is assumed then.
pub fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.is_empty() || url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}
