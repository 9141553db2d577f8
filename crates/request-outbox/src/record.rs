//! Request records: what gets queued and sent.

use crate::{OutboxError, OutboxResult};
use engage_database::{NewQueuedRequest, QueuedRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Identifier of a request, stable for the lifetime of its record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unsupported HTTP method: {other}")),
        }
    }
}

/// One pending network call.
///
/// Records are built once and never mutated after they are queued; the
/// builder methods consume `self` so a queued record has no `&mut` access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    id: RequestId,
    method: HttpMethod,
    url: Url,
    headers: BTreeMap<String, String>,
    body: Option<String>,
    created_at: i64,
    ttl: Option<Duration>,
}

impl RequestRecord {
    /// New record with a fresh id, created now.
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            method,
            url,
            headers: BTreeMap::new(),
            body: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            ttl: None,
        }
    }

    pub fn post(url: Url) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = id;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `payload` as the body and set the JSON content type.
    pub fn with_json_body<T: Serialize>(self, payload: &T) -> OutboxResult<Self> {
        let body = serde_json::to_string(payload)?;
        Ok(self
            .with_header("Content-Type", "application/json")
            .with_body(body))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_created_at(mut self, created_at_ms: i64) -> Self {
        self.created_at = created_at_ms;
        self
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Age at `now_ms`, never negative.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.created_at).max(0)
    }

    /// Whether the record has outlived its ttl at `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match self.ttl {
            Some(ttl) => self.age_ms(now_ms) > ttl_millis(ttl),
            None => false,
        }
    }

    pub(crate) fn to_new_row(&self) -> NewQueuedRequest {
        NewQueuedRequest {
            request_id: self.id.as_str().to_string(),
            method: self.method.as_str().to_string(),
            url: self.url.to_string(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            created_at: self.created_at,
            ttl_ms: self.ttl.map(ttl_millis),
        }
    }
}

pub(crate) fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

impl TryFrom<QueuedRequest> for RequestRecord {
    type Error = OutboxError;

    fn try_from(row: QueuedRequest) -> Result<Self, Self::Error> {
        let method = row
            .method
            .parse::<HttpMethod>()
            .map_err(|e| OutboxError::InvalidRecord(row.request_id.clone(), e))?;
        let url = Url::parse(&row.url)
            .map_err(|e| OutboxError::InvalidRecord(row.request_id.clone(), e.to_string()))?;
        let headers = row
            .decode_headers()
            .map_err(|e| OutboxError::InvalidRecord(row.request_id.clone(), format!("headers: {e}")))?;
        let ttl = row
            .ttl_ms
            .map(|ms| Duration::from_millis(u64::try_from(ms).unwrap_or(0)));

        Ok(Self {
            id: RequestId::from(row.request_id),
            method,
            url,
            headers,
            body: row.body,
            created_at: row.created_at,
            ttl,
        })
    }
}
