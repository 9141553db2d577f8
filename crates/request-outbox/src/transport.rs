//! Transport boundary and the reqwest implementation.

use crate::{HttpMethod, OutboxResult, RequestRecord, ResponseModel};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// 2xx response.
    Success(ResponseModel),
    /// Connectivity problem; the record stays queued.
    Retriable(String),
    /// Non-2xx response; terminal.
    Rejected(ResponseModel),
    /// Any other transport failure; terminal.
    Failed(String),
}

/// Performs the network call for a record.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, record: &RequestRecord) -> SendOutcome;
}

/// `Authorization` value for HTTP Basic auth.
pub fn basic_auth_header(username: &str, password: &str) -> String {
    let credentials = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {credentials}")
}

/// reqwest-backed transport.
///
/// Default headers are applied first; a record's own headers win on conflict.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    default_headers: BTreeMap<String, String>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> OutboxResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            default_headers: BTreeMap::new(),
        })
    }

    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    fn merged_headers(&self, record: &RequestRecord) -> BTreeMap<String, String> {
        let mut headers = self.default_headers.clone();
        for (name, value) in record.headers() {
            headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            headers.insert(name.clone(), value.clone());
        }
        headers
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// Connect, timeout and request-level I/O errors are retriable, everything
/// else is terminal.
fn classify_error(error: &reqwest::Error) -> SendOutcome {
    if error.is_connect() || error.is_timeout() || error.is_request() {
        SendOutcome::Retriable(error.to_string())
    } else {
        SendOutcome::Failed(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, record: &RequestRecord) -> SendOutcome {
        let mut request = self
            .client
            .request(reqwest_method(record.method()), record.url().clone());
        for (name, value) in self.merged_headers(record) {
            request = request.header(name, value);
        }
        if let Some(body) = record.body() {
            request = request.body(body.to_string());
        }

        debug!(request_id = %record.id(), method = %record.method(), url = %record.url(), "Sending request");

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(request_id = %record.id(), error = %e, "Request failed");
                return classify_error(&e);
            }
        };

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(request_id = %record.id(), error = %e, "Failed to read response body");
                return classify_error(&e);
            }
        };

        let model = ResponseModel {
            request_id: record.id().clone(),
            status_code: status.as_u16(),
            message: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        debug!(request_id = %record.id(), status = model.status_code, "Response received");

        if status.is_success() {
            SendOutcome::Success(model)
        } else {
            SendOutcome::Rejected(model)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use url::Url;

    /// Serve one canned response and return the raw request text.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if received.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&received).to_string()
        });

        (Url::parse(&format!("http://{addr}/api/users/login")).unwrap(), handle)
    }

    fn transport() -> HttpTransport {
        HttpTransport::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(basic_auth_header("user", "pass"), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_record_headers_override_defaults() {
        let transport = transport()
            .with_default_header("Authorization", "Basic default")
            .with_default_header("X-Client", "engage");
        let record = RequestRecord::post(Url::parse("https://example.com").unwrap())
            .with_header("authorization", "Basic record");

        let merged = transport.merged_headers(&record);
        assert_eq!(merged.get("authorization").map(String::as_str), Some("Basic record"));
        assert!(!merged.contains_key("Authorization"));
        assert_eq!(merged.get("X-Client").map(String::as_str), Some("engage"));
    }

    #[tokio::test]
    async fn test_success_response() {
        let (url, server) = serve_once("200 OK", r#"{"api_me_id":"1"}"#).await;
        let record = RequestRecord::post(url)
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"application_id":"app"}"#);

        let outcome = transport()
            .with_default_header("Authorization", basic_auth_header("app", "secret"))
            .send(&record)
            .await;

        match outcome {
            SendOutcome::Success(response) => {
                assert_eq!(response.status_code, 200);
                assert_eq!(response.message, "OK");
                assert_eq!(response.body, r#"{"api_me_id":"1"}"#);
                assert_eq!(&response.request_id, record.id());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let raw_request = server.await.unwrap();
        assert!(raw_request.starts_with("POST /api/users/login"));
        assert!(raw_request.to_ascii_lowercase().contains("authorization: basic"));
        assert!(raw_request.ends_with(r#"{"application_id":"app"}"#));
    }

    #[tokio::test]
    async fn test_non_2xx_is_rejected() {
        let (url, server) = serve_once("400 Bad Request", "bad payload").await;
        let record = RequestRecord::post(url).with_body("{}");

        let outcome = transport().send(&record).await;
        match outcome {
            SendOutcome::Rejected(response) => {
                assert_eq!(response.status_code, 400);
                assert_eq!(response.body, "bad payload");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_retriable() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let record = RequestRecord::post(Url::parse(&format!("http://{addr}/")).unwrap());
        let outcome = transport().send(&record).await;
        assert!(matches!(outcome, SendOutcome::Retriable(_)), "got {outcome:?}");
    }
}
