// HTTP Transport
// reqwest-backed transport, one client per in-flight suite

use crate::collaborators::{HttpTransport, TransportFactory};
use crate::error::TransportError;
use crate::model::{HttpResult, RequestDetails, RequestSpec, ResponseDetails};
use crate::value::ValueExt;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Certificate, Client, Method};
use serde_json::Value;
use tracing::debug;

/// Join a request URL onto a base URL unless it is already absolute
pub fn resolve_url(base_url: Option<&str>, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    match base_url {
        Some(base) if !base.is_empty() => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        ),
        _ => url.to_string(),
    }
}

/// Transport bound to one base URL
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Option<String>,
}

impl ReqwestTransport {
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn request_details(&self, request: &RequestSpec) -> RequestDetails {
        RequestDetails {
            method: request.method.to_uppercase(),
            url: resolve_url(self.base_url.as_deref(), &request.url),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.as_display_string()))
                .collect(),
            body: request.body.clone(),
        }
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute_request(&self, step_name: &str, request: &RequestSpec) -> HttpResult {
        let details = self.request_details(request);
        let start = Instant::now();

        let method = match Method::from_bytes(details.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return HttpResult::failure(
                    details.clone(),
                    TransportError::InvalidRequest(format!("unknown method '{}'", request.method))
                        .to_string(),
                    0,
                )
            }
        };

        let mut builder = self.client.request(method, &details.url);
        for (name, value) in &details.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.params.is_empty() {
            let query: Vec<(String, String)> = request
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.as_display_string()))
                .collect();
            builder = builder.query(&query);
        }
        match &request.body {
            Some(Value::String(text)) => builder = builder.body(text.clone()),
            Some(body) => builder = builder.json(body),
            None => {}
        }
        if let Some(timeout_ms) = request.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }

        debug!(step = step_name, method = %details.method, url = %details.url, "sending request");

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                let elapsed = start.elapsed().as_millis() as u64;
                return HttpResult::failure(
                    details,
                    TransportError::Request(err.to_string()).to_string(),
                    elapsed,
                );
            }
        };

        let status_code = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();

        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => {
                let elapsed = start.elapsed().as_millis() as u64;
                return HttpResult::failure(
                    details,
                    TransportError::Request(err.to_string()).to_string(),
                    elapsed,
                );
            }
        };
        let elapsed = start.elapsed().as_millis() as u64;

        let size_bytes = text.len();
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        debug!(step = step_name, status_code, elapsed_ms = elapsed, "received response");

        HttpResult::success(
            details,
            ResponseDetails {
                status_code,
                headers,
                body,
                size_bytes,
            },
            elapsed,
        )
    }
}

/// Builds a fresh reqwest client per suite
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransportFactory {
    ca_cert: Option<(PathBuf, Certificate)>,
}

impl ReqwestTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust an additional PEM encoded root certificate
    pub fn with_ca_cert(mut self, path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        let pem = std::fs::read(&path).map_err(|source| TransportError::Certificate {
            path: path.clone(),
            source,
        })?;
        let certificate = Certificate::from_pem(&pem)
            .map_err(|e| TransportError::Client(format!("{}: {}", path.display(), e)))?;
        self.ca_cert = Some((path, certificate));
        Ok(self)
    }

    pub fn ca_cert_path(&self) -> Option<&Path> {
        self.ca_cert.as_ref().map(|(path, _)| path.as_path())
    }
}

impl TransportFactory for ReqwestTransportFactory {
    fn create(
        &self,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Arc<dyn HttpTransport>, TransportError> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some((_, certificate)) = &self.ca_cert {
            builder = builder.add_root_certificate(certificate.clone());
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Arc::new(ReqwestTransport::new(
            client,
            base_url.map(str::to_string),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url(Some("https://api.test/"), "/users/1"),
            "https://api.test/users/1"
        );
        assert_eq!(
            resolve_url(Some("https://api.test"), "users"),
            "https://api.test/users"
        );
        assert_eq!(
            resolve_url(Some("https://api.test"), "http://other.test/x"),
            "http://other.test/x"
        );
        assert_eq!(resolve_url(None, "/health"), "/health");
    }

    #[test]
    fn test_request_details() {
        let transport = ReqwestTransport::new(Client::new(), Some("https://api.test".into()));
        let request = RequestSpec::new("post", "/login")
            .with_header("X-Count", "3")
            .with_body(json!({"user": "ada"}));

        let details = transport.request_details(&request);
        assert_eq!(details.method, "POST");
        assert_eq!(details.url, "https://api.test/login");
        assert_eq!(details.headers["X-Count"], "3");
        assert_eq!(details.body, Some(json!({"user": "ada"})));
    }

    #[test]
    fn test_missing_certificate() {
        let result = ReqwestTransportFactory::new().with_ca_cert("/definitely/missing.pem");
        assert!(matches!(result, Err(TransportError::Certificate { .. })));
    }

    #[tokio::test]
    async fn test_invalid_method_is_a_failed_result() {
        let transport = ReqwestTransport::new(Client::new(), None);
        let result = transport
            .execute_request("bad", &RequestSpec::new("NOT A METHOD", "http://localhost"))
            .await;
        assert!(result.status.is_failure());
        assert!(result.error_message.unwrap().contains("unknown method"));
    }
}
