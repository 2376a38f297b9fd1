// Push gateway client
//
// Pushes the rendered exposition text of a registry to a Prometheus push
// gateway, grouped by job and optional grouping labels.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use reqwest::blocking::Client;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MetricsError, Result};
use crate::names::MetricLabelNames;
use crate::registry::CollectorRegistry;
use crate::render::MIME_TYPE;

fn default_address() -> String {
    "http://127.0.0.1:9091".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

/// Push gateway section of the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushGatewayConfig {
    /// Base address; `http://` is assumed when no scheme is given
    #[serde(default = "default_address")]
    pub address: String,

    /// Whole-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PushGatewayConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

pub struct PushGateway {
    address: String,
    client: Client,
}

impl PushGateway {
    pub fn new(address: impl Into<String>) -> Result<Self> {
        Self::from_config(&PushGatewayConfig {
            address: address.into(),
            ..Default::default()
        })
    }

    pub fn from_config(config: &PushGatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| MetricsError::PushGateway(format!("failed to build client: {}", e)))?;

        let address = config.address.trim_end_matches('/');
        let address = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        Ok(Self { address, client })
    }

    /// Replaces every metric in the group (HTTP PUT)
    pub fn push(
        &self,
        registry: &CollectorRegistry,
        job: &str,
        grouping: &[(&str, &str)],
    ) -> Result<()> {
        let body = registry.render()?;
        self.send(Method::PUT, job, grouping, Some(body))
    }

    /// Replaces only metrics with the same names in the group (HTTP POST)
    pub fn push_add(
        &self,
        registry: &CollectorRegistry,
        job: &str,
        grouping: &[(&str, &str)],
    ) -> Result<()> {
        let body = registry.render()?;
        self.send(Method::POST, job, grouping, Some(body))
    }

    /// Deletes every metric in the group (HTTP DELETE)
    pub fn delete(&self, job: &str, grouping: &[(&str, &str)]) -> Result<()> {
        self.send(Method::DELETE, job, grouping, None)
    }

    /// Builds `{address}/metrics/job/{job}[/{label}/{value}]...`
    pub fn group_url(&self, job: &str, grouping: &[(&str, &str)]) -> Result<String> {
        if job.is_empty() {
            return Err(MetricsError::PushGateway(
                "job name must not be empty".to_string(),
            ));
        }
        MetricLabelNames::new(grouping.iter().map(|(name, _)| *name))?;

        let mut url = format!("{}/metrics/{}", self.address, path_pair("job", job));
        for (name, value) in grouping {
            url.push('/');
            url.push_str(&path_pair(name, value));
        }
        Ok(url)
    }

    fn send(
        &self,
        method: Method,
        job: &str,
        grouping: &[(&str, &str)],
        body: Option<String>,
    ) -> Result<()> {
        let url = self.group_url(job, grouping)?;
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, MIME_TYPE)
                .body(body);
        }

        let response = request.send().map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Push gateway request failed");
            MetricsError::PushGateway(format!("{} {} failed: {}", method, url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetricsError::PushGateway(format!(
                "{} {} returned status {}",
                method, url, status
            )));
        }
        tracing::debug!(method = %method, url = %url, status = status.as_u16(), "Pushed metrics");
        Ok(())
    }
}

/// Encodes one `name/value` pair of the grouping path
///
/// Values containing `/` or empty values use the gateway's `@base64` form,
/// since neither survives as a plain path segment.
fn path_pair(name: &str, value: &str) -> String {
    if value.is_empty() {
        format!("{}@base64/=", name)
    } else if value.contains('/') {
        format!("{}@base64/{}", name, URL_SAFE.encode(value))
    } else {
        format!("{}/{}", name, urlencoding::encode(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    /// Accepts one request, answers with `status`, returns the request line
    /// and body
    fn one_shot_server(status: &'static str) -> (String, thread::JoinHandle<(String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut content_length = 0;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                if header == "\r\n" || header.is_empty() {
                    break;
                }
                let lower = header.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
            }
            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).unwrap();

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                status
            )
            .unwrap();
            (
                request_line.trim_end().to_string(),
                String::from_utf8(body).unwrap(),
            )
        });
        (address, handle)
    }

    fn registry_with_counter() -> CollectorRegistry {
        let registry = CollectorRegistry::new(Arc::new(InMemoryStore::new()));
        registry
            .register_counter("", "jobs_total", "Jobs", &[])
            .unwrap()
            .inc(&[])
            .unwrap();
        registry
    }

    #[test]
    fn test_group_url_encodes_segments() {
        let gateway = PushGateway::new("gateway:9091/").unwrap();
        assert_eq!(
            gateway.group_url("batch job", &[("instance", "host-1")]).unwrap(),
            "http://gateway:9091/metrics/job/batch%20job/instance/host-1"
        );
        assert_eq!(
            gateway.group_url("job", &[("path", "/var/tmp")]).unwrap(),
            "http://gateway:9091/metrics/job/job/path@base64/L3Zhci90bXA="
        );
        assert_eq!(
            gateway.group_url("job", &[("zone", "")]).unwrap(),
            "http://gateway:9091/metrics/job/job/zone@base64/="
        );
    }

    #[test]
    fn test_group_url_rejects_bad_input() {
        let gateway = PushGateway::new("http://gateway:9091").unwrap();
        assert!(matches!(
            gateway.group_url("", &[]),
            Err(MetricsError::PushGateway(_))
        ));
        assert!(matches!(
            gateway.group_url("job", &[("bad-label", "x")]),
            Err(MetricsError::InvalidLabelName(_))
        ));
    }

    #[test]
    fn test_push_sends_rendered_text() {
        let (address, server) = one_shot_server("202 Accepted");
        let gateway = PushGateway::new(address).unwrap();
        gateway
            .push(&registry_with_counter(), "nightly", &[("shard", "3")])
            .unwrap();

        let (request_line, body) = server.join().unwrap();
        assert_eq!(request_line, "PUT /metrics/job/nightly/shard/3 HTTP/1.1");
        assert!(body.contains("jobs_total 1\n"));
    }

    #[test]
    fn test_push_add_uses_post() {
        let (address, server) = one_shot_server("200 OK");
        let gateway = PushGateway::new(address).unwrap();
        gateway
            .push_add(&registry_with_counter(), "nightly", &[])
            .unwrap();
        let (request_line, _) = server.join().unwrap();
        assert!(request_line.starts_with("POST /metrics/job/nightly "));
    }

    #[test]
    fn test_non_success_status_is_an_error() {
        let (address, server) = one_shot_server("500 Internal Server Error");
        let gateway = PushGateway::new(address).unwrap();
        let err = gateway.delete("nightly", &[]).unwrap_err();
        assert!(matches!(err, MetricsError::PushGateway(ref msg) if msg.contains("500")));
        let (request_line, body) = server.join().unwrap();
        assert!(request_line.starts_with("DELETE "));
        assert!(body.is_empty());
    }

    #[test]
    fn test_unreachable_gateway_is_an_error() {
        let gateway = PushGateway::from_config(&PushGatewayConfig {
            address: "http://127.0.0.1:1".to_string(),
            timeout_ms: 500,
        })
        .unwrap();
        assert!(matches!(
            gateway.delete("nightly", &[]),
            Err(MetricsError::PushGateway(_))
        ));
    }
}
