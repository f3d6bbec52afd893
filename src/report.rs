use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{DeviceConfig, ReportConfig};
use crate::types::{AgentMetrics, CheckResult, LogEntry};

/// All outbound requests share one client with this timeout
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Heartbeat body; metadata mirrors what the ingestion service stores per device
#[derive(Debug, Serialize)]
struct AgentHeartbeatRequest<'a> {
    hostname: &'a str,
    ip_address: &'a str,
    tags: &'a [String],
    agent_version: &'a str,
    device_name: &'a str,
    metadata: HeartbeatMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct HeartbeatMetadata<'a> {
    location: &'a str,
    environment: &'a str,
    status: &'a str,
}

/// Ships check results, metrics samples, heartbeats, and log batches to the
/// upstream ingestion service. Failures are logged and dropped; nothing is
/// queued or retried.
#[derive(Clone)]
pub struct Reporter {
    client: reqwest::Client,
    send_to: String,
    token: String,
    device: DeviceConfig,
}

impl Reporter {
    pub fn new(report: &ReportConfig, device: &DeviceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            send_to: report.send_to.trim_end_matches('/').to_string(),
            token: report.token.clone(),
            device: device.clone(),
        })
    }

    /// The shared HTTP client; probe executors reuse it
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn is_configured(&self) -> bool {
        !self.send_to.is_empty() && !self.token.is_empty()
    }

    /// POST a single check result to the upstream root endpoint
    pub async fn report_check(&self, result: &CheckResult) {
        if !self.is_configured() {
            return;
        }

        let payload = json!({ "check": result, "token": self.token });
        let response = self
            .client
            .post(&self.send_to)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                debug!(check = %result.name, "reported check result");
            }
            Ok(resp) => {
                warn!(check = %result.name, status = %resp.status(), "check report rejected");
            }
            Err(e) => {
                warn!(check = %result.name, error = %e, "failed to send check report");
            }
        }
    }

    /// POST a batch of accepted log entries to `/agent/logs`
    pub async fn report_logs(&self, entries: &[LogEntry]) {
        if entries.is_empty() || !self.is_configured() {
            return;
        }

        let payload = json!({
            "logs": entries,
            "token": self.token,
            "type": "logs",
        });
        let url = format!("{}/agent/logs", self.send_to);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                debug!(count = entries.len(), "reported log entries");
            }
            Ok(resp) => {
                warn!(count = entries.len(), status = %resp.status(), "log report rejected");
            }
            Err(e) => {
                warn!(count = entries.len(), error = %e, "failed to send log report");
            }
        }
    }

    /// POST one metrics sample to `/agent/metrics`
    pub async fn report_metrics(&self, metrics: &AgentMetrics) {
        if !self.is_configured() {
            return;
        }

        let url = format!("{}/agent/metrics", self.send_to);
        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.token)
            .json(metrics)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                debug!(hostname = %metrics.hostname, "reported system metrics");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "metrics report rejected");
            }
            Err(e) => {
                warn!(error = %e, "failed to send metrics report");
            }
        }
    }

    /// POST a liveness heartbeat to `/agent/heartbeat`
    pub async fn send_heartbeat(&self, hostname: &str, ip_address: &str) {
        if !self.is_configured() {
            return;
        }

        let payload = AgentHeartbeatRequest {
            hostname,
            ip_address,
            tags: &self.device.tags,
            agent_version: env!("CARGO_PKG_VERSION"),
            device_name: &self.device.name,
            metadata: HeartbeatMetadata {
                location: &self.device.location,
                environment: &self.device.environment,
                status: "alive",
            },
        };

        let url = format!("{}/agent/heartbeat", self.send_to);
        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.token)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                debug!(hostname, "sent heartbeat");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "heartbeat rejected");
            }
            Err(e) => {
                warn!(error = %e, "failed to send heartbeat");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CheckStatus;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::Router;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<(String, HeaderMap, serde_json::Value)>>>,
    }

    async fn start_capture_server(captured: Captured) -> String {
        async fn handler(
            State(captured): State<Captured>,
            axum::extract::OriginalUri(uri): axum::extract::OriginalUri,
            headers: HeaderMap,
            axum::Json(body): axum::Json<serde_json::Value>,
        ) -> &'static str {
            captured
                .requests
                .lock()
                .unwrap()
                .push((uri.path().to_string(), headers, body));
            "ok"
        }

        let app = Router::new()
            .route("/", post(handler))
            .route("/agent/logs", post(handler))
            .route("/agent/metrics", post(handler))
            .route("/agent/heartbeat", post(handler))
            .with_state(captured);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn reporter_for(url: &str) -> Reporter {
        let report: ReportConfig = serde_yaml::from_str(&format!(
            "{{ send_to: {url:?}, token: test-token }}"
        ))
        .unwrap();
        let device: DeviceConfig = serde_yaml::from_str(
            "{ name: dev-1, location: lab, environment: test, tags: [a, b] }",
        )
        .unwrap();
        Reporter::new(&report, &device).unwrap()
    }

    #[tokio::test]
    async fn logs_report_carries_bearer_auth_and_payload_shape() {
        let captured = Captured::default();
        let url = start_capture_server(captured.clone()).await;
        let reporter = reporter_for(&url);

        let entry = LogEntry {
            source: "syslog".into(),
            kind: "file".into(),
            container: None,
            content: "something happened".into(),
            timestamp: Utc::now(),
            level: None,
            hash: "deadbeef".into(),
        };
        reporter.report_logs(&[entry]).await;

        let requests = captured.requests.lock().unwrap();
        let (path, headers, body) = &requests[0];
        assert_eq!(path, "/agent/logs");
        assert_eq!(
            headers.get("authorization").unwrap(),
            "Bearer test-token"
        );
        assert_eq!(body["type"], "logs");
        assert_eq!(body["token"], "test-token");
        assert_eq!(body["logs"][0]["source"], "syslog");
        assert_eq!(body["logs"][0]["type"], "file");
        assert_eq!(body["logs"][0]["content"], "something happened");
        // Local bookkeeping stays local
        assert!(body["logs"][0].get("hash").is_none());
    }

    #[tokio::test]
    async fn metrics_report_uses_api_key_header() {
        let captured = Captured::default();
        let url = start_capture_server(captured.clone()).await;
        let reporter = reporter_for(&url);

        let metrics = AgentMetrics {
            hostname: "host-1".into(),
            ip_address: "10.0.0.2".into(),
            cpu_usage: 12.5,
            memory_usage: 40.0,
            disk_usage: 70.0,
            load_average: 0.4,
            uptime_seconds: 3600,
            timestamp: Utc::now(),
            custom_metrics: Default::default(),
        };
        reporter.report_metrics(&metrics).await;

        let requests = captured.requests.lock().unwrap();
        let (path, headers, body) = &requests[0];
        assert_eq!(path, "/agent/metrics");
        assert_eq!(headers.get("x-api-key").unwrap(), "test-token");
        assert_eq!(body["hostname"], "host-1");
        assert_eq!(body["uptime_seconds"], 3600);
    }

    #[tokio::test]
    async fn heartbeat_includes_device_identity() {
        let captured = Captured::default();
        let url = start_capture_server(captured.clone()).await;
        let reporter = reporter_for(&url);

        reporter.send_heartbeat("host-1", "10.0.0.2").await;

        let requests = captured.requests.lock().unwrap();
        let (path, headers, body) = &requests[0];
        assert_eq!(path, "/agent/heartbeat");
        assert_eq!(headers.get("x-api-key").unwrap(), "test-token");
        assert_eq!(body["hostname"], "host-1");
        assert_eq!(body["device_name"], "dev-1");
        assert_eq!(body["tags"], serde_json::json!(["a", "b"]));
        assert_eq!(body["metadata"]["status"], "alive");
        assert_eq!(body["metadata"]["location"], "lab");
        assert_eq!(body["metadata"]["environment"], "test");
        assert_eq!(body["agent_version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn check_report_posts_to_root() {
        let captured = Captured::default();
        let url = start_capture_server(captured.clone()).await;
        let reporter = reporter_for(&url);

        let mut result = CheckResult::new("api", "http");
        result.status = CheckStatus::Up;
        result.http_status_code = 204;
        reporter.report_check(&result).await;

        let requests = captured.requests.lock().unwrap();
        let (path, _headers, body) = &requests[0];
        assert_eq!(path, "/");
        assert_eq!(body["token"], "test-token");
        assert_eq!(body["check"]["name"], "api");
        assert_eq!(body["check"]["type"], "http");
        assert_eq!(body["check"]["status"], "up");
        assert_eq!(body["check"]["http_status_code"], 204);
    }

    #[tokio::test]
    async fn nothing_is_sent_without_upstream_config() {
        let captured = Captured::default();
        let url = start_capture_server(captured.clone()).await;

        // Token missing: every send is a silent no-op
        let report: ReportConfig =
            serde_yaml::from_str(&format!("{{ send_to: {url:?} }}")).unwrap();
        let reporter = Reporter::new(&report, &DeviceConfig::default()).unwrap();
        assert!(!reporter.is_configured());

        reporter.send_heartbeat("host", "ip").await;
        reporter.report_logs(&[]).await;
        let mut result = CheckResult::new("api", "http");
        result.status = CheckStatus::Up;
        reporter.report_check(&result).await;

        assert!(captured.requests.lock().unwrap().is_empty());
    }
}
