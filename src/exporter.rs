use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::fmt::Write;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::DeviceConfig;
use crate::store::ResultStore;
use crate::types::{CheckResult, CheckStatus};

const CONTENT_TYPE_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
struct ExporterState {
    store: ResultStore,
    device: DeviceConfig,
}

/// Serve the text metrics surface on the configured port until shutdown
pub async fn serve(
    port: u16,
    store: ResultStore,
    device: DeviceConfig,
    shutdown: CancellationToken,
) {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(ExporterState { store, device });

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(port, error = %e, "failed to bind metrics exporter");
            return;
        }
    };
    info!(port, "metrics exporter listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;
    if let Err(e) = served {
        error!(error = %e, "metrics exporter terminated");
    }
}

async fn metrics_handler(State(state): State<ExporterState>) -> impl IntoResponse {
    let results = state.store.snapshot();
    let mut values: Vec<&CheckResult> = results.values().collect();
    values.sort_by(|a, b| a.name.cmp(&b.name));

    let body = render(&values, &state.device);
    ([(CONTENT_TYPE, CONTENT_TYPE_TEXT)], body)
}

/// Four families per stored result, in the classic text format
fn render(results: &[&CheckResult], device: &DeviceConfig) -> String {
    let mut out = String::new();
    for result in results {
        let labels = label_set(result, device);
        let status = u8::from(result.status == CheckStatus::Up);

        let _ = writeln!(out, "beacon_check_status{{{labels}}} {status}");
        let _ = writeln!(
            out,
            "beacon_check_duration_seconds{{{labels}}} {:.3}",
            result.duration.as_secs_f64()
        );
        if result.kind == "http" && !result.response_time.is_zero() {
            let _ = writeln!(
                out,
                "beacon_check_response_time_seconds{{{labels}}} {:.3}",
                result.response_time.as_secs_f64()
            );
        }
        let _ = writeln!(
            out,
            "beacon_check_last_check_timestamp{{{labels}}} {}",
            result.timestamp.timestamp()
        );
    }
    out
}

fn label_set(result: &CheckResult, device: &DeviceConfig) -> String {
    let mut labels = format!("name=\"{}\",type=\"{}\"", result.name, result.kind);
    if !device.name.is_empty() {
        let _ = write!(labels, ",device=\"{}\"", device.name);
    }
    if !device.location.is_empty() {
        let _ = write!(labels, ",location=\"{}\"", device.location);
    }
    if !device.environment.is_empty() {
        let _ = write!(labels, ",environment=\"{}\"", device.environment);
    }
    labels
}
