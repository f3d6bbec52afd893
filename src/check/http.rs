use std::time::Instant;

use crate::config::CheckConfig;
use crate::types::{CheckResult, CheckStatus};

/// GET the configured URL and classify the response.
///
/// A URL that cannot be parsed is a configuration problem (`error`); every
/// failure past that point is `down`.
pub async fn execute(client: &reqwest::Client, check: &CheckConfig) -> CheckResult {
    let mut result = CheckResult::new(&check.name, "http");

    let url = match reqwest::Url::parse(&check.url) {
        Ok(url) => url,
        Err(e) => {
            result.status = CheckStatus::Error;
            result.error = format!("failed to create request: {e}");
            return result;
        }
    };

    let start = Instant::now();
    let response = client.get(url).send().await;
    result.response_time = start.elapsed();

    let response = match response {
        Ok(resp) => resp,
        Err(e) => {
            result.status = CheckStatus::Down;
            result.error = format!("request failed: {e}");
            return result;
        }
    };

    let code = response.status().as_u16();
    result.http_status_code = code;

    if check.expect_status > 0 && code != check.expect_status {
        result.status = CheckStatus::Down;
        result.error = format!("expected status {}, got {}", check.expect_status, code);
    } else if (200..300).contains(&code) {
        result.status = CheckStatus::Up;
    } else {
        result.status = CheckStatus::Down;
        result.error = format!("HTTP status {code}");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::time::Duration;

    async fn serve(status: StatusCode) -> String {
        let app = Router::new().route("/ok", get(move || async move { status }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/ok")
    }

    fn check_for(url: &str, expect_status: u16) -> CheckConfig {
        serde_yaml::from_str(&format!(
            "{{ name: web, type: http, url: {url:?}, interval: 30, expect_status: {expect_status} }}"
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn succeeding_2xx_is_up() {
        let url = serve(StatusCode::NO_CONTENT).await;
        let client = reqwest::Client::new();

        let result = execute(&client, &check_for(&url, 0)).await;
        assert_eq!(result.status, CheckStatus::Up);
        assert_eq!(result.http_status_code, 204);
        assert!(result.response_time > Duration::ZERO);
        assert!(result.error.is_empty());
    }

    #[tokio::test]
    async fn expect_status_mismatch_is_down() {
        let url = serve(StatusCode::NO_CONTENT).await;
        let client = reqwest::Client::new();

        let result = execute(&client, &check_for(&url, 200)).await;
        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.http_status_code, 204);
        assert_eq!(result.error, "expected status 200, got 204");
    }

    #[tokio::test]
    async fn expect_status_match_is_up() {
        let url = serve(StatusCode::NO_CONTENT).await;
        let client = reqwest::Client::new();

        let result = execute(&client, &check_for(&url, 204)).await;
        assert_eq!(result.status, CheckStatus::Up);
    }

    #[tokio::test]
    async fn server_error_is_down_with_status_message() {
        let url = serve(StatusCode::INTERNAL_SERVER_ERROR).await;
        let client = reqwest::Client::new();

        let result = execute(&client, &check_for(&url, 0)).await;
        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.http_status_code, 500);
        assert_eq!(result.error, "HTTP status 500");
    }

    #[tokio::test]
    async fn malformed_url_is_config_error() {
        let client = reqwest::Client::new();

        let result = execute(&client, &check_for("not a url", 0)).await;
        assert_eq!(result.status, CheckStatus::Error);
        assert!(result.error.starts_with("failed to create request"));
        assert_eq!(result.http_status_code, 0);
    }

    #[tokio::test]
    async fn unreachable_host_is_down() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        // Nothing listens on this port
        let result = execute(&client, &check_for("http://127.0.0.1:1/ok", 0)).await;
        assert_eq!(result.status, CheckStatus::Down);
        assert!(result.error.starts_with("request failed"));
    }
}
