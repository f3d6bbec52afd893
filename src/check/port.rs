use std::time::Duration;
use tokio::net::TcpStream;

use crate::config::CheckConfig;
use crate::types::{CheckResult, CheckStatus};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempt a TCP connection to `host:port`; reachable means up
pub async fn execute(check: &CheckConfig) -> CheckResult {
    let mut result = CheckResult::new(&check.name, "port");

    let address = format_address(&check.host, check.port);
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&address)).await {
        Ok(Ok(_stream)) => {
            result.status = CheckStatus::Up;
        }
        Ok(Err(e)) => {
            result.status = CheckStatus::Down;
            result.error = format!("connection failed: {e}");
        }
        Err(_) => {
            result.status = CheckStatus::Down;
            result.error = format!(
                "connection failed: timed out after {}s",
                CONNECT_TIMEOUT.as_secs()
            );
        }
    }

    result
}

/// The configured host is joined verbatim; an IPv6 literal must already be
/// bracketed for the joined form to parse as an address.
fn format_address(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}
