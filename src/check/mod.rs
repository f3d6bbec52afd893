pub mod command;
pub mod http;
pub mod port;

use chrono::Utc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::CheckConfig;
use crate::report::Reporter;
use crate::store::ResultStore;
use crate::types::{CheckResult, CheckStatus};

/// Command output is cut at this many characters for the human log line; the
/// stored result keeps the full text.
const MAX_LOG_OUTPUT: usize = 200;

/// Drive one check: an immediate evaluation at startup, then one per
/// interval. A tick that arrives while an evaluation is still running is
/// coalesced away, so evaluations of the same check never overlap.
pub async fn run_check_loop(
    check: CheckConfig,
    store: ResultStore,
    reporter: Reporter,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(check.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                execute_check(&check, &store, &reporter, &shutdown).await;
            }
        }
    }
}

/// One evaluation: dispatch on kind, stamp duration and timestamp, store,
/// log exactly one line, and hand off to the reporter.
pub async fn execute_check(
    check: &CheckConfig,
    store: &ResultStore,
    reporter: &Reporter,
    shutdown: &CancellationToken,
) {
    let start = Instant::now();

    let mut result = match check.kind.as_str() {
        "http" => http::execute(reporter.client(), check).await,
        "port" => port::execute(check).await,
        "command" => command::execute(check, shutdown).await,
        other => {
            let mut result = CheckResult::new(&check.name, other);
            result.status = CheckStatus::Error;
            result.error = format!("unknown check type: {other}");
            result
        }
    };

    result.duration = start.elapsed();
    result.timestamp = Utc::now();

    store.insert(result.clone());
    log_result(check, &result);

    if reporter.is_configured() {
        let reporter = reporter.clone();
        tokio::spawn(async move {
            reporter.report_check(&result).await;
        });
    }
}

fn log_result(check: &CheckConfig, result: &CheckResult) {
    let duration_secs = result.duration.as_secs_f64();
    match check.kind.as_str() {
        "command" => info!(
            check = %check.name,
            kind = %check.kind,
            status = %result.status,
            duration_secs,
            output = %condense(&result.command_output),
            stderr = %condense(&result.command_error),
            "check evaluated"
        ),
        _ => info!(
            check = %check.name,
            kind = %check.kind,
            status = %result.status,
            duration_secs,
            "check evaluated"
        ),
    }
}

/// Collapse whitespace runs and cut at [`MAX_LOG_OUTPUT`] characters
fn condense(output: &str) -> String {
    let normalized = output.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() > MAX_LOG_OUTPUT {
        let cut: String = normalized.chars().take(MAX_LOG_OUTPUT).collect();
        format!("{cut}...")
    } else {
        normalized
    }
}
