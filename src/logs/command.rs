use std::sync::Arc;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::parse::{LineFilter, LineParser};
use super::{build_entry, run_captured, LogManager};
use crate::config::LogSource;
use crate::types::LogEntry;

/// Runs the configured command each tick and turns its stdout into entries
pub async fn run(source: LogSource, manager: Arc<LogManager>, shutdown: CancellationToken) {
    info!(source = %source.name, command = %source.command, "starting command log collection");

    let parser = LineParser::new();
    let filter = match LineFilter::new(&source.include_patterns, &source.exclude_patterns) {
        Ok(f) => f,
        Err(e) => {
            warn!(source = %source.name, error = %e, "invalid filter patterns");
            return;
        }
    };

    let mut ticker = tokio::time::interval(source.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let entries = collect(&source, &parser, &filter, &shutdown).await;
                manager.ingest(&source, entries);
            }
        }
    }
}

async fn collect(
    source: &LogSource,
    parser: &LineParser,
    filter: &LineFilter,
    shutdown: &CancellationToken,
) -> Vec<LogEntry> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&source.command);

    let output = match run_captured(cmd, shutdown).await {
        Ok(out) if out.status.success() => out,
        Ok(out) => {
            warn!(
                source = %source.name,
                command = %source.command,
                status = %out.status,
                "log command failed"
            );
            return Vec::new();
        }
        Err(e) => {
            warn!(source = %source.name, command = %source.command, error = %e, "log command failed");
            return Vec::new();
        }
    };

    let text = String::from_utf8_lossy(&output.stdout);
    let mut entries = Vec::new();
    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() || !filter.matches(line) {
            continue;
        }
        let (timestamp, content) = parser.parse(line);
        entries.push(build_entry(source, None, content, timestamp));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_source(command: &str) -> LogSource {
        serde_yaml::from_str(&format!(
            "{{ name: c, type: command, enabled: true, interval: 10, command: {command:?} }}"
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn emits_one_entry_per_non_empty_line() {
        let source = command_source("printf 'alpha\\n\\nbeta\\n'");
        let parser = LineParser::new();
        let filter = LineFilter::new(&[], &[]).unwrap();
        let shutdown = CancellationToken::new();

        let entries = collect(&source, &parser, &filter, &shutdown).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "alpha");
        assert_eq!(entries[1].content, "beta");
        assert_eq!(entries[0].kind, "command");
    }

    #[tokio::test]
    async fn failing_command_emits_nothing() {
        let source = command_source("exit 3");
        let parser = LineParser::new();
        let filter = LineFilter::new(&[], &[]).unwrap();
        let shutdown = CancellationToken::new();

        let entries = collect(&source, &parser, &filter, &shutdown).await;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn lines_carry_parsed_timestamps() {
        let source = command_source("printf '2024-01-15T10:30:00Z from journal\\n'");
        let parser = LineParser::new();
        let filter = LineFilter::new(&[], &[]).unwrap();
        let shutdown = CancellationToken::new();

        let entries = collect(&source, &parser, &filter, &shutdown).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "from journal");
        assert_eq!(
            entries[0].timestamp,
            chrono::DateTime::parse_from_rfc3339("2024-01-15T10:30:00Z").unwrap()
        );
    }
}
