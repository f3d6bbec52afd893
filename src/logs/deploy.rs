use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::parse::{LineFilter, LineParser};
use super::{build_entry, run_captured, LogManager};
use crate::config::LogSource;
use crate::types::LogEntry;

/// Watches the file the deploy agent redirects its command output into. The
/// write path is external; this collector only tails.
pub async fn run(source: LogSource, manager: Arc<LogManager>, shutdown: CancellationToken) {
    if source.deploy_log_file.is_empty() {
        warn!(source = %source.name, "deploy source without deploy_log_file");
        return;
    }
    info!(source = %source.name, path = %source.deploy_log_file, "starting deploy log collection");

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
    if !Path::new(&source.deploy_log_file).exists() {
        return Vec::new();
    }

    let mut cmd = Command::new("tail");
    cmd.arg("-n")
        .arg(source.max_lines.to_string())
        .arg(&source.deploy_log_file);

    let output = match run_captured(cmd, shutdown).await {
        Ok(out) if out.status.success() => out,
        Ok(out) => {
            warn!(source = %source.name, status = %out.status, "tail failed on deploy log");
            return Vec::new();
        }
        Err(e) => {
            warn!(source = %source.name, error = %e, "tail failed on deploy log");
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
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn deploy_source(path: &str, max_lines: usize) -> LogSource {
        serde_yaml::from_str(&format!(
            "{{ name: d, type: deploy, enabled: true, interval: 10, deploy_log_file: {path}, max_lines: {max_lines} }}"
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn missing_file_emits_nothing() {
        let source = deploy_source("/nonexistent/deploy.log", 100);
        let parser = LineParser::new();
        let filter = LineFilter::new(&[], &[]).unwrap();
        let shutdown = CancellationToken::new();

        let entries = collect(&source, &parser, &filter, &shutdown).await;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn tails_last_max_lines() {
        let mut tmp = NamedTempFile::new().unwrap();
        for i in 0..10 {
            writeln!(tmp, "deploy step {i}").unwrap();
        }
        tmp.flush().unwrap();

        let source = deploy_source(tmp.path().to_str().unwrap(), 3);
        let parser = LineParser::new();
        let filter = LineFilter::new(&[], &[]).unwrap();
        let shutdown = CancellationToken::new();

        let entries = collect(&source, &parser, &filter, &shutdown).await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].content, "deploy step 7");
        assert_eq!(entries[2].content, "deploy step 9");
    }
}
