use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::parse::{LineFilter, LineParser};
use super::{build_entry, run_captured, LogManager};
use crate::config::LogSource;
use crate::types::LogEntry;

/// Options the collector owns for its own bookkeeping; user-supplied copies
/// are stripped before reserialization.
const RESERVED_FLAGS: [&str; 2] = ["--tail", "--since"];

pub async fn run(source: LogSource, manager: Arc<LogManager>, shutdown: CancellationToken) {
    info!(source = %source.name, "starting docker log collection");

    let parser = LineParser::new();
    let filter = match LineFilter::new(&source.include_patterns, &source.exclude_patterns) {
        Ok(f) => f,
        Err(e) => {
            warn!(source = %source.name, error = %e, "invalid filter patterns");
            return;
        }
    };
    let extra_args = sanitize_options(&source.docker_options);

    // Seed the mark so the first tick does not replay container history
    let mut high_water = Utc::now()
        - chrono::Duration::from_std(source.interval).unwrap_or(chrono::Duration::zero());

    let mut ticker = tokio::time::interval(source.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let entries =
                    collect_since(&source, high_water, &extra_args, &parser, &filter, &shutdown)
                        .await;
                for entry in &entries {
                    if entry.timestamp > high_water {
                        high_water = entry.timestamp;
                    }
                }
                manager.ingest(&source, entries);
            }
        }
    }
}

/// One tick: enumerate containers, pull `docker logs --since <mark>` for
/// each, and keep lines strictly newer than the mark.
async fn collect_since(
    source: &LogSource,
    since: DateTime<Utc>,
    extra_args: &[String],
    parser: &LineParser,
    filter: &LineFilter,
    shutdown: &CancellationToken,
) -> Vec<LogEntry> {
    let containers = if source.all_containers {
        match running_containers(shutdown).await {
            Ok(names) => names,
            Err(e) => {
                warn!(source = %source.name, error = %e, "failed to list containers");
                return Vec::new();
            }
        }
    } else {
        source.containers.clone()
    };

    let since_arg = since.format("%Y-%m-%dT%H:%M:%S").to_string();
    let mut entries = Vec::new();

    for container in containers {
        if container.is_empty() {
            continue;
        }

        let mut cmd = Command::new("docker");
        cmd.arg("logs")
            .arg("--since")
            .arg(&since_arg)
            .arg("--timestamps")
            .args(extra_args)
            .arg(&container);

        let output = match run_captured(cmd, shutdown).await {
            Ok(out) if out.status.success() => out,
            Ok(out) => {
                warn!(
                    source = %source.name,
                    container = %container,
                    status = %out.status,
                    "docker logs failed"
                );
                continue;
            }
            Err(e) => {
                warn!(source = %source.name, container = %container, error = %e, "docker logs failed");
                continue;
            }
        };

        let text = String::from_utf8_lossy(&output.stdout);
        for line in text.split('\n') {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (timestamp, content) = parser.parse(line);
            if timestamp > since && filter.matches(content) {
                entries.push(build_entry(source, Some(&container), content, timestamp));
            }
        }
    }

    entries
}

async fn running_containers(shutdown: &CancellationToken) -> anyhow::Result<Vec<String>> {
    let mut cmd = Command::new("docker");
    cmd.arg("ps").arg("--format").arg("{{.Names}}");
    let output = run_captured(cmd, shutdown).await?;
    if !output.status.success() {
        anyhow::bail!("docker ps exited with {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .map(str::to_string)
        .collect())
}

/// Normalize the user-supplied option string into argv tokens, dropping the
/// flags the collector manages itself (`--tail`, `--since`, both the spaced
/// and `=`-joined forms, including their values).
fn sanitize_options(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut tokens = raw.split_whitespace();
    while let Some(token) = tokens.next() {
        if let Some((flag, _value)) = token.split_once('=') {
            if RESERVED_FLAGS.contains(&flag) {
                continue;
            }
            out.push(token.to_string());
            continue;
        }
        if RESERVED_FLAGS.contains(&token) {
            tokens.next(); // the flag's value goes with it
            continue;
        }
        out.push(token.to_string());
    }
    out
}
