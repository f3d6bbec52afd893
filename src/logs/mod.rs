pub mod command;
pub mod deploy;
pub mod docker;
pub mod file;
pub mod parse;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::LogSource;
use crate::report::Reporter;
use crate::types::LogEntry;

/// Capacity of the in-memory entry ring kept for local inspection
pub const MAX_BUFFERED_ENTRIES: usize = 1000;

/// Identical content within this window is suppressed when dedup is on
pub const DEDUP_WINDOW_HOURS: i64 = 1;

/// How often the dedup table is pruned
pub const DEDUP_PRUNE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(6 * 3600);

/// Hashes unseen for this long are dropped by the pruner
pub const DEDUP_RETENTION_HOURS: i64 = 24;

/// Owns the per-source collectors, the dedup table, and the report fan-in.
///
/// Collectors hand each tick's batch to [`LogManager::ingest`]; survivors go
/// into the local ring and are shipped upstream asynchronously.
pub struct LogManager {
    sources: Vec<LogSource>,
    reporter: Reporter,
    entries: RwLock<VecDeque<LogEntry>>,
    seen: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl LogManager {
    pub fn new(sources: Vec<LogSource>, reporter: Reporter) -> Arc<Self> {
        Arc::new(Self {
            sources,
            reporter,
            entries: RwLock::new(VecDeque::with_capacity(MAX_BUFFERED_ENTRIES)),
            seen: RwLock::new(HashMap::new()),
        })
    }

    /// Spawn one task per enabled source, plus the dedup pruner
    pub fn spawn_collectors(
        self: &Arc<Self>,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let enabled = self.sources.iter().filter(|s| s.enabled).count();
        info!(sources = enabled, "starting log collection");

        let mut handles = Vec::new();

        let pruner = Arc::clone(self);
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            pruner.run_dedup_pruner(token).await;
        }));

        for source in self.sources.iter().filter(|s| s.enabled).cloned() {
            let manager = Arc::clone(self);
            let token = shutdown.clone();
            let handle = match source.kind.as_str() {
                "file" => tokio::spawn(file::run(source, manager, token)),
                "docker" => tokio::spawn(docker::run(source, manager, token)),
                "deploy" => tokio::spawn(deploy::run(source, manager, token)),
                "command" => tokio::spawn(command::run(source, manager, token)),
                other => {
                    warn!(source = %source.name, kind = %other, "unknown log source type");
                    continue;
                }
            };
            handles.push(handle);
        }

        handles
    }

    /// Accept one collector tick's batch: hash, dedup, buffer, ship
    pub fn ingest(&self, source: &LogSource, entries: Vec<LogEntry>) {
        if entries.is_empty() {
            return;
        }
        let collected = entries.len();

        let mut survivors = Vec::with_capacity(entries.len());
        for mut entry in entries {
            entry.hash = entry_hash(&entry);
            if source.deduplicate && self.is_duplicate(&entry) {
                continue;
            }
            survivors.push(entry);
        }

        if survivors.is_empty() {
            return;
        }

        {
            let mut ring = self.entries.write().unwrap();
            for entry in &survivors {
                ring.push_back(entry.clone());
            }
            while ring.len() > MAX_BUFFERED_ENTRIES {
                ring.pop_front();
            }
        }

        info!(
            source = %source.name,
            accepted = survivors.len(),
            collected,
            "collected log entries"
        );

        if self.reporter.is_configured() {
            let reporter = self.reporter.clone();
            tokio::spawn(async move {
                reporter.report_logs(&survivors).await;
            });
        }
    }

    /// Dedup check; records the hash for new entries and refreshes it for
    /// entries seen more than [`DEDUP_WINDOW`] ago.
    fn is_duplicate(&self, entry: &LogEntry) -> bool {
        let last_seen = self.seen.read().unwrap().get(&entry.hash).copied();

        match last_seen {
            None => {
                self.seen
                    .write()
                    .unwrap()
                    .insert(entry.hash.clone(), entry.timestamp);
                false
            }
            Some(seen_at)
                if entry.timestamp - seen_at < chrono::Duration::hours(DEDUP_WINDOW_HOURS) =>
            {
                true
            }
            Some(_) => {
                self.seen
                    .write()
                    .unwrap()
                    .insert(entry.hash.clone(), entry.timestamp);
                false
            }
        }
    }

    async fn run_dedup_pruner(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(DEDUP_PRUNE_INTERVAL);
        ticker.tick().await; // the immediate tick; nothing to prune yet
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => self.prune_seen(Utc::now()),
            }
        }
    }

    fn prune_seen(&self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::hours(DEDUP_RETENTION_HOURS);
        let mut seen = self.seen.write().unwrap();
        let before = seen.len();
        seen.retain(|_, last_seen| *last_seen >= cutoff);
        let removed = before - seen.len();
        if removed > 0 {
            info!(removed, remaining = seen.len(), "pruned dedup table");
        }
    }

    /// Snapshot of the local ring, oldest first
    pub fn recent_entries(&self) -> Vec<LogEntry> {
        self.entries.read().unwrap().iter().cloned().collect()
    }

    #[cfg(test)]
    fn seen_len(&self) -> usize {
        self.seen.read().unwrap().len()
    }
}

/// Dedup key over source, type, container, and content. The timestamp is
/// excluded so identical content at different times collides as intended.
pub fn entry_hash(entry: &LogEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entry.source.as_bytes());
    hasher.update(b"|");
    hasher.update(entry.kind.as_bytes());
    hasher.update(b"|");
    hasher.update(entry.container.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(entry.content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Run a subprocess to completion with captured output, killing it if the
/// shutdown token fires first.
pub(crate) async fn run_captured(
    mut cmd: Command,
    shutdown: &CancellationToken,
) -> Result<std::process::Output> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    tokio::select! {
        output = cmd.output() => Ok(output?),
        _ = shutdown.cancelled() => bail!("cancelled during shutdown"),
    }
}

/// Build a `LogEntry` for a line that already passed the source's filters
pub(crate) fn build_entry(
    source: &LogSource,
    container: Option<&str>,
    content: &str,
    timestamp: DateTime<Utc>,
) -> LogEntry {
    LogEntry {
        source: source.name.clone(),
        kind: source.kind.clone(),
        container: container.map(str::to_string),
        content: content.to_string(),
        timestamp,
        level: parse::detect_level(content),
        hash: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReportConfig;
    use crate::types::LogLevel;
    use std::time::Duration;

    fn test_source(name: &str, deduplicate: bool) -> LogSource {
        serde_yaml::from_str(&format!(
            "{{ name: {name}, type: file, enabled: true, interval: 10, file_path: /tmp/x, deduplicate: {deduplicate} }}"
        ))
        .unwrap()
    }

    fn test_manager(sources: Vec<LogSource>) -> Arc<LogManager> {
        let reporter = Reporter::new(&ReportConfig::default(), &Default::default()).unwrap();
        LogManager::new(sources, reporter)
    }

    fn entry_at(source: &LogSource, content: &str, timestamp: DateTime<Utc>) -> LogEntry {
        build_entry(source, None, content, timestamp)
    }

    #[tokio::test]
    async fn dedup_suppresses_within_window() {
        let source = test_source("app", true);
        let manager = test_manager(vec![source.clone()]);
        let base = Utc::now();

        // S5: four lines, two distinct contents, one tick
        let batch = vec![
            entry_at(&source, "INFO Application started", base),
            entry_at(&source, "INFO Application started", base + chrono::Duration::seconds(1)),
            entry_at(&source, "ERROR Critical failure", base + chrono::Duration::seconds(2)),
            entry_at(&source, "ERROR Critical failure", base + chrono::Duration::seconds(3)),
        ];
        manager.ingest(&source, batch);

        let kept = manager.recent_entries();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].content, "INFO Application started");
        assert_eq!(kept[0].level, Some(LogLevel::Info));
        assert_eq!(kept[1].content, "ERROR Critical failure");
        assert_eq!(kept[1].level, Some(LogLevel::Error));
    }

    #[tokio::test]
    async fn dedup_accepts_after_window() {
        let source = test_source("app", true);
        let manager = test_manager(vec![source.clone()]);
        let base = Utc::now();

        manager.ingest(&source, vec![entry_at(&source, "same line", base)]);
        manager.ingest(
            &source,
            vec![entry_at(&source, "same line", base + chrono::Duration::minutes(30))],
        );
        manager.ingest(
            &source,
            vec![entry_at(&source, "same line", base + chrono::Duration::minutes(61))],
        );

        assert_eq!(manager.recent_entries().len(), 2);
    }

    #[tokio::test]
    async fn dedup_disabled_keeps_everything() {
        let source = test_source("app", false);
        let manager = test_manager(vec![source.clone()]);
        let base = Utc::now();

        manager.ingest(
            &source,
            vec![
                entry_at(&source, "same line", base),
                entry_at(&source, "same line", base),
            ],
        );
        assert_eq!(manager.recent_entries().len(), 2);
    }

    #[tokio::test]
    async fn ring_drops_oldest_beyond_capacity() {
        let source = test_source("app", false);
        let manager = test_manager(vec![source.clone()]);
        let base = Utc::now();

        let batch: Vec<LogEntry> = (0..MAX_BUFFERED_ENTRIES + 50)
            .map(|i| entry_at(&source, &format!("line {i}"), base))
            .collect();
        manager.ingest(&source, batch);

        let kept = manager.recent_entries();
        assert_eq!(kept.len(), MAX_BUFFERED_ENTRIES);
        assert_eq!(kept[0].content, "line 50");
    }

    #[tokio::test]
    async fn pruner_drops_stale_hashes() {
        let source = test_source("app", true);
        let manager = test_manager(vec![source.clone()]);
        let now = Utc::now();

        manager.ingest(
            &source,
            vec![
                entry_at(&source, "old line", now - chrono::Duration::hours(30)),
                entry_at(&source, "fresh line", now),
            ],
        );
        assert_eq!(manager.seen_len(), 2);

        manager.prune_seen(now);
        assert_eq!(manager.seen_len(), 1);
    }

    #[test]
    fn hash_excludes_timestamp() {
        let source = test_source("app", true);
        let a = entry_at(&source, "same", Utc::now());
        let b = entry_at(&source, "same", Utc::now() + chrono::Duration::hours(5));
        assert_eq!(entry_hash(&a), entry_hash(&b));

        let c = entry_at(&source, "different", Utc::now());
        assert_ne!(entry_hash(&a), entry_hash(&c));
    }

    #[test]
    fn hash_includes_container() {
        let source = test_source("app", true);
        let mut a = entry_at(&source, "same", Utc::now());
        let mut b = a.clone();
        a.container = Some("web".into());
        b.container = Some("db".into());
        assert_ne!(entry_hash(&a), entry_hash(&b));
    }

    #[tokio::test]
    async fn run_captured_is_cancellable() {
        let token = CancellationToken::new();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 30");

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let result = run_captured(cmd, &token).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
