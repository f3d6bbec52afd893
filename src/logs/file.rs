use chrono::{DateTime, Utc};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::parse::{LineFilter, LineParser};
use super::{build_entry, run_captured, LogManager};
use crate::config::LogSource;
use crate::types::LogEntry;

/// Mutable per-source state for the direct-read strategy
struct DirectState {
    file: File,
    last_position: u64,
}

pub async fn run(source: LogSource, manager: Arc<LogManager>, shutdown: CancellationToken) {
    info!(source = %source.name, path = %source.file_path, "starting file log collection");

    let parser = LineParser::new();
    let filter = match LineFilter::new(&source.include_patterns, &source.exclude_patterns) {
        Ok(f) => f,
        Err(e) => {
            // Patterns are validated at startup; reaching this is a bug
            error!(source = %source.name, error = %e, "invalid filter patterns");
            return;
        }
    };

    if source.use_tail {
        info!(source = %source.name, "using tail strategy (use_tail set)");
        return run_with_tail(source, manager, shutdown, parser, filter).await;
    }

    // Try direct access; permission problems fall back to tail
    let state = match open_direct(&source).await {
        Ok(state) => state,
        Err(e) => {
            info!(
                source = %source.name,
                path = %source.file_path,
                error = %e,
                "cannot open file directly, falling back to tail"
            );
            return run_with_tail(source, manager, shutdown, parser, filter).await;
        }
    };

    run_direct(source, manager, shutdown, parser, filter, state).await;
}

/// Open the file and position at end-of-file. The baseline content is never
/// shipped, whether or not the source follows the file.
async fn open_direct(source: &LogSource) -> anyhow::Result<DirectState> {
    let file = File::open(&source.file_path).await?;
    let size = file.metadata().await?.len();
    Ok(DirectState {
        file,
        last_position: size,
    })
}

async fn run_direct(
    source: LogSource,
    manager: Arc<LogManager>,
    shutdown: CancellationToken,
    parser: LineParser,
    filter: LineFilter,
    mut state: DirectState,
) {
    info!(source = %source.name, path = %source.file_path, "using direct file access");

    let mut ticker = tokio::time::interval(source.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // position is already at end-of-file; nothing to read yet

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let entries = collect_from_position(&source, &mut state, &parser, &filter).await;
                manager.ingest(&source, entries);
            }
        }
    }
}

/// Read the byte range `[last_position, current_size)` and emit one entry per
/// non-empty line passing the filters. A shrunken file is treated as rotation
/// and read from the start.
async fn collect_from_position(
    source: &LogSource,
    state: &mut DirectState,
    parser: &LineParser,
    filter: &LineFilter,
) -> Vec<LogEntry> {
    let size = match state.file.metadata().await {
        Ok(meta) => meta.len(),
        Err(e) => {
            warn!(source = %source.name, path = %source.file_path, error = %e, "stat failed");
            return Vec::new();
        }
    };

    if size < state.last_position {
        info!(source = %source.name, path = %source.file_path, "file truncated, resetting position");
        state.last_position = 0;
    }

    if size <= state.last_position {
        return Vec::new();
    }

    if let Err(e) = state.file.seek(SeekFrom::Start(state.last_position)).await {
        warn!(source = %source.name, error = %e, "seek failed");
        return Vec::new();
    }

    let span = size - state.last_position;
    let mut buf = Vec::with_capacity(span as usize);
    if let Err(e) = (&mut state.file).take(span).read_to_end(&mut buf).await {
        warn!(source = %source.name, error = %e, "read failed");
        return Vec::new();
    }
    state.last_position = size;

    let text = String::from_utf8_lossy(&buf);
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

/// Tail-subprocess strategy used when direct access is unavailable or the
/// source asks for it.
async fn run_with_tail(
    source: LogSource,
    manager: Arc<LogManager>,
    shutdown: CancellationToken,
    parser: LineParser,
    filter: LineFilter,
) {
    let mut high_water: Option<DateTime<Utc>> = None;

    let mut ticker = tokio::time::interval(source.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let entries =
                    collect_with_tail(&source, &mut high_water, &parser, &filter, &shutdown).await;
                manager.ingest(&source, entries);
            }
        }
    }
}

async fn collect_with_tail(
    source: &LogSource,
    high_water: &mut Option<DateTime<Utc>>,
    parser: &LineParser,
    filter: &LineFilter,
    shutdown: &CancellationToken,
) -> Vec<LogEntry> {
    // First tick of a followed source reads max_lines and seeds the mark so
    // historical backlog is not shipped; later ticks over-read to cover lines
    // that arrived since.
    let line_count = if source.follow_file && high_water.is_some() {
        source.max_lines * 2
    } else {
        source.max_lines
    };
    if source.follow_file && high_water.is_none() {
        *high_water = Some(Utc::now());
    }

    let mut cmd = Command::new("tail");
    cmd.arg("-n")
        .arg(line_count.to_string())
        .arg(&source.file_path);

    let output = match run_captured(cmd, shutdown).await {
        Ok(out) if out.status.success() => out,
        Ok(out) => {
            warn!(
                source = %source.name,
                path = %source.file_path,
                status = %out.status,
                "tail failed"
            );
            return Vec::new();
        }
        Err(e) => {
            warn!(source = %source.name, path = %source.file_path, error = %e, "tail failed");
            return Vec::new();
        }
    };

    let text = String::from_utf8_lossy(&output.stdout);
    let mut entries = Vec::new();
    let mut newest: Option<DateTime<Utc>> = None;

    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() || !filter.matches(line) {
            continue;
        }
        let (timestamp, content) = parser.parse(line);

        // Only lines strictly beyond the mark are new when following
        if source.follow_file {
            if let Some(mark) = *high_water {
                if timestamp <= mark {
                    continue;
                }
            }
        }

        entries.push(build_entry(source, None, content, timestamp));
        if newest.map_or(true, |n| timestamp > n) {
            newest = Some(timestamp);
        }
    }

    if source.follow_file {
        if let Some(newest) = newest {
            *high_water = Some(newest);
        }
    }

    entries
}
