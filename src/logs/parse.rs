use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use regex::Regex;

use crate::types::LogLevel;

/// Timestamp layouts recognized at the head of a log line, tried in order
#[derive(Debug, Clone, Copy)]
enum Layout {
    /// RFC 3339 with optional fractional seconds and offset
    Rfc3339,
    /// Syslog `Mon DD HH:MM:SS` (no year; the current year is assumed)
    Syslog,
    /// `YYYY-MM-DD HH:MM:SS`
    IsoSpace,
    /// `YYYY-MM-DD HH:MM:SS.mmm`
    IsoSpaceMillis,
    /// 10-digit Unix seconds
    UnixSecs,
    /// 13-digit Unix milliseconds
    UnixMillis,
}

/// Extracts leading timestamps and detects levels on raw log lines.
///
/// The first pattern whose capture parses successfully wins; lines without a
/// recognizable timestamp get the wall clock and keep their full text.
pub struct LineParser {
    patterns: Vec<(Regex, Layout)>,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    pub fn new() -> Self {
        let patterns = vec![
            (
                Regex::new(
                    r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?)\s+(.*)",
                )
                .unwrap(),
                Layout::Rfc3339,
            ),
            (
                Regex::new(r"^(\w{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(.*)").unwrap(),
                Layout::Syslog,
            ),
            (
                Regex::new(r"^(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2})\s+(.*)").unwrap(),
                Layout::IsoSpace,
            ),
            (
                Regex::new(r"^(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}\.\d{3})\s+(.*)").unwrap(),
                Layout::IsoSpaceMillis,
            ),
            (
                Regex::new(r"^(\d{10})\s+(.*)").unwrap(),
                Layout::UnixSecs,
            ),
            (
                Regex::new(r"^(\d{13})\s+(.*)").unwrap(),
                Layout::UnixMillis,
            ),
        ];
        Self { patterns }
    }

    /// Split a line into (timestamp, remaining content). Falls back to
    /// `(now, whole line)` when no layout matches.
    pub fn parse<'a>(&self, line: &'a str) -> (DateTime<Utc>, &'a str) {
        for (regex, layout) in &self.patterns {
            if let Some(caps) = regex.captures(line) {
                let raw = caps.get(1).unwrap().as_str();
                let content = caps.get(2).unwrap().as_str();
                if let Some(ts) = parse_layout(raw, *layout) {
                    return (ts, content);
                }
            }
        }
        (Utc::now(), line)
    }
}

fn parse_layout(raw: &str, layout: Layout) -> Option<DateTime<Utc>> {
    match layout {
        Layout::Rfc3339 => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Layout::Syslog => {
            // No year in the syslog format; borrow the current one
            let fields: Vec<&str> = raw.split_whitespace().collect();
            if fields.len() != 3 {
                return None;
            }
            let with_year = format!(
                "{} {} {} {}",
                Utc::now().year(),
                fields[0],
                fields[1],
                fields[2]
            );
            NaiveDateTime::parse_from_str(&with_year, "%Y %b %d %H:%M:%S")
                .ok()
                .map(|t| t.and_utc())
        }
        Layout::IsoSpace => {
            let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
            NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|t| t.and_utc())
        }
        Layout::IsoSpaceMillis => {
            let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
            NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.3f")
                .ok()
                .map(|t| t.and_utc())
        }
        Layout::UnixSecs => raw
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        Layout::UnixMillis => raw
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis),
    }
}

/// Case-insensitive substring scan; first hit wins
pub fn detect_level(content: &str) -> Option<LogLevel> {
    let lower = content.to_lowercase();
    if lower.contains("err") {
        Some(LogLevel::Error)
    } else if lower.contains("warn") {
        Some(LogLevel::Warning)
    } else if lower.contains("info") {
        Some(LogLevel::Info)
    } else if lower.contains("debug") {
        Some(LogLevel::Debug)
    } else {
        None
    }
}

/// Compiled include/exclude patterns for one log source.
///
/// Exclusions run first; when any include pattern is configured, a line must
/// match at least one of them to survive.
pub struct LineFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl LineFilter {
    pub fn new(include_patterns: &[String], exclude_patterns: &[String]) -> Result<Self> {
        let include = include_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let exclude = exclude_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { include, exclude })
    }

    pub fn matches(&self, line: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(line)) {
            return false;
        }
        if !self.include.is_empty() {
            return self.include.iter().any(|re| re.is_match(line));
        }
        true
    }
}
