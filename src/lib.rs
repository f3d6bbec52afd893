pub mod check;
pub mod config;
pub mod deploy;
pub mod exporter;
pub mod logs;
pub mod monitor;
pub mod report;
pub mod state;
pub mod store;
pub mod system;

/// Common types used across modules
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::time::Duration;

    /// Outcome status of a single check evaluation.
    ///
    /// `Error` is reserved for configuration-level problems discovered at
    /// evaluation time (unknown check type, unparseable URL). External
    /// failures are always `Down`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum CheckStatus {
        Up,
        Down,
        Error,
    }

    impl std::fmt::Display for CheckStatus {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                CheckStatus::Up => write!(f, "up"),
                CheckStatus::Down => write!(f, "down"),
                CheckStatus::Error => write!(f, "error"),
            }
        }
    }

    /// Result of one check evaluation
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct CheckResult {
        pub name: String,
        #[serde(rename = "type")]
        pub kind: String,
        pub status: CheckStatus,
        #[serde(with = "duration_secs")]
        pub duration: Duration,
        pub timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub error: String,
        #[serde(default, skip_serializing_if = "is_zero_u16")]
        pub http_status_code: u16,
        #[serde(
            with = "duration_secs",
            default,
            skip_serializing_if = "Duration::is_zero"
        )]
        pub response_time: Duration,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub command_output: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub command_error: String,
    }

    impl CheckResult {
        /// A result skeleton for the given check; the executor fills in the rest.
        pub fn new(name: &str, kind: &str) -> Self {
            Self {
                name: name.to_string(),
                kind: kind.to_string(),
                status: CheckStatus::Error,
                duration: Duration::ZERO,
                timestamp: Utc::now(),
                error: String::new(),
                http_status_code: 0,
                response_time: Duration::ZERO,
                command_output: String::new(),
                command_error: String::new(),
            }
        }
    }

    /// One sample of host state shipped to the upstream ingestion service
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AgentMetrics {
        pub hostname: String,
        pub ip_address: String,
        pub cpu_usage: f64,
        pub memory_usage: f64,
        pub disk_usage: f64,
        pub load_average: f64,
        pub uptime_seconds: i64,
        pub timestamp: DateTime<Utc>,
        #[serde(default)]
        pub custom_metrics: HashMap<String, CheckResult>,
    }

    /// Detected log line severity
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum LogLevel {
        Error,
        Warning,
        Info,
        Debug,
    }

    impl std::fmt::Display for LogLevel {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                LogLevel::Error => write!(f, "error"),
                LogLevel::Warning => write!(f, "warning"),
                LogLevel::Info => write!(f, "info"),
                LogLevel::Debug => write!(f, "debug"),
            }
        }
    }

    /// A single observed log line
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LogEntry {
        pub source: String,
        #[serde(rename = "type")]
        pub kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub container: Option<String>,
        pub content: String,
        pub timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub level: Option<LogLevel>,
        /// Dedup key; local bookkeeping only, never shipped upstream.
        #[serde(skip)]
        pub hash: String,
    }

    fn is_zero_u16(v: &u16) -> bool {
        *v == 0
    }

    /// Durations cross the wire as fractional seconds
    pub mod duration_secs {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_f64(d.as_secs_f64())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
            let secs = f64::deserialize(d)?;
            if !secs.is_finite() || secs < 0.0 {
                return Err(serde::de::Error::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(secs))
        }
    }
}
