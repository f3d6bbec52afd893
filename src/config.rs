use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Top-level monitor configuration document
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
    #[serde(default)]
    pub system_metrics: SystemMetricsConfig,
    #[serde(default)]
    pub log_sources: Vec<LogSource>,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Device identification attached to every outgoing report
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeviceConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One declarative health check.
///
/// `kind` stays a free string so that an unknown type reaches the scheduler
/// and surfaces as an `error` result on that check alone instead of failing
/// the whole configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct CheckConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(with = "duration_value")]
    pub interval: Duration,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub expect_status: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SystemMetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_interval", with = "duration_value")]
    pub interval: Duration,
    #[serde(default = "default_true")]
    pub cpu: bool,
    #[serde(default = "default_true")]
    pub memory: bool,
    #[serde(default = "default_true")]
    pub disk: bool,
    #[serde(default = "default_true")]
    pub load_average: bool,
    #[serde(default = "default_disk_path")]
    pub disk_path: String,
}

impl Default for SystemMetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_metrics_interval(),
            cpu: true,
            memory: true,
            disk: true,
            load_average: true,
            disk_path: default_disk_path(),
        }
    }
}

/// One declarative log source
#[derive(Debug, Deserialize, Clone)]
pub struct LogSource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(with = "duration_value")]
    pub interval: Duration,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    // file sources
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub follow_file: bool,
    #[serde(default)]
    pub use_tail: bool,

    // docker sources
    #[serde(default)]
    pub containers: Vec<String>,
    #[serde(default)]
    pub all_containers: bool,
    #[serde(default)]
    pub docker_options: String,

    // deploy sources
    #[serde(default)]
    pub deploy_log_file: String,

    // command sources
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub deduplicate: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReportConfig {
    #[serde(default)]
    pub send_to: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub prometheus_metrics: bool,
    #[serde(default)]
    pub prometheus_port: u16,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval", with = "duration_value")]
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_heartbeat_interval(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        // Expand environment variables
        let expanded = expand_env_vars(&content);

        let config: Config =
            serde_yaml::from_str(&expanded).context("failed to parse configuration")?;
        config.validate()?;

        Ok(config)
    }

    /// Structural validation beyond what serde enforces. Any failure here is
    /// fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for check in &self.checks {
            if check.name.is_empty() {
                bail!("check with empty name");
            }
            if !names.insert(check.name.as_str()) {
                bail!("duplicate check name: {}", check.name);
            }
            if check.interval.is_zero() {
                bail!("check {}: interval must be positive", check.name);
            }
            match check.kind.as_str() {
                "http" if check.url.is_empty() => {
                    bail!("check {}: http checks require a url", check.name)
                }
                "port" if check.host.is_empty() || check.port == 0 => {
                    bail!("check {}: port checks require host and port", check.name)
                }
                "command" if check.cmd.is_empty() => {
                    bail!("check {}: command checks require cmd", check.name)
                }
                _ => {}
            }
        }

        let mut source_names = HashSet::new();
        for source in &self.log_sources {
            if source.name.is_empty() {
                bail!("log source with empty name");
            }
            if !source_names.insert(source.name.as_str()) {
                bail!("duplicate log source name: {}", source.name);
            }
            if source.interval.is_zero() {
                bail!("log source {}: interval must be positive", source.name);
            }
            for pattern in source
                .include_patterns
                .iter()
                .chain(&source.exclude_patterns)
            {
                Regex::new(pattern).with_context(|| {
                    format!("log source {}: invalid pattern {:?}", source.name, pattern)
                })?;
            }
        }

        if self.report.prometheus_metrics && self.report.prometheus_port == 0 {
            bail!("prometheus_metrics requires prometheus_port");
        }

        Ok(())
    }
}

/// Expand ${ENV_VAR} references in the raw config text
fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

/// Intervals accept either bare seconds (`interval: 30`) or a humantime
/// string (`interval: 1m30s`).
mod duration_value {
    use serde::{de, Deserialize, Deserializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Secs(s) => Ok(Duration::from_secs(s)),
            Raw::Text(t) => humantime::parse_duration(&t)
                .map_err(|e| de::Error::custom(format!("invalid duration {:?}: {}", t, e))),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_lines() -> usize {
    100
}
fn default_disk_path() -> String {
    "/".to_string()
}
fn default_metrics_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}
