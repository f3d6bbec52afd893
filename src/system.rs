use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, warn};

use crate::config::SystemMetricsConfig;
use crate::store::ResultStore;
use crate::types::AgentMetrics;

/// Host-level metric sources.
///
/// Captured as a trait so tests can substitute a canned implementation; the
/// production implementation reads procfs and the filesystem-statistics
/// syscall.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn hostname(&self) -> Result<String>;
    async fn primary_ip(&self) -> Result<String>;
    async fn cpu_usage(&self) -> Result<f64>;
    async fn memory_usage(&self) -> Result<f64>;
    async fn disk_usage(&self, path: &str) -> Result<f64>;
    async fn load_average(&self) -> Result<f64>;
    async fn uptime(&self) -> Result<i64>;
}

/// procfs-backed probe for Linux hosts
pub struct LinuxSystem;

#[async_trait]
impl SystemProbe for LinuxSystem {
    async fn hostname(&self) -> Result<String> {
        let name = hostname::get().context("failed to get hostname")?;
        Ok(name.to_string_lossy().to_string())
    }

    /// Discover the primary interface address by opening a UDP "connection"
    /// to a public address and reading the local endpoint. No datagram is
    /// ever sent.
    async fn primary_ip(&self) -> Result<String> {
        let socket =
            std::net::UdpSocket::bind("0.0.0.0:0").context("failed to bind probe socket")?;
        socket
            .connect("8.8.8.8:80")
            .context("failed to resolve primary address")?;
        Ok(socket.local_addr()?.ip().to_string())
    }

    /// Load-average proxy: 1-minute load over logical CPU count, as percent,
    /// capped at 100.
    async fn cpu_usage(&self) -> Result<f64> {
        let load = self.load_average().await?;
        let cpus = num_cpus::get().max(1);
        Ok((load / cpus as f64 * 100.0).min(100.0))
    }

    async fn memory_usage(&self) -> Result<f64> {
        let content = tokio::fs::read_to_string("/proc/meminfo").await?;
        parse_meminfo(&content)
    }

    async fn disk_usage(&self, path: &str) -> Result<f64> {
        let stat = nix::sys::statvfs::statvfs(path)
            .with_context(|| format!("statvfs failed for {path}"))?;
        let blocks = stat.blocks() as u64;
        if blocks == 0 {
            bail!("invalid disk data: zero total blocks for {path}");
        }
        let available = stat.blocks_available() as u64;
        Ok((blocks - available) as f64 / blocks as f64 * 100.0)
    }

    async fn load_average(&self) -> Result<f64> {
        let content = tokio::fs::read_to_string("/proc/loadavg").await?;
        parse_loadavg(&content)
    }

    async fn uptime(&self) -> Result<i64> {
        let content = tokio::fs::read_to_string("/proc/uptime").await?;
        parse_uptime(&content)
    }
}

/// Used memory percent from /proc/meminfo contents. Prefers MemAvailable
/// (Linux 3.14+), falling back to MemFree.
fn parse_meminfo(content: &str) -> Result<f64> {
    let mut total = 0u64;
    let mut free = 0u64;
    let mut available = 0u64;

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let value: u64 = value.parse().unwrap_or(0);
        match key {
            "MemTotal:" => total = value,
            "MemFree:" => free = value,
            "MemAvailable:" => available = value,
            _ => {}
        }
    }

    if total == 0 {
        bail!("invalid memory data: MemTotal is 0");
    }

    let used = if available > 0 {
        total - available
    } else {
        total - free
    };
    Ok(used as f64 / total as f64 * 100.0)
}

/// 1-minute load average from /proc/loadavg contents
fn parse_loadavg(content: &str) -> Result<f64> {
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.len() < 3 {
        bail!("invalid load average data");
    }
    fields[0]
        .parse()
        .context("failed to parse 1-minute load average")
}

/// Whole seconds of uptime from /proc/uptime contents
fn parse_uptime(content: &str) -> Result<i64> {
    let first = content
        .split_whitespace()
        .next()
        .context("invalid uptime data")?;
    let uptime: f64 = first.parse().context("failed to parse uptime")?;
    Ok(uptime as i64)
}

/// Assemble one metrics sample.
///
/// Hostname is the identifying key upstream, so its failure abandons the
/// whole sample. Any other metric failure logs and leaves the field zero, as
/// does a toggle that disables the metric. Uptime is always collected.
pub async fn collect_sample(
    probe: &dyn SystemProbe,
    config: &SystemMetricsConfig,
    store: &ResultStore,
) -> Option<AgentMetrics> {
    let hostname = match probe.hostname().await {
        Ok(name) => name,
        Err(e) => {
            error!(error = %e, "failed to get hostname, skipping metrics sample");
            return None;
        }
    };

    let ip_address = probe.primary_ip().await.unwrap_or_else(|e| {
        warn!(error = %e, "failed to get primary ip");
        String::new()
    });

    let cpu_usage = if config.cpu {
        probe.cpu_usage().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to collect cpu usage");
            0.0
        })
    } else {
        0.0
    };

    let memory_usage = if config.memory {
        probe.memory_usage().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to collect memory usage");
            0.0
        })
    } else {
        0.0
    };

    let disk_usage = if config.disk {
        probe.disk_usage(&config.disk_path).await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to collect disk usage");
            0.0
        })
    } else {
        0.0
    };

    let load_average = if config.load_average {
        probe.load_average().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to collect load average");
            0.0
        })
    } else {
        0.0
    };

    let uptime_seconds = probe.uptime().await.unwrap_or_else(|e| {
        warn!(error = %e, "failed to collect uptime");
        0
    });

    Some(AgentMetrics {
        hostname,
        ip_address,
        cpu_usage,
        memory_usage,
        disk_usage,
        load_average,
        uptime_seconds,
        timestamp: Utc::now(),
        custom_metrics: store.snapshot(),
    })
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;

    /// Canned probe; individual operations fail when listed in `errors`
    #[derive(Default)]
    pub struct MockSystem {
        pub hostname: String,
        pub ip_address: String,
        pub cpu_usage: f64,
        pub memory_usage: f64,
        pub disk_usage: f64,
        pub load_average: f64,
        pub uptime_seconds: i64,
        pub errors: HashMap<&'static str, String>,
    }

    impl MockSystem {
        fn fail(&self, op: &str) -> Option<anyhow::Error> {
            self.errors.get(op).map(|msg| anyhow::anyhow!(msg.clone()))
        }
    }

    #[async_trait]
    impl SystemProbe for MockSystem {
        async fn hostname(&self) -> Result<String> {
            match self.fail("hostname") {
                Some(e) => Err(e),
                None => Ok(self.hostname.clone()),
            }
        }
        async fn primary_ip(&self) -> Result<String> {
            match self.fail("ip_address") {
                Some(e) => Err(e),
                None => Ok(self.ip_address.clone()),
            }
        }
        async fn cpu_usage(&self) -> Result<f64> {
            match self.fail("cpu") {
                Some(e) => Err(e),
                None => Ok(self.cpu_usage),
            }
        }
        async fn memory_usage(&self) -> Result<f64> {
            match self.fail("memory") {
                Some(e) => Err(e),
                None => Ok(self.memory_usage),
            }
        }
        async fn disk_usage(&self, _path: &str) -> Result<f64> {
            match self.fail("disk") {
                Some(e) => Err(e),
                None => Ok(self.disk_usage),
            }
        }
        async fn load_average(&self) -> Result<f64> {
            match self.fail("load_average") {
                Some(e) => Err(e),
                None => Ok(self.load_average),
            }
        }
        async fn uptime(&self) -> Result<i64> {
            match self.fail("uptime") {
                Some(e) => Err(e),
                None => Ok(self.uptime_seconds),
            }
        }
    }
}
