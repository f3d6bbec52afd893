use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::state::StatusFile;

/// Deploy agent settings, taken from the environment
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub repo_url: String,
    pub local_path: String,
    pub poll_interval: Duration,
    pub ssh_key_path: String,
    pub git_token: String,
    pub deploy_command: String,
    pub state_dir: String,
}

impl DeployConfig {
    pub fn from_env() -> Result<Self> {
        let repo_url = std::env::var("BEACON_REPO_URL")
            .context("BEACON_REPO_URL is required for the deploy agent")?;
        let local_path = std::env::var("BEACON_LOCAL_PATH")
            .context("BEACON_LOCAL_PATH is required for the deploy agent")?;

        let poll_interval = match std::env::var("BEACON_POLL_INTERVAL") {
            Ok(raw) => humantime::parse_duration(&raw)
                .with_context(|| format!("invalid BEACON_POLL_INTERVAL: {raw:?}"))?,
            Err(_) => Duration::from_secs(60),
        };

        let state_dir = std::env::var("BEACON_STATE_DIR").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            format!("{home}/.beacon")
        });

        Ok(Self {
            repo_url,
            local_path,
            poll_interval,
            ssh_key_path: std::env::var("BEACON_SSH_KEY_PATH").unwrap_or_default(),
            git_token: std::env::var("BEACON_GIT_TOKEN").unwrap_or_default(),
            deploy_command: std::env::var("BEACON_DEPLOY_COMMAND").unwrap_or_default(),
            state_dir,
        })
    }

    /// Clone URL with the access token spliced in when both apply
    fn authenticated_url(&self) -> String {
        match (self.git_token.is_empty(), self.repo_url.strip_prefix("https://")) {
            (false, Some(rest)) => format!("https://{}@{}", self.git_token, rest),
            _ => self.repo_url.clone(),
        }
    }

    fn git_ssh_command(&self) -> Option<String> {
        if self.ssh_key_path.is_empty() {
            return None;
        }
        Some(format!(
            "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=no",
            self.ssh_key_path
        ))
    }
}

/// Poll the remote for new release tags until shutdown
pub async fn run(config: DeployConfig, shutdown: CancellationToken) -> Result<()> {
    info!(repo = %config.repo_url, path = %config.local_path, "starting deploy agent");
    let status = StatusFile::new(&config.state_dir)?;

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("deploy agent stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(e) = check_for_new_tag(&config, &status, &shutdown).await {
                    error!(error = %e, "deploy cycle failed");
                }
            }
        }
    }
}

/// One poll cycle: make sure a checkout exists, then deploy the newest tag
/// when it differs from the last deployed one.
pub async fn check_for_new_tag(
    config: &DeployConfig,
    status: &StatusFile,
    shutdown: &CancellationToken,
) -> Result<()> {
    if needs_initial_clone(&config.local_path) {
        info!(path = %config.local_path, "local path missing or empty, cloning repository");
        deploy(config, "", status, shutdown).await?;
        return Ok(());
    }

    let latest = latest_remote_tag(config, shutdown).await?;
    let last = status.load().last_tag;
    if latest.is_empty() || latest == last {
        return Ok(());
    }

    info!(tag = %latest, previous = %last, "new tag found");
    deploy(config, &latest, status, shutdown).await
}

fn needs_initial_clone(local_path: &str) -> bool {
    let path = Path::new(local_path);
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// Wipe the working tree, clone the tag (or default branch when empty), run
/// the post-deploy command inside the checkout, and persist the tag.
pub async fn deploy(
    config: &DeployConfig,
    tag: &str,
    status: &StatusFile,
    shutdown: &CancellationToken,
) -> Result<()> {
    if tag.is_empty() {
        info!("deploying default branch");
    } else {
        info!(tag, "deploying tag");
    }

    if Path::new(&config.local_path).exists() {
        std::fs::remove_dir_all(&config.local_path)
            .with_context(|| format!("failed to remove {}", config.local_path))?;
    }
    if let Some(parent) = Path::new(&config.local_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut clone = Command::new("git");
    clone.arg("clone");
    if !tag.is_empty() {
        clone.arg("--branch").arg(tag);
    }
    clone.arg(config.authenticated_url()).arg(&config.local_path);
    if let Some(ssh) = config.git_ssh_command() {
        clone.env("GIT_SSH_COMMAND", ssh);
    }

    let output = run_git(clone, shutdown).await?;
    if !output.status.success() {
        bail!(
            "git clone failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    if !config.deploy_command.is_empty() {
        info!(command = %config.deploy_command, "executing deploy command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&config.deploy_command)
            .current_dir(&config.local_path)
            .kill_on_drop(true);

        let cmd_status = tokio::select! {
            result = cmd.status() => result.context("failed to run deploy command")?,
            _ = shutdown.cancelled() => bail!("deploy command cancelled during shutdown"),
        };
        if !cmd_status.success() {
            bail!("deploy command failed with {cmd_status}");
        }
        info!("deploy command completed");
    }

    let stored_tag = if tag.is_empty() { "default" } else { tag };
    if let Err(e) = status.store(stored_tag) {
        warn!(error = %e, "failed to persist deploy status");
    }

    info!(tag = %stored_tag, "deployment complete");
    Ok(())
}

/// Fetch tags in the existing checkout and return the newest by creation date
async fn latest_remote_tag(
    config: &DeployConfig,
    shutdown: &CancellationToken,
) -> Result<String> {
    let mut fetch = Command::new("git");
    fetch
        .arg("fetch")
        .arg("--tags")
        .current_dir(&config.local_path);
    if let Some(ssh) = config.git_ssh_command() {
        fetch.env("GIT_SSH_COMMAND", ssh);
    }
    let output = run_git(fetch, shutdown).await?;
    if !output.status.success() {
        bail!(
            "git fetch --tags failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let mut list = Command::new("git");
    list.arg("for-each-ref")
        .arg("--sort=-creatordate")
        .arg("--format=%(refname:short)")
        .arg("--count=1")
        .arg("refs/tags")
        .current_dir(&config.local_path);
    let output = run_git(list, shutdown).await?;
    if !output.status.success() {
        bail!("git for-each-ref failed");
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn run_git(
    mut cmd: Command,
    shutdown: &CancellationToken,
) -> Result<std::process::Output> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    tokio::select! {
        output = cmd.output() => output.context("failed to run git"),
        _ = shutdown.cancelled() => bail!("cancelled during shutdown"),
    }
}
