use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::CheckConfig;
use crate::types::{CheckResult, CheckStatus};

/// Run the configured string through `sh -c`, bound to the shutdown token.
///
/// Both output streams are carried back in the result whether or not the
/// command succeeded.
pub async fn execute(check: &CheckConfig, shutdown: &CancellationToken) -> CheckResult {
    let mut result = CheckResult::new(&check.name, "command");

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&check.cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::select! {
        output = cmd.output() => output,
        _ = shutdown.cancelled() => {
            result.status = CheckStatus::Down;
            result.error = "command failed: cancelled during shutdown".to_string();
            return result;
        }
    };

    let output = match output {
        Ok(out) => out,
        Err(e) => {
            result.status = CheckStatus::Down;
            result.error = format!("command failed: {e}");
            return result;
        }
    };

    result.command_output = String::from_utf8_lossy(&output.stdout)
        .trim_end()
        .to_string();
    result.command_error = String::from_utf8_lossy(&output.stderr)
        .trim_end()
        .to_string();

    if output.status.success() {
        result.status = CheckStatus::Up;
    } else {
        result.status = CheckStatus::Down;
        result.error = match output.status.code() {
            Some(code) => format!("command failed: exit status {code}"),
            None => format!("command failed: {}", output.status),
        };
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn check_for(cmd: &str) -> CheckConfig {
        serde_yaml::from_str(&format!(
            "{{ name: script, type: command, cmd: {cmd:?}, interval: 30 }}"
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn successful_command_is_up_with_output() {
        let shutdown = CancellationToken::new();
        let result = execute(&check_for("printf 'hello world'"), &shutdown).await;

        assert_eq!(result.status, CheckStatus::Up);
        assert_eq!(result.command_output, "hello world");
        assert_eq!(result.command_error, "");
        assert!(result.error.is_empty());
    }

    #[tokio::test]
    async fn failing_command_is_down_but_keeps_output() {
        let shutdown = CancellationToken::new();
        let result = execute(
            &check_for("echo partial; echo oops >&2; exit 2"),
            &shutdown,
        )
        .await;

        assert_eq!(result.status, CheckStatus::Down);
        assert_eq!(result.error, "command failed: exit status 2");
        assert_eq!(result.command_output, "partial");
        assert_eq!(result.command_error, "oops");
    }

    #[tokio::test]
    async fn trailing_whitespace_is_trimmed() {
        let shutdown = CancellationToken::new();
        let result = execute(&check_for("printf 'value\\n\\n'"), &shutdown).await;

        assert_eq!(result.status, CheckStatus::Up);
        assert_eq!(result.command_output, "value");
    }

    #[tokio::test]
    async fn cancellation_interrupts_long_commands() {
        let shutdown = CancellationToken::new();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let result = execute(&check_for("sleep 30"), &shutdown).await;

        assert_eq!(result.status, CheckStatus::Down);
        assert!(result.error.starts_with("command failed"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
