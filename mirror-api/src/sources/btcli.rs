//! Node CLI runner.
//!
//! The CLI renders rich tables sized to the terminal. It is run with a
//! 500x500 virtual terminal so wide tables do not wrap, and ANSI escapes
//! are stripped from whatever it prints.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use mirror_core::FetchError;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;

use crate::config::SourceConfig;
use crate::constants::{CLI_TERMINAL_COLUMNS, CLI_TERMINAL_LINES};

pub const SOURCE_NAME: &str = "btcli";

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("Invalid ANSI escape regex")
});

/// Remove terminal escape sequences (colors, cursor movement).
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Runs `btcli` subcommands against a fixed chain endpoint.
#[derive(Debug, Clone)]
pub struct BtcliRunner {
    binary: PathBuf,
    chain_endpoint: String,
    timeout: Duration,
}

impl BtcliRunner {
    pub fn new(binary: impl Into<PathBuf>, chain_endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            chain_endpoint: chain_endpoint.into(),
            timeout,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(
            config.btcli_path.clone(),
            config.chain_endpoint.clone(),
            config.fetch_timeout,
        )
    }

    /// Run `btcli <args> --subtensor.chain_endpoint <endpoint>` and return
    /// its stdout with escapes removed.
    ///
    /// A non-zero exit, a spawn failure or the timeout are all upstream
    /// failures; the child is killed if the timeout fires.
    pub async fn run(&self, args: &[&str]) -> Result<String, FetchError> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .arg("--subtensor.chain_endpoint")
            .arg(&self.chain_endpoint)
            .env("COLUMNS", CLI_TERMINAL_COLUMNS.to_string())
            .env("LINES", CLI_TERMINAL_LINES.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let execution = async {
            let child = command.spawn().map_err(|e| FetchError::Upstream {
                source_name: SOURCE_NAME.to_string(),
                reason: format!("failed to spawn {}: {}", self.binary.display(), e),
            })?;
            child.wait_with_output().await.map_err(|e| FetchError::Upstream {
                source_name: SOURCE_NAME.to_string(),
                reason: format!("failed to collect output: {}", e),
            })
        };

        let output = match tokio::time::timeout(self.timeout, execution).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    args = ?args,
                    timeout_secs = self.timeout.as_secs(),
                    "btcli call timed out"
                );
                return Err(FetchError::Timeout {
                    source_name: SOURCE_NAME.to_string(),
                    after: self.timeout,
                });
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        if !output.status.success() {
            let stderr = strip_ansi(&String::from_utf8_lossy(&output.stderr));
            let detail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
            tracing::warn!(args = ?args, status = %output.status, duration_ms, "btcli exited with failure");
            return Err(FetchError::Upstream {
                source_name: SOURCE_NAME.to_string(),
                reason: format!("{}: {}", output.status, detail),
            });
        }

        tracing::debug!(args = ?args, duration_ms, bytes = output.stdout.len(), "btcli call completed");
        Ok(strip_ansi(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_removes_colors_and_cursor_moves() {
        let raw = "\x1b[1m\x1b[32mNETUID\x1b[0m  NAME\x1b[2K\x1b(B";
        assert_eq!(strip_ansi(raw), "NETUID  NAME");
    }

    #[test]
    fn test_strip_ansi_keeps_plain_text() {
        assert_eq!(strip_ansi("1  alpha  τ0.5"), "1  alpha  τ0.5");
    }

    #[tokio::test]
    async fn test_missing_binary_is_upstream_failure() {
        let runner = BtcliRunner::new(
            "/nonexistent/btcli-for-tests",
            "ws://127.0.0.1:9944",
            Duration::from_secs(5),
        );
        let err = runner.run(&["s", "list"]).await.expect_err("spawn should fail");
        assert!(matches!(err, FetchError::Upstream { ref source_name, .. } if source_name == SOURCE_NAME));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_passes_endpoint_and_terminal_size() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let script = dir.path().join("fake-btcli");
        std::fs::write(&script, "#!/bin/sh\necho \"$@ cols=$COLUMNS\"\n").expect("write script");
        make_executable(&script);

        let runner = BtcliRunner::new(&script, "ws://node:9944", Duration::from_secs(5));
        let out = runner.run(&["s", "list"]).await.expect("run");
        assert_eq!(out.trim(), "s list --subtensor.chain_endpoint ws://node:9944 cols=500");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_times_out() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let script = dir.path().join("slow-btcli");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").expect("write script");
        make_executable(&script);

        let runner = BtcliRunner::new(&script, "ws://node:9944", Duration::from_millis(100));
        let err = runner.run(&["s", "list"]).await.expect_err("should time out");
        assert!(matches!(err, FetchError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_upstream_failure() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let script = dir.path().join("failing-btcli");
        std::fs::write(&script, "#!/bin/sh\necho 'connection refused' >&2\nexit 2\n").expect("write script");
        make_executable(&script);

        let runner = BtcliRunner::new(&script, "ws://node:9944", Duration::from_secs(5));
        match runner.run(&["s", "list"]).await {
            Err(FetchError::Upstream { reason, .. }) => assert!(reason.contains("connection refused")),
            other => panic!("expected upstream failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    fn make_executable(path: &std::path::Path) {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).expect("chmod");
    }
}
