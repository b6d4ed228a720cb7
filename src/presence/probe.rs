use anyhow::Result;
use async_trait::async_trait;
use tokio::{process::Command, time::Duration};

const PROBE_TIMEOUT_SECS: u64 = 5;

/// Source of the screen-lock signal.
#[async_trait]
pub trait PresenceProbe: Send + Sync {
    async fn is_locked(&self) -> Result<bool>;
}

/// Asks the desktop session through its command-line tools. Any tool error
/// counts as "unlocked".
#[derive(Debug, Clone, Default)]
pub struct CommandProbe;

impl CommandProbe {
    pub fn new() -> Self {
        Self
    }

    async fn query(program: &str, args: &[&str]) -> Option<String> {
        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);

        match tokio::time::timeout(Duration::from_secs(PROBE_TIMEOUT_SECS), command.output()).await {
            Ok(Ok(output)) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

pub fn screensaver_reports_locked(stdout: &str) -> bool {
    stdout.contains("is active") || stdout.contains("is locked")
}

pub fn loginctl_reports_locked(stdout: &str) -> bool {
    stdout
        .lines()
        .any(|line| line.trim() == "LockedHint=yes" || line.trim() == "Active=no")
}

#[async_trait]
impl PresenceProbe for CommandProbe {
    async fn is_locked(&self) -> Result<bool> {
        if let Some(stdout) = Self::query("gnome-screensaver-command", &["--query"]).await {
            if screensaver_reports_locked(&stdout) {
                return Ok(true);
            }
        }

        let session = std::env::var("XDG_SESSION_ID").unwrap_or_else(|_| "auto".to_string());
        let args = ["show-session", session.as_str(), "-p", "LockedHint", "-p", "Active"];
        if let Some(stdout) = Self::query("loginctl", &args).await {
            if loginctl_reports_locked(&stdout) {
                return Ok(true);
            }
        }

        Ok(false)
    }
}
