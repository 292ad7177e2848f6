//! Storage Node child process lifecycle.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::Context;
use tokio::process::{Child, Command};

/// A Storage Node running as a child process.
#[derive(Debug)]
pub struct StorageProcess {
    child: Child,
}

impl StorageProcess {
    /// Start `bin` with `args`, inheriting stdout and stderr.
    pub fn spawn(bin: &Path, args: &[String]) -> anyhow::Result<Self> {
        let mut command = Command::new(bin);
        command.args(args);
        Self::spawn_command(command)
            .with_context(|| format!("failed to start storage node {}", bin.display()))
    }

    /// Start an arbitrary command as the Storage Node.
    pub fn spawn_command(mut command: Command) -> anyhow::Result<Self> {
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        tracing::info!(pid = ?child.id(), "storage node started");
        Ok(Self { child })
    }

    /// The exit status if the process has already exited.
    pub fn try_wait(&mut self) -> anyhow::Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Ask the process to stop with SIGTERM, then kill it if it is still
    /// running after `wait`.
    pub async fn terminate(mut self, wait: Duration) -> anyhow::Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            tracing::warn!(%status, "storage node already exited");
            return Ok(status);
        }

        send_sigterm(&self.child);

        match tokio::time::timeout(wait, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::info!(%status, "storage node stopped");
                Ok(status)
            }
            Err(_) => {
                tracing::warn!(wait_secs = wait.as_secs_f64(), "storage node did not stop, killing");
                self.child.kill().await?;
                Ok(self.child.wait().await?)
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: kill only sends a signal to the given pid.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        tracing::warn!(
            pid,
            error = %std::io::Error::last_os_error(),
            "failed to send SIGTERM to storage node"
        );
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[tokio::test]
    async fn test_terminate_sends_sigterm() {
        let mut command = Command::new("sleep");
        command.arg("30");
        let mut process = StorageProcess::spawn_command(command).unwrap();
        assert!(process.try_wait().unwrap().is_none());

        let status = process.terminate(Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
    }

    #[tokio::test]
    async fn test_terminate_kills_when_sigterm_ignored() {
        let mut command = Command::new("sh");
        command.args(["-c", "trap '' TERM; sleep 30"]);
        let process = StorageProcess::spawn_command(command).unwrap();
        // Let the shell install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = process.terminate(Duration::from_millis(200)).await.unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn test_terminate_already_exited() {
        let process = StorageProcess::spawn_command(Command::new("true")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = process.terminate(Duration::from_secs(1)).await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let result = StorageProcess::spawn(Path::new("/nonexistent/splitbench-storage"), &[]);
        assert!(result.is_err());
    }
}
