//! A running trainer process.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::debug;

use super::shutdown::{force_kill, request_stop};
use super::stream::spawn_line_reader;
use super::{CommandSpec, ProcessError};

/// Handle to a spawned trainer.
///
/// The child runs in its own process group with stdout and stderr piped
/// into one line channel. Dropping the handle kills the child.
#[derive(Debug)]
pub struct TrainerProcess {
    child: Child,
    pid: Option<u32>,
}

impl TrainerProcess {
    /// Start `spec`, returning the handle and the merged output lines.
    ///
    /// The line channel closes once both streams reached EOF.
    pub fn spawn(spec: &CommandSpec) -> Result<(Self, mpsc::UnboundedReceiver<String>), ProcessError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::MissingStream("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::MissingStream("stderr"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_line_reader(stdout, "stdout", tx.clone());
        spawn_line_reader(stderr, "stderr", tx);

        let pid = child.id();
        debug!(target: "tagtrack.process", pid = ?pid, command = %spec.display(), "Trainer process started");
        Ok((Self { child, pid }, rx))
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the trainer to stop gracefully.
    pub fn request_stop(&mut self) -> std::io::Result<()> {
        debug!(target: "tagtrack.process", pid = ?self.pid, "Requesting trainer stop");
        request_stop(&mut self.child)
    }

    /// Kill the trainer immediately.
    pub fn kill(&mut self) -> std::io::Result<()> {
        debug!(target: "tagtrack.process", pid = ?self.pid, "Killing trainer");
        force_kill(&mut self.child)
    }

    /// Wait for exit and return the exit code; signal termination maps to -1.
    pub async fn wait(&mut self) -> std::io::Result<i32> {
        let status = self.child.wait().await?;
        let code = status.code().unwrap_or(-1);
        debug!(target: "tagtrack.process", pid = ?self.pid, code, "Trainer process exited");
        Ok(code)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_merges_stdout_and_stderr() {
        let (mut proc, mut lines) = TrainerProcess::spawn(&sh("echo out; echo err >&2")).unwrap();

        let mut seen = Vec::new();
        while let Some(line) = lines.recv().await {
            seen.push(line);
        }
        seen.sort();

        assert_eq!(seen, vec!["err", "out"]);
        assert_eq!(proc.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_env_is_applied() {
        let spec = sh("echo \"gpu=$CUDA_VISIBLE_DEVICES\"").env("CUDA_VISIBLE_DEVICES", "3");
        let (mut proc, mut lines) = TrainerProcess::spawn(&spec).unwrap();

        assert_eq!(lines.recv().await.as_deref(), Some("gpu=3"));
        assert_eq!(proc.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exit_code_and_signal() {
        let (mut proc, _lines) = TrainerProcess::spawn(&sh("exit 7")).unwrap();
        assert_eq!(proc.wait().await.unwrap(), 7);

        let (mut proc, _lines) = TrainerProcess::spawn(&sh("sleep 30")).unwrap();
        proc.kill().unwrap();
        assert_eq!(proc.wait().await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = TrainerProcess::spawn(&CommandSpec::new("/nonexistent/trainer")).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { ref program, .. } if program == "/nonexistent/trainer"));
    }
}
