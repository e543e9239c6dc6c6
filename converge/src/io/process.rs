//! Bounded child-process execution for external lookups.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Output of a finished (or killed) child process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Run `cmd` with no stdin, killing it after `timeout`.
///
/// Both pipes are drained on reader threads while the child runs. At most
/// `output_limit` bytes of each are kept.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs()))]
pub fn run_bounded(mut cmd: Command, timeout: Duration, output_limit: usize) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn command");
            return Err(err).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || drain(stdout, output_limit));
    let stderr_handle = thread::spawn(move || drain(stderr, output_limit));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let stdout = join(stdout_handle).context("join stdout")?;
    let stderr = join(stderr_handle).context("join stderr")?;
    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ProcessOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        timed_out,
    })
}

fn join(handle: thread::JoinHandle<Result<Vec<u8>>>) -> Result<Vec<u8>> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read `reader` to the end, keeping the first `limit` bytes.
fn drain<R: Read>(mut reader: R, limit: usize) -> Result<Vec<u8>> {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok(kept)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_status() {
        let output = run_bounded(sh("echo 3.3.3"), Duration::from_secs(5), 1024).expect("run");
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "3.3.3");
    }

    #[test]
    fn truncates_output_to_limit() {
        let output =
            run_bounded(sh("printf 'abcdefgh'"), Duration::from_secs(5), 4).expect("run");
        assert_eq!(output.stdout, "abcd");
    }

    #[test]
    fn kills_on_timeout() {
        let output = run_bounded(sh("exec sleep 5"), Duration::from_millis(100), 1024).expect("run");
        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[test]
    fn spawn_failure_is_error() {
        let cmd = Command::new("converge-definitely-not-a-binary");
        assert!(run_bounded(cmd, Duration::from_secs(1), 1024).is_err());
    }
}
