use std::{
    fs::OpenOptions,
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::process::{Child, Command};

use crate::abort::AbortSignal;
use crate::capture::tools::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited(ExitStatus),
    /// Still running at the deadline; it has been killed.
    DeadlineReached,
}

/// Spawn `argv` with stdout/stderr redirected into `<label>_stdout.log` and
/// `<label>_stderr.log` under `log_dir`.
pub fn spawn_logged(label: &str, argv: &[String], log_dir: &Path) -> Result<Child, ToolError> {
    let (program, args) = argv.split_first().ok_or_else(|| ToolError::Spawn {
        tool: label.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
    })?;

    let open = |suffix: &str| {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_dir.join(format!("{}_{}.log", label, suffix)))
    };
    let stdout_file = open("stdout")?;
    let stderr_file = open("stderr")?;

    log::debug!("Executing {}: {}", label, argv.join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file))
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            tool: label.to_string(),
            source,
        })?;

    log::debug!("{} spawned (PID: {:?})", label, child.id());
    Ok(child)
}

/// Wait for `child` to exit, for `deadline` to elapse, or for an abort,
/// whichever comes first. On deadline or abort the child is killed and reaped
/// (waiting at most `grace` for it to go away).
pub async fn wait(
    child: &mut Child,
    label: &str,
    deadline: Option<Duration>,
    grace: Duration,
    signal: &mut AbortSignal,
) -> Result<ProcessOutcome, ToolError> {
    let deadline_elapsed = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        reason = signal.aborted() => {
            stop(child, label, grace).await;
            Err(ToolError::Cancelled {
                tool: label.to_string(),
                reason,
            })
        }
        status = child.wait() => {
            let status = status?;
            log::debug!("{} exited with {}", label, status);
            Ok(ProcessOutcome::Exited(status))
        }
        _ = deadline_elapsed => {
            stop(child, label, grace).await;
            Ok(ProcessOutcome::DeadlineReached)
        }
    }
}

/// SIGTERM first so capture tools can flush their last buffer; SIGKILL if the
/// child is still there after `grace`.
async fn stop(child: &mut Child, label: &str, grace: Duration) {
    if terminate(child, label).await {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                log::debug!("{} terminated ({})", label, status);
                return;
            }
            Ok(Err(e)) => {
                log::warn!("{} wait error: {}", label, e);
                return;
            }
            Err(_) => log::warn!("{} ignored SIGTERM for {:?}, killing", label, grace),
        }
    }

    if let Err(e) = child.start_kill() {
        log::warn!("Failed to kill {}: {}", label, e);
        return;
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => log::debug!("{} stopped ({})", label, status),
        Ok(Err(e)) => log::warn!("{} wait error: {}", label, e),
        Err(_) => log::warn!("{} did not exit within {:?} of being killed", label, grace),
    }
}

#[cfg(unix)]
async fn terminate(child: &Child, label: &str) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    let sent = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match sent {
        Ok(status) => status.success(),
        Err(e) => {
            log::warn!("Cannot send SIGTERM to {}: {}", label, e);
            false
        }
    }
}

#[cfg(not(unix))]
async fn terminate(_child: &Child, _label: &str) -> bool {
    false
}
