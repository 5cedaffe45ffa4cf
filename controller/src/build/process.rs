//! Streaming, cancellable child processes

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::build::registry::CancelSignal;
use crate::errors::ControllerError;
use crate::events::Progress;

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

/// Ask `pid` to exit. False when the signal could not be delivered.
async fn send_sigterm(pid: u32) -> bool {
    match Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .await
    {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!("SIGTERM to {} failed: kill exited with {}", pid, status);
            false
        }
        Err(e) => {
            warn!("SIGTERM to {} failed: {}", pid, e);
            false
        }
    }
}

/// SIGTERM, then SIGKILL once `grace` elapsed. Without a delivered SIGTERM
/// the process is killed right away.
async fn terminate(child: &mut Child, grace: Duration) {
    let signalled = match child.id() {
        Some(pid) => {
            debug!("Sending SIGTERM to {}", pid);
            send_sigterm(pid).await
        }
        None => false,
    };

    if signalled && tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return;
    }
    if signalled {
        warn!("Process ignored SIGTERM for {:?}, killing", grace);
    }
    if let Err(e) = child.kill().await {
        warn!("Failed to kill process: {}", e);
    }
}

/// Run a command, forwarding stdout and stderr to `progress` line by line
/// as they are produced. Cancellation terminates the process and yields
/// `Cancelled`.
pub async fn run_streamed(
    command: &mut Command,
    progress: &Progress,
    cancel: &mut CancelSignal,
    grace: Duration,
) -> Result<ExitStatus, ControllerError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let (tx, mut rx) = mpsc::channel::<String>(256);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let status = loop {
        tokio::select! {
            Some(line) = rx.recv() => progress.log(line),
            status = child.wait() => break status?,
            _ = cancel.cancelled() => {
                terminate(&mut child, grace).await;
                return Err(ControllerError::Cancelled(progress.room().to_string()));
            }
        }
    };

    // Output still buffered after exit
    while let Some(line) = rx.recv().await {
        progress.log(line);
    }
    Ok(status)
}
