//! One-shot commands with a single piped direction.

use std::{fmt, io, path::Path, process::Stdio, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, ChildStdout},
};
use tracing::{debug, info, warn};

use crate::{
    errors::{SpawnError, SupervisorError},
    process::{self, Signal},
    state::ErrorCode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
}

pub struct CommandHandle {
    cmd: String,
    direction: Direction,
    pgid: Option<u32>,
    child: Child,
    stdout: Option<ChildStdout>,
    stdin: Option<ChildStdin>,
    close_timeout: Duration,
}

pub(crate) fn spawn(
    shell: &Path,
    cmd: &str,
    direction: Direction,
    close_timeout: Duration,
) -> Result<CommandHandle, SupervisorError> {
    if cmd.trim().is_empty() {
        return Err(SupervisorError::EmptyCommand);
    }

    let mut command = process::shell_command(shell, cmd);
    command.stderr(Stdio::null()).kill_on_drop(true);
    match direction {
        Direction::Read => command.stdin(Stdio::null()).stdout(Stdio::piped()),
        Direction::Write => command.stdin(Stdio::piped()).stdout(Stdio::null()),
    };

    let mut child = command.spawn().map_err(|err| SpawnError::new(cmd, err))?;
    let pgid = child
        .id()
        .ok_or_else(|| SpawnError::new(cmd, io::Error::other("spawned process has no pid")))?;
    info!(cmd, %direction, pgid, "Command started");

    Ok(CommandHandle {
        cmd: cmd.to_owned(),
        direction,
        pgid: Some(pgid),
        stdout: child.stdout.take(),
        stdin: child.stdin.take(),
        child,
        close_timeout,
    })
}

impl CommandHandle {
    #[must_use]
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout_mut()?.read(buf).await
    }

    pub async fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.stdout_mut()?.read_to_end(buf).await
    }

    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stdin = self.stdin.as_mut().ok_or_else(|| unsupported(Direction::Write))?;
        stdin.write_all(buf).await?;
        Ok(buf.len())
    }

    /// A command still running after the close timeout is killed.
    pub async fn close(mut self) -> ErrorCode {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(err) = stdin.flush().await {
                debug!(cmd = %self.cmd, error = %err, "Failed to flush command stdin");
            }
        }
        self.stdout = None;

        match tokio::time::timeout(self.close_timeout, self.child.wait()).await {
            Ok(status) => {
                self.pgid = None;
                let error = process::classify(status).error_code();
                info!(cmd = %self.cmd, %error, "Command closed");
                error
            }
            Err(_) => {
                warn!(cmd = %self.cmd, timeout = ?self.close_timeout, "Command did not exit, killing");
                self.kill_group();
                let _ = self.child.wait().await;
                ErrorCode::Timeout
            }
        }
    }

    fn kill_group(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        if let Err(err) = process::signal_group(pgid, Signal::Kill) {
            if !err.is_gone() {
                warn!(cmd = %self.cmd, error = %err, "Failed to kill command");
            }
        }
    }

    fn stdout_mut(&mut self) -> io::Result<&mut ChildStdout> {
        self.stdout
            .as_mut()
            .ok_or_else(|| unsupported(Direction::Read))
    }
}

fn unsupported(wanted: Direction) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("command is not open for {wanted}"),
    )
}

impl Drop for CommandHandle {
    fn drop(&mut self) {
        if self.pgid.is_some() {
            debug!(cmd = %self.cmd, "Command dropped without close, killing");
            self.kill_group();
        }
    }
}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandle")
            .field("cmd", &self.cmd)
            .field("direction", &self.direction)
            .field("pgid", &self.pgid)
            .finish_non_exhaustive()
    }
}
