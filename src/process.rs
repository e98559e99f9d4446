use std::{
    io,
    os::unix::process::ExitStatusExt,
    path::Path,
    process::{ExitStatus, Stdio},
};

use tokio::{
    process::{Child, Command},
    sync::mpsc,
};

use crate::{
    errors::{SignalError, SpawnError},
    label::Label,
    lifecycle::ExitOutcome,
    message::Notice,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Signal {
    #[strum(serialize = "SIGKILL")]
    Kill,
    #[strum(serialize = "SIGTERM")]
    Term,
    #[strum(serialize = "SIGSTOP")]
    Stop,
    #[strum(serialize = "SIGCONT")]
    Cont,
}

impl Signal {
    #[must_use]
    pub fn raw(self) -> libc::c_int {
        match self {
            Self::Kill => libc::SIGKILL,
            Self::Term => libc::SIGTERM,
            Self::Stop => libc::SIGSTOP,
            Self::Cont => libc::SIGCONT,
        }
    }
}

/// `shell -c cmd` as the leader of a new session.
pub(crate) fn shell_command(shell: &Path, cmd: &str) -> Command {
    let mut command = Command::new(shell);
    command.arg("-c").arg(cmd);

    // SAFETY: `setsid` is async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    command
}

pub(crate) fn spawn_service(shell: &Path, cmd: &str) -> Result<(u32, Child), SpawnError> {
    let mut command = shell_command(shell, cmd);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let child = command.spawn().map_err(|err| SpawnError::new(cmd, err))?;
    let pgid = child
        .id()
        .ok_or_else(|| SpawnError::new(cmd, io::Error::other("spawned process has no pid")))?;
    Ok((pgid, child))
}

pub(crate) fn signal_group(pgid: u32, signal: Signal) -> Result<(), SignalError> {
    let error = |source| SignalError {
        pgid,
        signal,
        source,
    };
    let raw_pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| error(io::Error::from(io::ErrorKind::InvalidInput)))?;

    // SAFETY: `killpg` has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(raw_pgid, signal.raw()) };
    if rc == -1 {
        return Err(error(io::Error::last_os_error()));
    }
    Ok(())
}

pub(crate) fn classify(status: io::Result<ExitStatus>) -> ExitOutcome {
    match status {
        Ok(status) => {
            if let Some(code) = status.code() {
                ExitOutcome::Code(code)
            } else if let Some(signal) = status.signal() {
                ExitOutcome::Signal(signal)
            } else {
                ExitOutcome::Unknown
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "Failed to wait for child process");
            ExitOutcome::Unknown
        }
    }
}

pub(crate) fn watch_exit(
    mut child: Child,
    label: Label,
    generation: u64,
    notices: mpsc::UnboundedSender<Notice>,
) {
    tokio::spawn(async move {
        let outcome = classify(child.wait().await);
        tracing::debug!(%label, generation, ?outcome, "Service process exited");
        if notices
            .send(Notice::Exited {
                label,
                generation,
                outcome,
            })
            .is_err()
        {
            tracing::debug!(%label, "Supervisor gone before exit could be reported");
        }
    });
}
