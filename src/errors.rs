use std::{io, time::Duration};

use thiserror::Error;

use crate::process::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CodeKind {
    #[strum(serialize = "service state")]
    ServiceState,
    #[strum(serialize = "error code")]
    ErrorCode,
}

#[derive(Debug, Error)]
#[error("Unknown {kind} code: {code}")]
pub struct UnknownCodeError {
    pub kind: CodeKind,
    pub code: i32,
}

impl UnknownCodeError {
    #[must_use]
    pub fn new(kind: CodeKind, code: i32) -> Self {
        Self { kind, code }
    }
}

#[derive(Debug, Error)]
#[error("Service does not exist: {name}")]
pub struct ServiceDoesNotExistError {
    pub name: String,
}

impl ServiceDoesNotExistError {
    pub fn new<T: Into<String>>(name: T) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Error)]
#[error("Failed to spawn `{cmd}`: {source}")]
pub struct SpawnError {
    pub cmd: String,
    #[source]
    pub source: io::Error,
}

impl SpawnError {
    pub fn new<T: ToString + ?Sized>(cmd: &T, source: io::Error) -> Self {
        Self {
            cmd: cmd.to_string(),
            source,
        }
    }
}

#[derive(Debug, Error)]
#[error("Failed to send {signal} to process group {pgid}: {source}")]
pub struct SignalError {
    pub pgid: u32,
    pub signal: Signal,
    #[source]
    pub source: io::Error,
}

impl SignalError {
    /// The process group was already gone.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        self.source.raw_os_error() == Some(libc::ESRCH)
    }
}

#[derive(Debug, Error)]
pub enum PostmanError {
    #[error("Can't send request. Supervisor mailbox closed.")]
    SendError,
    #[error("Can't receive response. Supervisor dropped the reply.")]
    ResponseReceiveError,
    #[error("Supervisor did not answer within {0:?}")]
    ResponseTimeout(Duration),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    ServiceDoesNotExist(#[from] ServiceDoesNotExistError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Postman(#[from] PostmanError),
    #[error("Command line is empty")]
    EmptyCommand,
}

#[derive(Debug, Error)]
#[error("Reached max retry limit: {message}")]
pub struct RetryError {
    pub message: String,
}

impl RetryError {
    pub fn new<T: ToString + ?Sized>(message: &T) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_code_message() {
        let err = UnknownCodeError::new(CodeKind::ServiceState, 12);
        assert_eq!(err.to_string(), "Unknown service state code: 12");
    }

    #[test]
    fn test_signal_error_detects_missing_group() {
        let err = SignalError {
            pgid: 1,
            signal: Signal::Kill,
            source: io::Error::from_raw_os_error(libc::ESRCH),
        };
        assert!(err.is_gone());
        assert!(err.to_string().contains("SIGKILL"));
    }

    #[test]
    fn test_supervisor_error_is_transparent() {
        let err: SupervisorError = ServiceDoesNotExistError::new("logd").into();
        assert_eq!(err.to_string(), "Service does not exist: logd");
    }
}
