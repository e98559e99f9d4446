//! Service state machine. Nothing here touches a process.

use crate::{
    message::ServiceCommand,
    state::{ErrorCode, ServiceState},
};

/// What the supervisor has to do to carry out an accepted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Kill,
    Suspend,
    Resume,
    Relaunch { kill_current: bool },
    /// SIGTERM the process group and wait for it to exit.
    Terminate,
    Report,
}

impl Plan {
    #[must_use]
    pub fn target(self, current: ServiceState) -> ServiceState {
        match self {
            Self::Kill => ServiceState::Stopped,
            Self::Suspend => ServiceState::Paused,
            Self::Resume | Self::Relaunch { .. } => ServiceState::Running,
            Self::Terminate => ServiceState::FinishingUser,
            Self::Report => current,
        }
    }

    #[must_use]
    pub fn error_after(self, current: ErrorCode) -> ErrorCode {
        match self {
            Self::Kill => ErrorCode::ExitUser,
            Self::Resume | Self::Relaunch { .. } => ErrorCode::Ok,
            Self::Suspend | Self::Terminate | Self::Report => current,
        }
    }
}

/// Returns `None` when `command` is rejected in `state`.
#[must_use]
pub fn plan(state: ServiceState, command: ServiceCommand) -> Option<Plan> {
    use ServiceState::{Died, DiedSignal, DiedUnknown, Finished, Paused, Running, Stopped};

    match (command, state) {
        (ServiceCommand::Info, _) => Some(Plan::Report),
        (ServiceCommand::Stop, Running | Paused) => Some(Plan::Kill),
        (ServiceCommand::Finish, Running | Paused) => Some(Plan::Terminate),
        (ServiceCommand::Pause, Running) => Some(Plan::Suspend),
        (ServiceCommand::Restart, Paused) => Some(Plan::Resume),
        (ServiceCommand::Restart, Running) => Some(Plan::Relaunch { kill_current: true }),
        (ServiceCommand::Restart, Stopped | Died | DiedSignal | DiedUnknown | Finished) => {
            Some(Plan::Relaunch {
                kill_current: false,
            })
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Code(i32),
    Signal(i32),
    Unknown,
}

impl ExitOutcome {
    #[must_use]
    pub fn error_code(self) -> ErrorCode {
        match self {
            Self::Code(0) => ErrorCode::Ok,
            Self::Code(_) | Self::Signal(_) => ErrorCode::Exit,
            Self::Unknown => ErrorCode::Unknown,
        }
    }

    /// State and error after the process of a service in `state` exited.
    #[must_use]
    pub fn settle(self, state: ServiceState) -> Option<(ServiceState, ErrorCode)> {
        match state {
            ServiceState::FinishingUser => Some((ServiceState::FinishedUser, ErrorCode::ExitUser)),
            ServiceState::Running | ServiceState::Paused => {
                let next = match self {
                    Self::Code(0) => ServiceState::Finished,
                    Self::Code(_) => ServiceState::Died,
                    Self::Signal(_) => ServiceState::DiedSignal,
                    Self::Unknown => ServiceState::DiedUnknown,
                };
                Some((next, self.error_code()))
            }
            _ => None,
        }
    }
}
