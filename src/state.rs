//! Status codes shared between handles and the supervisor.

use strum::{Display, EnumIter, FromRepr};

use crate::errors::{CodeKind, UnknownCodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ServiceState {
    Paused = 0,
    Stopped = 1,
    Running = 2,
    Died = 3,
    DiedSignal = 4,
    DiedUnknown = 5,
    Finished = 6,
    /// Graceful shutdown requested by the user, process still alive.
    FinishingUser = 7,
    FinishedUser = 8,
    Unknown = 9,
}

impl ServiceState {
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Died
                | Self::DiedSignal
                | Self::DiedUnknown
                | Self::Finished
                | Self::FinishedUser
        )
    }

    #[must_use]
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::FinishingUser)
    }
}

impl From<ServiceState> for i32 {
    fn from(value: ServiceState) -> Self {
        value.code()
    }
}

impl TryFrom<i32> for ServiceState {
    type Error = UnknownCodeError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_repr(code).ok_or(UnknownCodeError::new(CodeKind::ServiceState, code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Timeout = 1,
    Exit = 2,
    /// The process exited because the user asked it to.
    ExitUser = 3,
    NotExists = 4,
    Unknown = 5,
}

impl ErrorCode {
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl From<ErrorCode> for i32 {
    fn from(value: ErrorCode) -> Self {
        value.code()
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = UnknownCodeError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_repr(code).ok_or(UnknownCodeError::new(CodeKind::ErrorCode, code))
    }
}
