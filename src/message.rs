use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::{
    errors::{PostmanError, SupervisorError},
    label::Label,
    lifecycle::ExitOutcome,
    state::{ErrorCode, ServiceState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ServiceCommand {
    Stop,
    Pause,
    Restart,
    /// Graceful user shutdown: SIGTERM, then wait for the exit.
    Finish,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ResultStatus {
    Ok,
    /// Not valid in the current state.
    Rejected,
    Timeout,
    NotFound,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResult {
    pub status: ResultStatus,
    pub state: ServiceState,
    pub error: ErrorCode,
}

impl CommandResult {
    #[must_use]
    pub fn new(status: ResultStatus, state: ServiceState, error: ErrorCode) -> Self {
        Self {
            status,
            state,
            error,
        }
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::new(
            ResultStatus::NotFound,
            ServiceState::Unknown,
            ErrorCode::NotExists,
        )
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self::new(
            ResultStatus::Timeout,
            ServiceState::Unknown,
            ErrorCode::Timeout,
        )
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ResultStatus::Ok
    }
}

impl From<PostmanError> for CommandResult {
    fn from(value: PostmanError) -> Self {
        match value {
            PostmanError::ResponseTimeout(_) => Self::timeout(),
            PostmanError::SendError | PostmanError::ResponseReceiveError => Self::not_found(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub label: Label,
    pub name: String,
    pub cmd: String,
    pub state: ServiceState,
    pub error: ErrorCode,
    pub pid: Option<u32>,
    pub handles: usize,
    pub launches: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub label: Label,
    pub name: String,
    pub cmd: String,
    pub state: ServiceState,
    pub error: ErrorCode,
}

/// A counted claim on its way to the caller. Dropped without
/// [`Attached::accept`], it sends [`Notice::Abandoned`].
#[derive(Debug)]
pub(crate) struct Attached {
    label: Label,
    name: String,
    cmd: String,
    launched: bool,
    notices: Option<mpsc::UnboundedSender<Notice>>,
}

impl Attached {
    pub(crate) fn new(
        label: Label,
        name: String,
        cmd: String,
        launched: bool,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        Self {
            label,
            name,
            cmd,
            launched,
            notices: Some(notices),
        }
    }

    pub(crate) fn accept(mut self) -> (Label, String, String) {
        self.notices = None;
        (
            self.label,
            std::mem::take(&mut self.name),
            std::mem::take(&mut self.cmd),
        )
    }
}

impl Drop for Attached {
    fn drop(&mut self) {
        if let Some(notices) = self.notices.take() {
            let _ = notices.send(Notice::Abandoned {
                label: self.label,
                launched: self.launched,
            });
        }
    }
}

#[derive(Debug)]
pub(crate) enum Request {
    Attach {
        name: String,
        cmd: Option<String>,
        reply: oneshot::Sender<Result<Attached, SupervisorError>>,
    },
    Execute {
        label: Label,
        command: ServiceCommand,
        reply: oneshot::Sender<CommandResult>,
    },
    List {
        reply: oneshot::Sender<Vec<ServiceInfo>>,
    },
}

/// Unbounded, so it can be sent from `Drop`.
#[derive(Debug)]
pub(crate) enum Notice {
    Release {
        label: Label,
    },
    Exited {
        label: Label,
        generation: u64,
        outcome: ExitOutcome,
    },
    /// A graceful finish ran out of time.
    Escalate {
        label: Label,
        generation: u64,
    },
    /// An attach reply never reached its caller.
    Abandoned {
        label: Label,
        launched: bool,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Postman {
    tx: mpsc::Sender<Request>,
    notice_tx: mpsc::UnboundedSender<Notice>,
    timeout: Duration,
}

impl Postman {
    pub(crate) fn new(
        tx: mpsc::Sender<Request>,
        notice_tx: mpsc::UnboundedSender<Notice>,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            notice_tx,
            timeout,
        }
    }

    pub(crate) async fn send_and_await_response<R, F>(&self, build: F) -> Result<R, PostmanError>
    where
        F: FnOnce(oneshot::Sender<R>) -> Request,
    {
        let (res_tx, res_rx) = oneshot::channel::<R>();
        let round_trip = async {
            self.tx
                .send(build(res_tx))
                .await
                .map_err(|_| PostmanError::SendError)?;
            res_rx.await.map_err(|_| PostmanError::ResponseReceiveError)
        };

        tokio::time::timeout(self.timeout, round_trip)
            .await
            .map_err(|_| PostmanError::ResponseTimeout(self.timeout))?
    }

    pub(crate) fn notify(&self, notice: Notice) -> Result<(), PostmanError> {
        self.notice_tx
            .send(notice)
            .map_err(|_| PostmanError::SendError)
    }
}

#[derive(Debug)]
pub(crate) struct Mailbox {
    rx: mpsc::Receiver<Request>,
    notice_rx: mpsc::UnboundedReceiver<Notice>,
}

impl Mailbox {
    pub(crate) fn new(
        rx: mpsc::Receiver<Request>,
        notice_rx: mpsc::UnboundedReceiver<Notice>,
    ) -> Self {
        Self { rx, notice_rx }
    }

    pub(crate) async fn recv(&mut self) -> Option<Envelope> {
        tokio::select! {
            biased;
            Some(notice) = self.notice_rx.recv() => Some(Envelope::Notice(notice)),
            request = self.rx.recv() => request.map(Envelope::Request),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Envelope {
    Notice(Notice),
    Request(Request),
}
