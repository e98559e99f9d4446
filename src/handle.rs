use std::{fmt, sync::Arc};

use atomic_take::AtomicTake;
use tracing::debug;

use crate::{
    label::Label,
    message::{CommandResult, ServiceCommand},
    state::{ErrorCode, ServiceState},
    supervisor::Supervisor,
};

/// The claim on the label is given back exactly once, by
/// [`ServiceHandle::close`] or on drop.
pub struct ServiceHandle {
    label: Label,
    name: String,
    cmd: String,
    supervisor: Arc<dyn Supervisor>,
    lease: AtomicTake<Label>,
}

impl ServiceHandle {
    #[must_use]
    pub fn new(label: Label, name: String, cmd: String, supervisor: Arc<dyn Supervisor>) -> Self {
        Self {
            label,
            name,
            cmd,
            supervisor,
            lease: AtomicTake::new(label),
        }
    }

    #[must_use]
    pub fn label(&self) -> Label {
        self.label
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    pub async fn stop(&self) -> bool {
        self.command(ServiceCommand::Stop).await
    }

    pub async fn pause(&self) -> bool {
        self.command(ServiceCommand::Pause).await
    }

    /// Resumes a paused service, otherwise relaunches it.
    pub async fn restart(&self) -> bool {
        self.command(ServiceCommand::Restart).await
    }

    pub async fn finish(&self) -> bool {
        self.command(ServiceCommand::Finish).await
    }

    pub async fn state(&self) -> ServiceState {
        self.status().await.state
    }

    pub async fn error(&self) -> ErrorCode {
        self.status().await.error
    }

    pub async fn status(&self) -> CommandResult {
        self.supervisor
            .execute(self.label, ServiceCommand::Info)
            .await
    }

    pub fn close(self) {
        self.release();
    }

    async fn command(&self, command: ServiceCommand) -> bool {
        let result = self.supervisor.execute(self.label, command).await;
        if !result.is_ok() {
            debug!(
                service = %self.name,
                label = %self.label,
                %command,
                status = %result.status,
                state = %result.state,
                "Command not carried out"
            );
        }
        result.is_ok()
    }

    fn release(&self) {
        if let Some(label) = self.lease.take() {
            debug!(service = %self.name, %label, "Releasing service handle");
            self.supervisor.release(label);
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<name={},cmd={},label={}>",
            self.name, self.cmd, self.label
        )
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("label", &self.label)
            .field("name", &self.name)
            .field("cmd", &self.cmd)
            .field("released", &self.lease.is_taken())
            .finish_non_exhaustive()
    }
}
