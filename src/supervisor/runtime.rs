use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    command::{self, CommandHandle, Direction},
    errors::{ServiceDoesNotExistError, SpawnError, SupervisorError},
    handle::ServiceHandle,
    label::Label,
    lifecycle::{self, ExitOutcome, Plan},
    message::{
        Attached, CommandResult, Envelope, Mailbox, Notice, Postman, Request, ResultStatus,
        ServiceCommand, ServiceEvent, ServiceInfo,
    },
    process::{self, Signal},
    state::{ErrorCode, ServiceState},
    supervision::RetryConfig,
};

use super::{
    builder::SupervisorBuilder,
    registry::{Released, ServiceEntry, ServiceTable},
    Supervisor,
};

#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) shell: PathBuf,
    pub(crate) stop_timeout: Duration,
    pub(crate) retry_config: RetryConfig,
}

/// Front of a running supervisor loop.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    pub(crate) postman: Postman,
    pub(crate) events: broadcast::Sender<ServiceEvent>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) config: Config,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    /// Attaches to `name`, launching `cmd` if no such service is supervised.
    pub async fn check_service(
        &self,
        name: &str,
        cmd: &str,
    ) -> Result<ServiceHandle, SupervisorError> {
        if cmd.trim().is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }
        self.attach(name, Some(cmd.to_owned())).await
    }

    pub async fn query_service(&self, name: &str) -> Result<ServiceHandle, SupervisorError> {
        self.attach(name, None).await
    }

    pub async fn services(&self) -> Result<Vec<ServiceInfo>, SupervisorError> {
        Ok(self
            .postman
            .send_and_await_response(|reply| Request::List { reply })
            .await?)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    pub fn run_command(
        &self,
        cmd: &str,
        direction: Direction,
    ) -> Result<CommandHandle, SupervisorError> {
        command::spawn(
            &self.config.shell,
            cmd,
            direction,
            self.config.stop_timeout,
        )
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn attach(
        &self,
        name: &str,
        cmd: Option<String>,
    ) -> Result<ServiceHandle, SupervisorError> {
        let attached = self
            .postman
            .send_and_await_response(|reply| Request::Attach {
                name: name.to_owned(),
                cmd,
                reply,
            })
            .await??;
        let (label, name, cmd) = attached.accept();
        let supervisor: Arc<dyn Supervisor> = Arc::new(self.clone());
        Ok(ServiceHandle::new(label, name, cmd, supervisor))
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn execute(&self, label: Label, command: ServiceCommand) -> CommandResult {
        self.postman
            .send_and_await_response(|reply| Request::Execute {
                label,
                command,
                reply,
            })
            .await
            .unwrap_or_else(|err| {
                debug!(%label, %command, error = %err, "Request did not reach the supervisor");
                CommandResult::from(err)
            })
    }

    fn release(&self, label: Label) {
        if let Err(err) = self.postman.notify(Notice::Release { label }) {
            debug!(%label, error = %err, "Supervisor gone before release");
        }
    }
}

pub(crate) struct SupervisorLoop {
    pub(crate) mailbox: Mailbox,
    pub(crate) notices: mpsc::UnboundedSender<Notice>,
    pub(crate) events: broadcast::Sender<ServiceEvent>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) table: ServiceTable,
    pub(crate) config: Config,
}

impl SupervisorLoop {
    pub(crate) async fn run(mut self) {
        debug!("Supervisor started");
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    debug!("Stopping supervisor due to shutdown");
                    break;
                }
                res = self.mailbox.recv() => {
                    match res {
                        Some(Envelope::Notice(notice)) => self.handle_notice(notice),
                        Some(Envelope::Request(request)) => self.handle_request(request).await,
                        None => {
                            debug!("Stopping supervisor due to closed mailbox");
                            break;
                        }
                    }
                }
            }
        }
        self.kill_all();
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Attach { name, cmd, reply } => {
                if reply.is_closed() {
                    debug!(service = %name, "Attach abandoned before it was handled");
                    return;
                }
                let res = self.attach(name, cmd).await;
                // An undelivered claim reports itself as abandoned on drop.
                let _ = reply.send(res);
            }
            Request::Execute {
                label,
                command,
                reply,
            } => {
                let res = self.execute(label, command).await;
                let _ = reply.send(res);
            }
            Request::List { reply } => {
                let _ = reply.send(self.table.list());
            }
        }
    }

    fn handle_notice(&mut self, notice: Notice) {
        match notice {
            Notice::Release { label } => match self.table.release(label) {
                Some(Released::Removed) => debug!(%label, "Service released and forgotten"),
                Some(Released::Kept) => debug!(%label, "Service handle released"),
                None => debug!(%label, "Release for unknown label"),
            },
            Notice::Exited {
                label,
                generation,
                outcome,
            } => self.on_exit(label, generation, outcome),
            Notice::Escalate { label, generation } => self.on_escalate(label, generation),
            Notice::Abandoned { label, launched } => self.detach(label, launched),
        }
    }

    async fn attach(
        &mut self,
        name: String,
        cmd: Option<String>,
    ) -> Result<Attached, SupervisorError> {
        if let Some(label) = self.table.by_name(&name) {
            if let Some(entry) = self.table.get_mut(label) {
                entry.handles += 1;
                debug!(service = %name, %label, handles = entry.handles, "Attached to service");
                return Ok(Attached::new(
                    label,
                    name,
                    entry.cmd.clone(),
                    false,
                    self.notices.clone(),
                ));
            }
        }

        let Some(cmd) = cmd else {
            return Err(ServiceDoesNotExistError::new(name).into());
        };

        let label = self
            .table
            .insert(&name, &cmd, self.config.retry_config.clone());
        let launched = match self.table.get_mut(label) {
            Some(entry) => launch(entry, &self.config, &self.notices).await,
            None => Err(SpawnError::new(&cmd, std::io::ErrorKind::NotFound.into())),
        };
        match launched {
            Ok(()) => Ok(Attached::new(
                label,
                name,
                cmd,
                true,
                self.notices.clone(),
            )),
            Err(err) => {
                error!(service = %name, error = %err, "Failed to launch service");
                self.table.remove(label);
                Err(err.into())
            }
        }
    }

    /// Undoes an attach whose caller went away before the reply arrived.
    fn detach(&mut self, label: Label, launched: bool) {
        let Some(entry) = self.table.get_mut(label) else {
            return;
        };
        debug!(service = %entry.name, %label, launched, "Undoing abandoned attach");
        if launched && entry.handles == 1 && kill(entry) == ResultStatus::Ok {
            self.table.remove(label);
            return;
        }
        self.table.release(label);
    }

    async fn execute(&mut self, label: Label, command: ServiceCommand) -> CommandResult {
        let Some(entry) = self.table.get_mut(label) else {
            return CommandResult::not_found();
        };

        let Some(plan) = lifecycle::plan(entry.state, command) else {
            warn!(
                service = %entry.name,
                %label,
                %command,
                state = %entry.state,
                "Command rejected"
            );
            return entry.snapshot(ResultStatus::Rejected);
        };

        let status = match plan {
            Plan::Report => ResultStatus::Ok,
            Plan::Kill => kill(entry),
            Plan::Suspend => signal_group(entry, Signal::Stop, plan),
            Plan::Resume => signal_group(entry, Signal::Cont, plan),
            Plan::Terminate => terminate(entry, &self.config, &self.notices),
            Plan::Relaunch { kill_current } => {
                if kill_current && kill(entry) != ResultStatus::Ok {
                    return entry.snapshot(ResultStatus::Failed);
                }
                match launch(entry, &self.config, &self.notices).await {
                    Ok(()) => ResultStatus::Ok,
                    Err(err) => {
                        error!(service = %entry.name, %label, error = %err, "Failed to relaunch service");
                        entry.state = ServiceState::DiedUnknown;
                        entry.error = ErrorCode::Unknown;
                        ResultStatus::Failed
                    }
                }
            }
        };

        if plan != Plan::Report {
            debug!(
                service = %entry.name,
                %label,
                %command,
                %status,
                state = %entry.state,
                error = %entry.error,
                "Command handled"
            );
        }
        entry.snapshot(status)
    }

    fn on_exit(&mut self, label: Label, generation: u64, outcome: ExitOutcome) {
        let Some(entry) = self.table.get_mut(label) else {
            debug!(%label, "Exit of a forgotten service");
            return;
        };
        if entry.generation != generation {
            debug!(service = %entry.name, %label, generation, "Ignoring exit of a superseded launch");
            return;
        }

        entry.pgid = None;
        match outcome.settle(entry.state) {
            Some((state, error)) => {
                entry.state = state;
                entry.error = error;
                info!(service = %entry.name, %label, ?outcome, %state, %error, "Service exited");
                self.publish(label);
            }
            None => {
                warn!(service = %entry.name, %label, ?outcome, state = %entry.state, "Unexpected exit");
            }
        }
        self.forget_if_orphaned(label);
    }

    fn on_escalate(&mut self, label: Label, generation: u64) {
        let Some(entry) = self.table.get_mut(label) else {
            return;
        };
        if entry.generation != generation || entry.state != ServiceState::FinishingUser {
            return;
        }

        warn!(
            service = %entry.name,
            %label,
            timeout = ?self.config.stop_timeout,
            "Service did not finish in time, killing"
        );
        if kill(entry) != ResultStatus::Ok {
            return;
        }
        entry.state = ServiceState::FinishedUser;
        entry.error = ErrorCode::Timeout;
        self.publish(label);
        self.forget_if_orphaned(label);
    }

    fn publish(&self, label: Label) {
        if let Some(entry) = self.table.get(label) {
            // No subscribers is fine.
            let _ = self.events.send(entry.event());
        }
    }

    fn forget_if_orphaned(&mut self, label: Label) {
        if self.table.get(label).is_some_and(ServiceEntry::is_orphaned) {
            debug!(%label, "Forgetting service without handles");
            self.table.remove(label);
        }
    }

    fn kill_all(&mut self) {
        for (label, pgid) in self.table.live_groups() {
            debug!(%label, pgid, "Killing service on shutdown");
            if let Err(err) = process::signal_group(pgid, Signal::Kill) {
                if !err.is_gone() {
                    error!(%label, error = %err, "Failed to kill service on shutdown");
                }
            }
        }
    }
}

async fn launch(
    entry: &mut ServiceEntry,
    config: &Config,
    notices: &mpsc::UnboundedSender<Notice>,
) -> Result<(), SpawnError> {
    loop {
        match process::spawn_service(&config.shell, &entry.cmd) {
            Ok((pgid, child)) => {
                entry.generation += 1;
                entry.launches += 1;
                entry.pgid = Some(pgid);
                entry.state = ServiceState::Running;
                entry.error = ErrorCode::Ok;
                entry.retry.reset_count();
                process::watch_exit(child, entry.label, entry.generation, notices.clone());
                info!(service = %entry.name, label = %entry.label, pgid, launches = entry.launches, "Service launched");
                return Ok(());
            }
            Err(err) => {
                if entry.retry.increment_retry().is_err() {
                    return Err(err);
                }
                warn!(
                    service = %entry.name,
                    retry = entry.retry.retries(),
                    error = %err,
                    "Launch failed, retrying"
                );
                entry.retry.maybe_wait().await;
            }
        }
    }
}

/// On failure the entry is left untouched.
fn kill(entry: &mut ServiceEntry) -> ResultStatus {
    if let Some(pgid) = entry.pgid {
        if let Err(err) = process::signal_group(pgid, Signal::Kill) {
            if !err.is_gone() {
                error!(service = %entry.name, label = %entry.label, error = %err, "Failed to kill service");
                return ResultStatus::Failed;
            }
        }
    }
    entry.pgid = None;
    entry.generation += 1;
    entry.state = Plan::Kill.target(entry.state);
    entry.error = Plan::Kill.error_after(entry.error);
    ResultStatus::Ok
}

fn signal_group(entry: &mut ServiceEntry, signal: Signal, plan: Plan) -> ResultStatus {
    let Some(pgid) = entry.pgid else {
        return ResultStatus::Failed;
    };
    match process::signal_group(pgid, signal) {
        Ok(()) => {
            entry.state = plan.target(entry.state);
            entry.error = plan.error_after(entry.error);
            ResultStatus::Ok
        }
        Err(err) => {
            error!(service = %entry.name, label = %entry.label, error = %err, "Failed to signal service");
            ResultStatus::Failed
        }
    }
}

fn terminate(
    entry: &mut ServiceEntry,
    config: &Config,
    notices: &mpsc::UnboundedSender<Notice>,
) -> ResultStatus {
    let paused = entry.state == ServiceState::Paused;
    let status = signal_group(entry, Signal::Term, Plan::Terminate);
    if status != ResultStatus::Ok {
        return status;
    }
    // A stopped group only acts on SIGTERM once continued.
    if paused {
        if let Some(pgid) = entry.pgid {
            if let Err(err) = process::signal_group(pgid, Signal::Cont) {
                debug!(service = %entry.name, error = %err, "Failed to continue finishing service");
            }
        }
    }

    let label = entry.label;
    let generation = entry.generation;
    let stop_timeout = config.stop_timeout;
    let notices = notices.clone();
    tokio::spawn(async move {
        tokio::time::sleep(stop_timeout).await;
        let _ = notices.send(Notice::Escalate { label, generation });
    });
    status
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tokio::sync::oneshot;

    use super::*;
    use crate::supervision::RetryConfigBuilder;

    fn supervisor() -> ProcessSupervisor {
        SupervisorBuilder::new()
            .with_stop_timeout(Duration::from_millis(300))
            .spawn()
    }

    async fn wait_for_state(handle: &ServiceHandle, wanted: ServiceState) -> ServiceState {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let state = handle.state().await;
            if state == wanted || Instant::now() > deadline {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn supervisor_loop() -> SupervisorLoop {
        let (_tx, rx) = mpsc::channel(8);
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(8);
        SupervisorLoop {
            mailbox: Mailbox::new(rx, notice_rx),
            notices,
            events,
            shutdown: CancellationToken::new(),
            table: ServiceTable::default(),
            config: Config {
                shell: PathBuf::from("/bin/sh"),
                stop_timeout: Duration::from_millis(300),
                retry_config: RetryConfig::default(),
            },
        }
    }

    async fn next_notice(supervisor_loop: &mut SupervisorLoop) -> Notice {
        match supervisor_loop.mailbox.recv().await {
            Some(Envelope::Notice(notice)) => notice,
            other => panic!("expected a notice, got {other:?}"),
        }
    }

    async fn wait_for_count(supervisor: &ProcessSupervisor, wanted: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let count = supervisor.services().await.unwrap().len();
            if count == wanted || Instant::now() > deadline {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_check_service_starts_running() {
        let supervisor = supervisor();
        let handle = supervisor.check_service("logd", "sleep 30").await.unwrap();

        assert_eq!(handle.name(), "logd");
        assert_eq!(handle.cmd(), "sleep 30");
        assert_eq!(handle.state().await, ServiceState::Running);
        assert_eq!(handle.error().await, ErrorCode::Ok);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_pause_then_restart() {
        let supervisor = supervisor();
        let handle = supervisor.check_service("logd", "sleep 30").await.unwrap();

        assert!(handle.pause().await);
        assert_eq!(handle.state().await, ServiceState::Paused);
        assert!(!handle.pause().await);

        assert!(handle.restart().await);
        assert_eq!(handle.state().await, ServiceState::Running);
        assert_eq!(handle.error().await, ErrorCode::Ok);

        let info = supervisor.services().await.unwrap();
        assert_eq!(info[0].launches, 1);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_stop_twice() {
        let supervisor = supervisor();
        let handle = supervisor.check_service("logd", "sleep 30").await.unwrap();

        assert!(handle.stop().await);
        assert_eq!(handle.state().await, ServiceState::Stopped);
        assert_eq!(handle.error().await, ErrorCode::ExitUser);

        assert!(!handle.stop().await);
        assert_eq!(handle.state().await, ServiceState::Stopped);
        assert_eq!(handle.error().await, ErrorCode::ExitUser);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_stop_paused_service() {
        let supervisor = supervisor();
        let handle = supervisor.check_service("logd", "sleep 30").await.unwrap();

        assert!(handle.pause().await);
        assert!(handle.stop().await);
        assert_eq!(handle.state().await, ServiceState::Stopped);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_exit_code_marks_died() {
        let supervisor = supervisor();
        let handle = supervisor
            .check_service("crashy", "sleep 0.1; exit 3")
            .await
            .unwrap();

        assert_eq!(wait_for_state(&handle, ServiceState::Died).await, ServiceState::Died);
        assert_eq!(handle.error().await, ErrorCode::Exit);
        assert!(!handle.stop().await);
        assert_eq!(handle.state().await, ServiceState::Died);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_clean_exit_marks_finished() {
        let supervisor = supervisor();
        let handle = supervisor.check_service("oneshot", "true").await.unwrap();

        assert_eq!(
            wait_for_state(&handle, ServiceState::Finished).await,
            ServiceState::Finished
        );
        assert_eq!(handle.error().await, ErrorCode::Ok);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_signal_then_restart() {
        let supervisor = supervisor();
        let handle = supervisor.check_service("logd", "sleep 30").await.unwrap();
        let pgid = supervisor.services().await.unwrap()[0].pid.unwrap();

        process::signal_group(pgid, Signal::Kill).unwrap();
        assert_eq!(
            wait_for_state(&handle, ServiceState::DiedSignal).await,
            ServiceState::DiedSignal
        );
        assert_eq!(handle.error().await, ErrorCode::Exit);

        assert!(handle.restart().await);
        assert_eq!(handle.state().await, ServiceState::Running);
        assert_eq!(handle.error().await, ErrorCode::Ok);
        let info = supervisor.services().await.unwrap();
        assert_eq!(info[0].launches, 2);
        assert_ne!(info[0].pid, Some(pgid));
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_restart_running_service_relaunches() {
        let supervisor = supervisor();
        let handle = supervisor.check_service("logd", "sleep 30").await.unwrap();

        assert!(handle.restart().await);
        assert_eq!(handle.state().await, ServiceState::Running);
        // The killed launch must not drag the new one into a died state.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.state().await, ServiceState::Running);
        assert_eq!(supervisor.services().await.unwrap()[0].launches, 2);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_finish() {
        let supervisor = supervisor();
        let handle = supervisor.check_service("logd", "sleep 30").await.unwrap();

        assert!(handle.finish().await);
        assert_eq!(
            wait_for_state(&handle, ServiceState::FinishedUser).await,
            ServiceState::FinishedUser
        );
        assert_eq!(handle.error().await, ErrorCode::ExitUser);
        assert!(!handle.restart().await);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_finish_escalates_after_timeout() {
        let supervisor = supervisor();
        let handle = supervisor
            .check_service("stubborn", "trap '' TERM; sleep 30")
            .await
            .unwrap();

        assert!(handle.finish().await);
        assert_eq!(handle.state().await, ServiceState::FinishingUser);
        assert!(!handle.stop().await);

        assert_eq!(
            wait_for_state(&handle, ServiceState::FinishedUser).await,
            ServiceState::FinishedUser
        );
        assert_eq!(handle.error().await, ErrorCode::Timeout);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let supervisor = supervisor();
        let mut events = supervisor.subscribe();
        let _handle = supervisor.check_service("crashy", "exit 4").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.name, "crashy");
        assert_eq!(event.state, ServiceState::Died);
        assert_eq!(event.error, ErrorCode::Exit);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_two_handles_share_state() {
        let supervisor = supervisor();
        let first = supervisor.check_service("logd", "sleep 30").await.unwrap();
        let second = supervisor.check_service("logd", "ignored").await.unwrap();

        assert_eq!(first.label(), second.label());
        assert_eq!(second.cmd(), "sleep 30");
        assert!(first.pause().await);
        assert_eq!(second.state().await, ServiceState::Paused);
        assert_eq!(supervisor.services().await.unwrap()[0].handles, 2);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_release_forgets_stopped_service() {
        let supervisor = supervisor();
        let handle = supervisor.check_service("logd", "sleep 30").await.unwrap();
        assert!(handle.stop().await);
        handle.close();

        assert_eq!(wait_for_count(&supervisor, 0).await, 0);
        assert!(matches!(
            supervisor.query_service("logd").await,
            Err(SupervisorError::ServiceDoesNotExist(_))
        ));
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_running_service_survives_release() {
        let supervisor = supervisor();
        let handle = supervisor.check_service("logd", "sleep 30").await.unwrap();
        let label = handle.label();
        drop(handle);

        let handle = supervisor.query_service("logd").await.unwrap();
        assert_eq!(handle.label(), label);
        assert_eq!(handle.state().await, ServiceState::Running);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_exit_without_handles_forgets_service() {
        let supervisor = supervisor();
        supervisor
            .check_service("oneshot", "sleep 0.1")
            .await
            .unwrap()
            .close();

        assert_eq!(wait_for_count(&supervisor, 0).await, 0);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_after_shutdown() {
        let supervisor = supervisor();
        let handle = supervisor.check_service("logd", "sleep 30").await.unwrap();
        supervisor.shutdown();
        assert!(supervisor.is_shut_down());

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.state().await != ServiceState::Unknown && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(handle.state().await, ServiceState::Unknown);
        assert_eq!(handle.error().await, ErrorCode::NotExists);
        assert!(!handle.stop().await);
        assert!(!handle.restart().await);
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let supervisor = supervisor();
        let res = supervisor.query_service("netd").await;
        assert!(matches!(res, Err(SupervisorError::ServiceDoesNotExist(_))));

        let res = supervisor.check_service("netd", " ").await;
        assert!(matches!(res, Err(SupervisorError::EmptyCommand)));
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let supervisor = SupervisorBuilder::new()
            .with_shell("/nonexistent/sh")
            .with_retry_config(RetryConfigBuilder::new().with_max_retries(1).build())
            .spawn();

        let res = supervisor.check_service("logd", "sleep 30").await;
        assert!(matches!(res, Err(SupervisorError::Spawn(_))));
        assert!(supervisor.services().await.unwrap().is_empty());
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_listing_order() {
        let supervisor = supervisor();
        let mut handles = Vec::new();
        for name in ["zygote", "adbd", "logd"] {
            handles.push(supervisor.check_service(name, "sleep 30").await.unwrap());
        }
        let names: Vec<_> = supervisor
            .services()
            .await
            .unwrap()
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, ["zygote", "adbd", "logd"]);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_run_command() {
        let supervisor = supervisor();
        let mut command = supervisor
            .run_command("echo hello", Direction::Read)
            .unwrap();
        let mut out = Vec::new();
        command.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello\n");
        assert_eq!(command.close().await, ErrorCode::Ok);
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_attach_skipped_for_departed_caller() {
        let mut supervisor_loop = supervisor_loop();
        let (reply, rx) = oneshot::channel();
        drop(rx);

        supervisor_loop
            .handle_request(Request::Attach {
                name: "logd".to_owned(),
                cmd: Some("sleep 30".to_owned()),
                reply,
            })
            .await;
        assert!(supervisor_loop.table.list().is_empty());
    }

    #[tokio::test]
    async fn test_undelivered_launch_is_killed() {
        let mut supervisor_loop = supervisor_loop();
        let attached = supervisor_loop
            .attach("logd".to_owned(), Some("sleep 30".to_owned()))
            .await
            .unwrap();
        let pgid = supervisor_loop.table.list()[0].pid.unwrap();

        drop(attached);
        let notice = next_notice(&mut supervisor_loop).await;
        assert!(matches!(notice, Notice::Abandoned { launched: true, .. }));
        supervisor_loop.handle_notice(notice);
        assert!(supervisor_loop.table.list().is_empty());

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match process::signal_group(pgid, Signal::Cont) {
                Err(err) if err.is_gone() => break,
                _ if Instant::now() > deadline => panic!("group {pgid} still alive"),
                _ => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    }

    #[tokio::test]
    async fn test_undelivered_attach_gives_back_claim() {
        let mut supervisor_loop = supervisor_loop();
        let first = supervisor_loop
            .attach("logd".to_owned(), Some("sleep 30".to_owned()))
            .await
            .unwrap();
        let second = supervisor_loop.attach("logd".to_owned(), None).await.unwrap();
        assert_eq!(supervisor_loop.table.list()[0].handles, 2);

        drop(second);
        let notice = next_notice(&mut supervisor_loop).await;
        supervisor_loop.handle_notice(notice);
        let info = &supervisor_loop.table.list()[0];
        assert_eq!(info.handles, 1);
        assert_eq!(info.state, ServiceState::Running);

        // The launching claim is shared by now, so only the count goes down.
        let _shared = supervisor_loop.attach("logd".to_owned(), None).await.unwrap().accept();
        drop(first);
        let notice = next_notice(&mut supervisor_loop).await;
        supervisor_loop.handle_notice(notice);
        let info = &supervisor_loop.table.list()[0];
        assert_eq!(info.handles, 1);
        assert_eq!(info.state, ServiceState::Running);
        assert_eq!(info.launches, 1);
        supervisor_loop.kill_all();
    }

    #[tokio::test]
    async fn test_timed_out_attaches_leave_no_claims() {
        let supervisor = SupervisorBuilder::new()
            .with_request_timeout(Duration::from_millis(20))
            .spawn();

        let calls: Vec<_> = (0..50)
            .map(|i| {
                let supervisor = supervisor.clone();
                tokio::spawn(async move {
                    supervisor
                        .check_service(&format!("svc{i}"), "sleep 30")
                        .await
                })
            })
            .collect();
        let mut handles = Vec::new();
        for call in calls {
            if let Ok(handle) = call.await.unwrap() {
                handles.push(handle);
            }
        }

        // Abandoned claims are undone asynchronously.
        let deadline = Instant::now() + Duration::from_secs(5);
        let infos = loop {
            if let Ok(infos) = supervisor.services().await {
                if infos.len() == handles.len() {
                    break infos;
                }
            }
            assert!(Instant::now() < deadline, "abandoned services still listed");
            tokio::time::sleep(Duration::from_millis(50)).await;
        };
        assert!(infos.iter().all(|info| info.handles == 1));
        assert!(infos.iter().all(|info| info.launches == 1));
        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_failed_kill_leaves_entry_intact() {
        let mut supervisor_loop = supervisor_loop();
        let label = supervisor_loop
            .table
            .insert("logd", "sleep 30", RetryConfig::default());
        let entry = supervisor_loop.table.get_mut(label).unwrap();
        entry.state = ServiceState::Running;
        entry.pgid = Some(u32::MAX);
        entry.generation = 1;

        assert_eq!(kill(entry), ResultStatus::Failed);
        assert_eq!(entry.pgid, Some(u32::MAX));
        assert_eq!(entry.generation, 1);
        assert_eq!(entry.state, ServiceState::Running);

        let res = supervisor_loop.execute(label, ServiceCommand::Restart).await;
        assert_eq!(res.status, ResultStatus::Failed);
        assert_eq!(res.state, ServiceState::Running);
        let entry = supervisor_loop.table.get(label).unwrap();
        assert_eq!(entry.launches, 0);
        assert_eq!(entry.generation, 1);

        let res = supervisor_loop.execute(label, ServiceCommand::Stop).await;
        assert_eq!(res.status, ResultStatus::Failed);
        assert_eq!(res.state, ServiceState::Running);
    }

    #[tokio::test]
    async fn test_conflicting_commands_apply_in_some_order() {
        let supervisor = supervisor();
        let first = supervisor.check_service("logd", "sleep 30").await.unwrap();
        let second = supervisor.check_service("logd", "sleep 30").await.unwrap();

        let (stopped, restarted) = tokio::join!(first.stop(), second.restart());
        assert!(stopped);
        assert!(restarted);
        let info = &supervisor.services().await.unwrap()[0];
        assert_eq!(info.launches, 2);
        match info.state {
            ServiceState::Running => assert_eq!(info.error, ErrorCode::Ok),
            ServiceState::Stopped => {
                assert_eq!(info.error, ErrorCode::ExitUser);
                assert_eq!(info.pid, None);
            }
            other => panic!("unexpected state {other}"),
        }

        assert!(second.restart().await);
        let (a, b) = tokio::join!(first.pause(), second.pause());
        assert!(a ^ b);
        assert_eq!(first.state().await, ServiceState::Paused);
        supervisor.shutdown();
    }
}
