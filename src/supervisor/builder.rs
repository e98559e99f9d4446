use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    message::{Mailbox, Postman},
    supervision::RetryConfig,
};

use super::{
    registry::ServiceTable,
    runtime::{Config, ProcessSupervisor, SupervisorLoop},
};

#[derive(Debug, Clone)]
pub struct SupervisorBuilder {
    pub mailbox_size: NonZeroUsize,
    pub request_timeout: Duration,
    pub stop_timeout: Duration,
    pub event_capacity: NonZeroUsize,
    pub shell: PathBuf,
    pub retry_config: RetryConfig,
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self {
            mailbox_size: NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN),
            request_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(3),
            event_capacity: NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN),
            shell: PathBuf::from("/bin/sh"),
            retry_config: RetryConfig::default(),
        }
    }
}

impl SupervisorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_mailbox_size(mut self, size: NonZeroUsize) -> Self {
        self.mailbox_size = size;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_event_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.event_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_shell<T: Into<PathBuf>>(mut self, shell: T) -> Self {
        self.shell = shell.into();
        self
    }

    #[must_use]
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    #[must_use]
    pub fn spawn(self) -> ProcessSupervisor {
        let (tx, rx) = mpsc::channel(self.mailbox_size.get());
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(self.event_capacity.get());
        let shutdown = CancellationToken::new();

        let config = Config {
            shell: self.shell,
            stop_timeout: self.stop_timeout,
            retry_config: self.retry_config,
        };

        let supervisor_loop = SupervisorLoop {
            mailbox: Mailbox::new(rx, notice_rx),
            notices: notice_tx.clone(),
            events: events.clone(),
            shutdown: shutdown.clone(),
            table: ServiceTable::default(),
            config: config.clone(),
        };
        tokio::spawn(supervisor_loop.run());

        ProcessSupervisor {
            postman: Postman::new(tx, notice_tx, self.request_timeout),
            events,
            shutdown,
            config,
        }
    }
}
