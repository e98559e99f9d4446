use std::fmt;

use async_trait::async_trait;

use crate::{
    label::Label,
    message::{CommandResult, ServiceCommand},
};

mod builder;
mod registry;
mod runtime;

pub use builder::SupervisorBuilder;
pub use runtime::ProcessSupervisor;

#[async_trait]
pub trait Supervisor: Send + Sync + fmt::Debug {
    /// Must not wait for the process to reach the requested state.
    async fn execute(&self, label: Label, command: ServiceCommand) -> CommandResult;

    /// Called exactly once per handle, possibly from `Drop`. Must not block.
    fn release(&self, label: Label);
}
