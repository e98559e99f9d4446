pub mod command;
pub mod errors;
pub mod handle;
pub mod label;
pub mod lifecycle;
pub mod message;
pub mod process;
pub mod state;
pub mod supervision;
pub mod supervisor;

pub mod prelude {
    pub use crate::command::CommandHandle;
    pub use crate::command::Direction;
    pub use crate::errors::PostmanError;
    pub use crate::errors::ServiceDoesNotExistError;
    pub use crate::errors::SpawnError;
    pub use crate::errors::SupervisorError;
    pub use crate::errors::UnknownCodeError;
    pub use crate::handle::ServiceHandle;
    pub use crate::label::Label;
    pub use crate::message::CommandResult;
    pub use crate::message::ResultStatus;
    pub use crate::message::ServiceCommand;
    pub use crate::message::ServiceEvent;
    pub use crate::message::ServiceInfo;
    pub use crate::state::ErrorCode;
    pub use crate::state::ServiceState;
    pub use crate::supervision::RetryConfig;
    pub use crate::supervision::RetryConfigBuilder;
    pub use crate::supervisor::ProcessSupervisor;
    pub use crate::supervisor::Supervisor;
    pub use crate::supervisor::SupervisorBuilder;
}
