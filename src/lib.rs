//! Forge library crate
//!
//! Plan / execute / commit assistant for GitHub repositories. The
//! [`coordinator`] drives the workflow over two gateways: [`github`] for
//! repository contents and [`llm`] for chat completions.

pub mod app;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod diff;
pub mod error;
pub mod gateway;
pub mod github;
pub mod keyring;
pub mod llm;
pub mod logging;
pub mod onboarding;
pub mod plan;
pub mod snapshot;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{
    ActivityEntry, CommitResult, Coordinator, EditChange, ProposedEdit, RepositoryFile,
    WorkspaceState,
};
pub use error::{ForgeError, ForgeResult};
pub use gateway::{GatewayError, GatewayErrorKind, GatewayFuture};
pub use plan::{Plan, Step, StepOperation, StepStatus};
