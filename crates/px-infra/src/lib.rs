//! Task orchestration on top of the Proxmox VE API.
//!
//! State-changing requests return a task handle; `TaskPoller` drives that
//! handle to a terminal exit status. `OperationGates` optionally serialize
//! clone and resize submissions client-wide, and `Client` composes both into
//! the VM lifecycle operations.

use std::time::Duration;

pub mod client;
pub mod config;
pub mod disks;
pub mod fetch;
pub mod gate;
pub mod task;
pub mod vm;

#[cfg(test)]
mod testing;

pub use client::{Client, StatusAction};
pub use config::Configuration;
pub use disks::DiskDescriptor;
pub use fetch::RetryableFetch;
pub use gate::{OperationClass, OperationGates};
pub use task::{TaskHandle, TaskOutcome, TaskPoller};
pub use vm::{SizeDelta, SizeUnit, VmKind, VmRef};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pve transport error: {0}")]
    Transport(#[from] pve_api::Error),

    #[error("request rejected by server: {0}")]
    SubmissionRejected(String),

    #[error("task {upid} failed: {exit_status}")]
    TaskFailed { upid: String, exit_status: String },

    #[error("timed out after {waited:?} waiting for task {upid}")]
    TimedOut { upid: String, waited: Duration },

    #[error("malformed task handle: {0}")]
    MalformedTaskHandle(String),

    #[error("vm {0} not found")]
    VmNotFound(u32),

    #[error("vm '{0}' not found")]
    VmNameNotFound(String),

    #[error("unknown vm type: {0}")]
    UnknownVmKind(String),

    #[error("malformed disk: {0}")]
    MalformedDisk(String),

    #[error("cannot create vm disk {0}")]
    DiskCreation(String),

    #[error("failed to delete vm disk {disk}: {source}")]
    DiskRollback {
        disk: String,
        #[source]
        source: pve_api::Error,
    },

    #[error("vm id allocation failed: {0}")]
    IdAllocation(String),

    #[error("vm parameters carry no usable vmid")]
    MissingVmid,

    #[error("invalid size delta: {0}")]
    InvalidSize(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("missing env var: {0}")]
    MissingEnv(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Network and HTTP level failures. Everything else is either a terminal
    /// task outcome or a precondition violation.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
