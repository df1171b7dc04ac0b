//! Host collaborators for the sitectl deployment controller.
//!
//! This crate defines the seams the controller drives but does not own: the
//! `HostingBackend` trait with its per-call `RegistrySession`, directory
//! `AccessControl`, `Firewall` port control, and `ProcessControl` for forced
//! termination. It ships an in-memory `MockHost` used by tests and the
//! simulator, a libc-backed `SystemProcesses`, and local network helpers.

pub mod access;
pub mod backend;
pub mod firewall;
pub mod mock;
pub mod net;
pub mod process;

pub use access::{AccessControl, AccessRule, FileRights};
pub use backend::{
    HostingBackend, HostingUnit, PoolIdentity, PoolSettings, ProcessPool, RegistrySession,
    WorkerProcess,
};
pub use firewall::Firewall;
pub use mock::{MockAccessControl, MockCommand, MockFirewall, MockHost, MockOp};
pub use process::{ProcessControl, SystemProcesses};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("host I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The backend could not be reached for this call; retrying may succeed.
    #[error("backend communication failure: {0}")]
    Transient(String),
    #[error("hosting unit not found: {0}")]
    UnitNotFound(String),
    #[error("process pool not found: {0}")]
    PoolNotFound(String),
    #[error("'{0}' already exists in the hosting registry")]
    AlreadyExists(String),
    #[error("process {0} not found")]
    ProcessNotFound(u32),
    #[error("access control failure on {path}: {reason}")]
    Access { path: String, reason: String },
    #[error("firewall failure: {0}")]
    Firewall(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl HostError {
    pub fn is_transient(&self) -> bool {
        matches!(self, HostError::Transient(_))
    }
}
