use crate::HostError;
use serde::{Deserialize, Serialize};
use sitectl_schema::{AccountName, ObjectState};
use std::path::{Path, PathBuf};

/// Snapshot of a hosting unit as the backend reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostingUnit {
    pub name: String,
    pub state: ObjectState,
    /// Port of the primary binding.
    pub port: u16,
    pub physical_path: PathBuf,
    pub pool_name: Option<String>,
    pub autostart: bool,
}

/// Account a process pool executes as.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PoolIdentity {
    /// A backend-provided identity, not a named OS account.
    BuiltIn(String),
    SpecificUser {
        user: AccountName,
        password: String,
    },
}

impl PoolIdentity {
    /// The named account, if the pool runs as one.
    pub fn account(&self) -> Option<&AccountName> {
        match self {
            PoolIdentity::SpecificUser { user, .. } => Some(user),
            PoolIdentity::BuiltIn(_) => None,
        }
    }
}

impl Default for PoolIdentity {
    fn default() -> Self {
        PoolIdentity::BuiltIn("ApplicationPoolIdentity".to_owned())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolSettings {
    pub runtime_version: Option<String>,
    pub identity: PoolIdentity,
    pub enable_32bit: bool,
}

/// Snapshot of a process pool as the backend reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessPool {
    pub name: String,
    pub state: ObjectState,
    pub settings: PoolSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerProcess {
    pub pid: u32,
    pub pool_name: String,
}

/// Entry point to the external site/process-pool manager.
pub trait HostingBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Open a registry session. Sessions are short-lived: open one per
    /// operation step and drop it at the end; uncommitted changes are lost.
    fn open_session(&self) -> Result<Box<dyn RegistrySession + '_>, HostError>;
}

/// A connection to the hosting registry.
///
/// Structural changes (`create_*`, `configure_pool`, `bind_unit_to_pool`,
/// `remove_*`, `set_autostart`) are staged until `commit`. Runtime commands
/// (`start_unit`, `stop_unit`, `stop_pool`) and state reads take effect
/// immediately on committed objects.
pub trait RegistrySession {
    fn units(&self) -> Result<Vec<HostingUnit>, HostError>;

    fn unit(&self, name: &str) -> Result<Option<HostingUnit>, HostError>;

    fn pools(&self) -> Result<Vec<ProcessPool>, HostError>;

    fn pool(&self, name: &str) -> Result<Option<ProcessPool>, HostError>;

    fn worker_processes(&self) -> Result<Vec<WorkerProcess>, HostError>;

    fn create_unit(&mut self, name: &str, physical_path: &Path, port: u16)
        -> Result<(), HostError>;

    fn set_autostart(&mut self, unit: &str, autostart: bool) -> Result<(), HostError>;

    fn create_pool(&mut self, name: &str) -> Result<(), HostError>;

    fn configure_pool(&mut self, name: &str, settings: &PoolSettings) -> Result<(), HostError>;

    fn bind_unit_to_pool(&mut self, unit: &str, pool: &str) -> Result<(), HostError>;

    fn remove_unit(&mut self, name: &str) -> Result<(), HostError>;

    fn remove_pool(&mut self, name: &str) -> Result<(), HostError>;

    /// Flush every staged change to the backend as one transaction.
    fn commit(&mut self) -> Result<(), HostError>;

    fn unit_state(&self, name: &str) -> Result<ObjectState, HostError>;

    fn start_unit(&self, name: &str) -> Result<(), HostError>;

    fn stop_unit(&self, name: &str) -> Result<(), HostError>;

    fn pool_state(&self, name: &str) -> Result<ObjectState, HostError>;

    fn stop_pool(&self, name: &str) -> Result<(), HostError>;

    /// First unit whose primary binding uses `port`.
    fn unit_by_port(&self, port: u16) -> Result<Option<HostingUnit>, HostError> {
        Ok(self.units()?.into_iter().find(|u| u.port == port))
    }

    /// Live workers belonging to `pool`.
    fn pool_workers(&self, pool: &str) -> Result<Vec<WorkerProcess>, HostError> {
        Ok(self
            .worker_processes()?
            .into_iter()
            .filter(|w| w.pool_name == pool)
            .collect())
    }
}
