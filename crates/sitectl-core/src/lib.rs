//! Deployment lifecycle controller for site-hosted applications.
//!
//! This crate ties the schema, host collaborators and autowiring together
//! into the `Controller`: configure, provision, start, stop, delete, cleanup,
//! process queries and forced kills for one application. It also provides
//! the cancellable state-wait engine, orphaned-unit detection, the
//! host-wide registry lock, per-application startup logs, and the
//! `AgentPlugin` entry points.

pub mod concurrency;
pub mod controller;
pub mod plugin;
pub mod startup_log;
pub mod teardown;
pub mod wait;

pub use concurrency::{install_signal_handler, shutdown_requested, RegistryGuard, RegistryLock};
pub use controller::{Controller, HostServices, StopOutcome};
pub use plugin::{AgentPlugin, SitePlugin};
pub use startup_log::StartupLog;
pub use teardown::{expand_env_vars, kill_pool_processes, orphaned_units};
pub use wait::{wait_for_state, WaitOutcome, WaitPolicy};

use sitectl_schema::ObjectState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] sitectl_schema::SchemaError),
    #[error("config error: {0}")]
    Config(#[from] sitectl_schema::ConfigError),
    #[error("host error: {0}")]
    Host(#[from] sitectl_host::HostError),
    #[error("autowire error: {0}")]
    Autowire(#[from] sitectl_autowire::AutowireError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no application configured")]
    NotConfigured,
    #[error("no hosting unit bound to port {0}")]
    NoUnitOnPort(u16),
    #[error("unit {unit} did not reach {state} within {waited_ms}ms")]
    Timeout {
        unit: String,
        state: ObjectState,
        waited_ms: u64,
    },
    #[error("operation cancelled by shutdown request")]
    Cancelled,
    #[error("{0} is not supported")]
    Unsupported(&'static str),
}
