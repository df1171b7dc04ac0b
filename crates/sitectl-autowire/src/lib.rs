//! Configuration autowiring for deployed applications.
//!
//! Autowiring rewrites an application's `web.config` before first start:
//! service markers are replaced with rendered connection strings, application
//! variables and the reserved log-path keys are upserted into `appSettings`,
//! the logging-support binary is deployed, health events are routed to the
//! log files, and the execution identity is granted access to the log
//! directories.
//!
//! The document transforms ([`apply_app_settings`], [`rewire_health_monitoring`],
//! [`substitute_markers`]) are pure; [`Autowirer`] does the file I/O.

pub mod healthmon;
pub mod markers;
pub mod settings;
mod wire;
pub mod xml;

pub use healthmon::{rewire_health_monitoring, HEALTH_MONITORING_FILE};
pub use markers::{resolve_connections, substitute_markers, ServiceConnection};
pub use settings::apply_app_settings;
pub use wire::{AutowireReport, AutowireRequest, Autowirer, CONFIG_FILE, LOGGING_SUPPORT_DIR};

use sitectl_host::HostError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutowireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed XML: {0}")]
    Xml(String),
    #[error("unexpected root element <{found}>, expected <{expected}>")]
    UnexpectedRoot {
        expected: &'static str,
        found: String,
    },
    #[error("path is not valid UTF-8: {0}")]
    InvalidPath(String),
    #[error(transparent)]
    Host(#[from] HostError),
}

pub(crate) fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), AutowireError> {
    let dir = dest
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}
