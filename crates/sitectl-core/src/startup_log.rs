//! Per-application log of the configure, provision and start steps.
//!
//! Events emitted while a step runs inside [`StartupLog::scope`] are written
//! to the application's own log file instead of the process-wide subscriber.

use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, Dispatch, Level};

pub struct StartupLog {
    path: PathBuf,
    dispatch: Dispatch,
}

impl StartupLog {
    /// Open `path` for appending, creating it and its parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let subscriber = tracing_subscriber::fmt()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false)
            .with_max_level(Level::INFO)
            .finish();
        Ok(Self {
            path: path.to_path_buf(),
            dispatch: Dispatch::new(subscriber),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` with its events routed to this log. A failure is written
    /// here before it is returned.
    pub fn scope<T, E: Display>(
        &self,
        step: &str,
        op: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        tracing::dispatcher::with_default(&self.dispatch, || {
            op().inspect_err(|e| error!("{step} failed: {e}"))
        })
    }
}

impl std::fmt::Debug for StartupLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupLog").field("path", &self.path).finish()
    }
}
