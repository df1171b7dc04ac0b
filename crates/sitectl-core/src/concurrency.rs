use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Host-wide lock serializing every hosting-registry mutation.
///
/// Construct one per process and share it by `Arc`. The lock is an advisory
/// file lock, so controllers in other processes on the same host exclude
/// each other as well.
#[derive(Debug, Clone)]
pub struct RegistryLock {
    path: PathBuf,
}

/// Proof that the registry lock is held. Released on drop.
#[derive(Debug)]
pub struct RegistryGuard {
    lock_file: File,
}

impl RegistryLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<File, CoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?)
    }

    /// Block until the lock is free.
    pub fn acquire(&self) -> Result<RegistryGuard, CoreError> {
        let file = self.open()?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e)))?;
        debug!("acquired registry lock {}", self.path.display());
        Ok(RegistryGuard { lock_file: file })
    }

    pub fn try_acquire(&self) -> Result<Option<RegistryGuard>, CoreError> {
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(RegistryGuard { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C cancels in-flight waits; a second one exits.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, abandoning current wait...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
