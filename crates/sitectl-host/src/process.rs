use crate::HostError;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// OS-level process termination.
pub trait ProcessControl: Send + Sync {
    fn is_alive(&self, pid: u32) -> Result<bool, HostError>;

    /// Terminate `pid` without giving it a chance to clean up.
    fn terminate(&self, pid: u32) -> Result<(), HostError>;

    /// Block until `pid` has exited.
    fn wait_for_exit(&self, pid: u32) -> Result<(), HostError>;
}

/// Process control through `kill(2)` and `/proc`.
pub struct SystemProcesses {
    poll_interval: Duration,
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Scheduler state letter from `/proc/<pid>/stat`, or `None` if the process
/// table has no entry.
fn proc_state(pid: u32) -> Option<char> {
    let stat = std::fs::read_to_string(Path::new("/proc").join(pid.to_string()).join("stat")).ok()?;
    // comm may itself contain ')' so split on the last one
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

impl ProcessControl for SystemProcesses {
    fn is_alive(&self, pid: u32) -> Result<bool, HostError> {
        // Zombies have exited; only their parent can reap them.
        Ok(proc_state(pid).is_some_and(|s| s != 'Z' && s != 'X'))
    }

    fn terminate(&self, pid: u32) -> Result<(), HostError> {
        let pid_i32 = i32::try_from(pid)
            .map_err(|_| HostError::Backend(format!("invalid pid {pid}: exceeds i32 range")))?;
        debug!("sending SIGKILL to pid {pid}");
        // SAFETY: kill() with a valid pid and signal is safe; pid validated via i32::try_from above.
        #[allow(unsafe_code)]
        let ret = unsafe { libc::kill(pid_i32, libc::SIGKILL) };
        if ret != 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::ESRCH) {
                return Err(HostError::ProcessNotFound(pid));
            }
            return Err(HostError::Io(errno));
        }
        Ok(())
    }

    fn wait_for_exit(&self, pid: u32) -> Result<(), HostError> {
        while self.is_alive(pid)? {
            std::thread::sleep(self.poll_interval);
        }
        Ok(())
    }
}
