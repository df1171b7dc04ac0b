//! Forced teardown of worker processes and orphaned-unit detection.

use sitectl_host::{HostError, HostingUnit, ProcessControl, RegistrySession};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Terminate every live worker of `pool` and wait for each to exit.
///
/// Workers that are already gone are skipped. Returns the killed pids.
pub fn kill_pool_processes(
    session: &dyn RegistrySession,
    processes: &dyn ProcessControl,
    pool: &str,
) -> Result<Vec<u32>, HostError> {
    let mut killed = Vec::new();
    for worker in session.pool_workers(pool)? {
        if !processes.is_alive(worker.pid)? {
            continue;
        }
        match processes.terminate(worker.pid) {
            Ok(()) => {}
            Err(HostError::ProcessNotFound(pid)) => {
                debug!("worker {pid} exited before it could be killed");
                continue;
            }
            Err(e) => return Err(e),
        }
        processes.wait_for_exit(worker.pid)?;
        info!("killed worker {} of pool '{pool}'", worker.pid);
        killed.push(worker.pid);
    }
    Ok(killed)
}

fn is_variable_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '(' | ')'))
}

/// Variable reference at the start of `text`: its name and byte length.
fn variable_at(text: &str) -> Option<(&str, usize)> {
    if let Some(body) = text.strip_prefix("${") {
        let end = body.find('}')?;
        let name = &body[..end];
        is_variable_name(name).then_some((name, end + 3))
    } else if let Some(body) = text.strip_prefix('%') {
        let end = body.find('%')?;
        let name = &body[..end];
        is_variable_name(name).then_some((name, end + 2))
    } else {
        None
    }
}

/// Expand `%VAR%` and `${VAR}` references from the process environment.
/// Unset variables are left as written.
pub fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find(|c: char| c == '%' || c == '$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match variable_at(tail) {
            Some((name, len)) => {
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => out.push_str(&tail[..len]),
                }
                rest = &tail[len..];
            }
            None => {
                out.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Case-folded path text without trailing separators.
fn comparable(path: &Path) -> String {
    path.to_string_lossy()
        .trim_end_matches(|c: char| c == '/' || c == '\\')
        .to_lowercase()
}

/// Every directory below `root`. A missing root has none.
pub fn subdirectories(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Units whose expanded physical path no longer exists, or is `root` or one
/// of its subdirectories.
pub fn orphaned_units<'a>(units: &'a [HostingUnit], root: &Path) -> Vec<&'a HostingUnit> {
    let mut targets: HashSet<String> = subdirectories(root)
        .iter()
        .map(PathBuf::as_path)
        .map(comparable)
        .collect();
    targets.insert(comparable(root));

    units
        .iter()
        .filter(|unit| {
            let expanded = PathBuf::from(expand_env_vars(&unit.physical_path.to_string_lossy()));
            !expanded.exists() || targets.contains(&comparable(&expanded))
        })
        .collect()
}
