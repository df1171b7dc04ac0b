//! In-memory host collaborators.
//!
//! `MockHost` models the hosting registry with staged commits, per-read state
//! transitions, worker processes, stuck objects and injected transient
//! failures. It also plays the OS process table, so force-kills remove its
//! workers.

use crate::access::{AccessControl, AccessRule};
use crate::backend::{
    HostingBackend, HostingUnit, PoolSettings, ProcessPool, RegistrySession, WorkerProcess,
};
use crate::firewall::Firewall;
use crate::process::ProcessControl;
use crate::HostError;
use sitectl_schema::{AccountName, ObjectState};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Backend calls that can be made to fail transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    OpenSession,
    Commit,
    UnitState,
    StartUnit,
    StopUnit,
    PoolState,
    StopPool,
}

/// Runtime commands received by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCommand {
    StartUnit(String),
    StopUnit(String),
    StopPool(String),
}

#[derive(Debug, Clone)]
struct UnitRecord {
    physical_path: PathBuf,
    port: u16,
    pool_name: Option<String>,
    autostart: bool,
}

#[derive(Debug, Clone, Default)]
struct Registry {
    units: BTreeMap<String, UnitRecord>,
    pools: BTreeMap<String, PoolSettings>,
}

#[derive(Debug, Clone)]
enum Change {
    CreateUnit { name: String, record: UnitRecord },
    SetAutostart { unit: String, autostart: bool },
    CreatePool(String),
    ConfigurePool { name: String, settings: PoolSettings },
    Bind { unit: String, pool: String },
    RemoveUnit(String),
    RemovePool(String),
}

impl Registry {
    fn apply(&mut self, change: &Change) {
        match change {
            Change::CreateUnit { name, record } => {
                self.units.insert(name.clone(), record.clone());
            }
            Change::SetAutostart { unit, autostart } => {
                if let Some(u) = self.units.get_mut(unit) {
                    u.autostart = *autostart;
                }
            }
            Change::CreatePool(name) => {
                self.pools.insert(name.clone(), PoolSettings::default());
            }
            Change::ConfigurePool { name, settings } => {
                if let Some(p) = self.pools.get_mut(name) {
                    *p = settings.clone();
                }
            }
            Change::Bind { unit, pool } => {
                if let Some(u) = self.units.get_mut(unit) {
                    u.pool_name = Some(pool.clone());
                }
            }
            Change::RemoveUnit(name) => {
                self.units.remove(name);
            }
            Change::RemovePool(name) => {
                self.pools.remove(name);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Runtime {
    state: ObjectState,
    /// Target state and the number of further reads before it is reached.
    pending: Option<(ObjectState, u32)>,
}

impl Runtime {
    fn new(state: ObjectState) -> Self {
        Self {
            state,
            pending: None,
        }
    }

    /// Count one read toward the pending transition. A transition the state
    /// machine does not allow is dropped.
    fn advance(&mut self) -> Option<ObjectState> {
        let (target, remaining) = self.pending?;
        if !self.state.can_transition_to(target) {
            self.pending = None;
            return None;
        }
        if remaining == 0 {
            self.state = target;
            self.pending = None;
            Some(target)
        } else {
            self.pending = Some((target, remaining - 1));
            None
        }
    }
}

#[derive(Debug)]
struct MockState {
    registry: Registry,
    units: HashMap<String, Runtime>,
    pools: HashMap<String, Runtime>,
    workers: Vec<WorkerProcess>,
    next_pid: u32,
    latency: u32,
    stuck_units: HashSet<String>,
    stuck_pools: HashSet<String>,
    failures: HashMap<MockOp, u32>,
    commands: Vec<MockCommand>,
    killed: Vec<u32>,
    commits: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            registry: Registry::default(),
            units: HashMap::new(),
            pools: HashMap::new(),
            workers: Vec::new(),
            next_pid: 4000,
            latency: 0,
            stuck_units: HashSet::new(),
            stuck_pools: HashSet::new(),
            failures: HashMap::new(),
            commands: Vec::new(),
            killed: Vec::new(),
            commits: 0,
        }
    }
}

impl MockState {
    fn take_failure(&mut self, op: MockOp) -> Result<(), HostError> {
        if let Some(remaining) = self.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(HostError::Transient(format!("injected {op:?} failure")));
            }
        }
        Ok(())
    }

    fn spawn_worker(&mut self, pool: &str) -> u32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        self.workers.push(WorkerProcess {
            pid,
            pool_name: pool.to_owned(),
        });
        pid
    }

    fn on_unit_started(&mut self, unit: &str) {
        let Some(pool) = self
            .registry
            .units
            .get(unit)
            .and_then(|u| u.pool_name.clone())
        else {
            return;
        };
        if let Some(rt) = self.pools.get_mut(&pool) {
            *rt = Runtime::new(ObjectState::Started);
        }
        if !self.workers.iter().any(|w| w.pool_name == pool) {
            self.spawn_worker(&pool);
        }
    }

    fn on_pool_stopped(&mut self, pool: &str) {
        self.workers.retain(|w| w.pool_name != pool);
    }

    fn observe_unit(&mut self, name: &str) -> Result<ObjectState, HostError> {
        let rt = self
            .units
            .get_mut(name)
            .ok_or_else(|| HostError::UnitNotFound(name.to_owned()))?;
        let reached = rt.advance();
        let state = rt.state;
        if reached == Some(ObjectState::Started) {
            self.on_unit_started(name);
        }
        Ok(state)
    }

    fn observe_pool(&mut self, name: &str) -> Result<ObjectState, HostError> {
        let rt = self
            .pools
            .get_mut(name)
            .ok_or_else(|| HostError::PoolNotFound(name.to_owned()))?;
        let reached = rt.advance();
        let state = rt.state;
        if reached == Some(ObjectState::Stopped) {
            self.on_pool_stopped(name);
        }
        Ok(state)
    }

    fn unit_snapshot(&self, name: &str, record: &UnitRecord) -> HostingUnit {
        HostingUnit {
            name: name.to_owned(),
            state: self
                .units
                .get(name)
                .map_or(ObjectState::Stopped, |rt| rt.state),
            port: record.port,
            physical_path: record.physical_path.clone(),
            pool_name: record.pool_name.clone(),
            autostart: record.autostart,
        }
    }

    fn pool_snapshot(&self, name: &str, settings: &PoolSettings) -> ProcessPool {
        ProcessPool {
            name: name.to_owned(),
            state: self
                .pools
                .get(name)
                .map_or(ObjectState::Stopped, |rt| rt.state),
            settings: settings.clone(),
        }
    }

    fn commit(&mut self, changes: &[Change]) {
        for change in changes {
            self.registry.apply(change);
            match change {
                Change::CreateUnit { name, .. } => {
                    self.units
                        .insert(name.clone(), Runtime::new(ObjectState::Stopped));
                }
                Change::CreatePool(name) => {
                    self.pools
                        .insert(name.clone(), Runtime::new(ObjectState::Started));
                }
                Change::RemoveUnit(name) => {
                    self.units.remove(name);
                    self.stuck_units.remove(name);
                }
                Change::RemovePool(name) => {
                    self.pools.remove(name);
                    self.stuck_pools.remove(name);
                    self.on_pool_stopped(name);
                }
                Change::SetAutostart { .. }
                | Change::ConfigurePool { .. }
                | Change::Bind { .. } => {}
            }
        }
        self.commits += 1;
    }
}

/// In-memory hosting registry and process table.
#[derive(Debug, Default)]
pub struct MockHost {
    state: Mutex<MockState>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of state reads a start or stop takes to complete.
    #[must_use]
    pub fn with_latency(self, reads: u32) -> Self {
        self.state().latency = reads;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a unit and a same-named pool bound to it, committed.
    pub fn insert_unit(&self, name: &str, physical_path: &Path, port: u16) {
        let changes = [
            Change::CreateUnit {
                name: name.to_owned(),
                record: UnitRecord {
                    physical_path: physical_path.to_path_buf(),
                    port,
                    pool_name: None,
                    autostart: false,
                },
            },
            Change::CreatePool(name.to_owned()),
            Change::Bind {
                unit: name.to_owned(),
                pool: name.to_owned(),
            },
        ];
        self.state().commit(&changes);
    }

    /// Force a unit into `state`, cancelling any transition in flight.
    pub fn set_unit_state(&self, name: &str, state: ObjectState) {
        let mut s = self.state();
        if let Some(rt) = s.units.get_mut(name) {
            *rt = Runtime::new(state);
        }
        if state == ObjectState::Started {
            s.on_unit_started(name);
        }
    }

    /// Make every future stop of this unit hang in `Stopping`.
    pub fn stick_unit_stopping(&self, name: &str) {
        self.state().stuck_units.insert(name.to_owned());
    }

    /// Make every future stop of this pool hang in `Stopping`.
    pub fn stick_pool_stopping(&self, name: &str) {
        self.state().stuck_pools.insert(name.to_owned());
    }

    /// Fail the next `times` calls of `op` with a transient error.
    pub fn fail_transiently(&self, op: MockOp, times: u32) {
        self.state().failures.insert(op, times);
    }

    pub fn spawn_worker(&self, pool: &str) -> u32 {
        self.state().spawn_worker(pool)
    }

    pub fn commands(&self) -> Vec<MockCommand> {
        self.state().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    pub fn killed_pids(&self) -> Vec<u32> {
        self.state().killed.clone()
    }

    pub fn commit_count(&self) -> usize {
        self.state().commits
    }

    /// Committed unit names.
    pub fn unit_names(&self) -> Vec<String> {
        self.state().registry.units.keys().cloned().collect()
    }

    /// Committed pool names.
    pub fn pool_names(&self) -> Vec<String> {
        self.state().registry.pools.keys().cloned().collect()
    }

    /// Current state without advancing any transition.
    pub fn peek_unit_state(&self, name: &str) -> Option<ObjectState> {
        self.state().units.get(name).map(|rt| rt.state)
    }
}

impl HostingBackend for MockHost {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open_session(&self) -> Result<Box<dyn RegistrySession + '_>, HostError> {
        let mut state = self.state();
        state.take_failure(MockOp::OpenSession)?;
        let working = state.registry.clone();
        Ok(Box::new(MockSession {
            host: self,
            working,
            staged: Vec::new(),
        }))
    }
}

struct MockSession<'a> {
    host: &'a MockHost,
    working: Registry,
    staged: Vec<Change>,
}

impl MockSession<'_> {
    fn stage(&mut self, change: Change) {
        self.working.apply(&change);
        self.staged.push(change);
    }

    fn require_unit(&self, name: &str) -> Result<(), HostError> {
        if self.working.units.contains_key(name) {
            Ok(())
        } else {
            Err(HostError::UnitNotFound(name.to_owned()))
        }
    }

    fn require_pool(&self, name: &str) -> Result<(), HostError> {
        if self.working.pools.contains_key(name) {
            Ok(())
        } else {
            Err(HostError::PoolNotFound(name.to_owned()))
        }
    }
}

impl RegistrySession for MockSession<'_> {
    fn units(&self) -> Result<Vec<HostingUnit>, HostError> {
        let state = self.host.state();
        Ok(self
            .working
            .units
            .iter()
            .map(|(name, record)| state.unit_snapshot(name, record))
            .collect())
    }

    fn unit(&self, name: &str) -> Result<Option<HostingUnit>, HostError> {
        let state = self.host.state();
        Ok(self
            .working
            .units
            .get(name)
            .map(|record| state.unit_snapshot(name, record)))
    }

    fn pools(&self) -> Result<Vec<ProcessPool>, HostError> {
        let state = self.host.state();
        Ok(self
            .working
            .pools
            .iter()
            .map(|(name, settings)| state.pool_snapshot(name, settings))
            .collect())
    }

    fn pool(&self, name: &str) -> Result<Option<ProcessPool>, HostError> {
        let state = self.host.state();
        Ok(self
            .working
            .pools
            .get(name)
            .map(|settings| state.pool_snapshot(name, settings)))
    }

    fn worker_processes(&self) -> Result<Vec<WorkerProcess>, HostError> {
        Ok(self.host.state().workers.clone())
    }

    fn create_unit(
        &mut self,
        name: &str,
        physical_path: &Path,
        port: u16,
    ) -> Result<(), HostError> {
        if self.working.units.contains_key(name) {
            return Err(HostError::AlreadyExists(name.to_owned()));
        }
        self.stage(Change::CreateUnit {
            name: name.to_owned(),
            record: UnitRecord {
                physical_path: physical_path.to_path_buf(),
                port,
                pool_name: None,
                autostart: true,
            },
        });
        Ok(())
    }

    fn set_autostart(&mut self, unit: &str, autostart: bool) -> Result<(), HostError> {
        self.require_unit(unit)?;
        self.stage(Change::SetAutostart {
            unit: unit.to_owned(),
            autostart,
        });
        Ok(())
    }

    fn create_pool(&mut self, name: &str) -> Result<(), HostError> {
        if self.working.pools.contains_key(name) {
            return Err(HostError::AlreadyExists(name.to_owned()));
        }
        self.stage(Change::CreatePool(name.to_owned()));
        Ok(())
    }

    fn configure_pool(&mut self, name: &str, settings: &PoolSettings) -> Result<(), HostError> {
        self.require_pool(name)?;
        self.stage(Change::ConfigurePool {
            name: name.to_owned(),
            settings: settings.clone(),
        });
        Ok(())
    }

    fn bind_unit_to_pool(&mut self, unit: &str, pool: &str) -> Result<(), HostError> {
        self.require_unit(unit)?;
        self.require_pool(pool)?;
        self.stage(Change::Bind {
            unit: unit.to_owned(),
            pool: pool.to_owned(),
        });
        Ok(())
    }

    fn remove_unit(&mut self, name: &str) -> Result<(), HostError> {
        self.require_unit(name)?;
        self.stage(Change::RemoveUnit(name.to_owned()));
        Ok(())
    }

    fn remove_pool(&mut self, name: &str) -> Result<(), HostError> {
        self.require_pool(name)?;
        self.stage(Change::RemovePool(name.to_owned()));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), HostError> {
        let mut state = self.host.state();
        state.take_failure(MockOp::Commit)?;
        let staged = std::mem::take(&mut self.staged);
        state.commit(&staged);
        Ok(())
    }

    fn unit_state(&self, name: &str) -> Result<ObjectState, HostError> {
        let mut state = self.host.state();
        state.take_failure(MockOp::UnitState)?;
        state.observe_unit(name)
    }

    fn start_unit(&self, name: &str) -> Result<(), HostError> {
        let mut state = self.host.state();
        state.take_failure(MockOp::StartUnit)?;
        state.commands.push(MockCommand::StartUnit(name.to_owned()));
        let latency = state.latency;
        let rt = state
            .units
            .get_mut(name)
            .ok_or_else(|| HostError::UnitNotFound(name.to_owned()))?;
        if rt.state != ObjectState::Started {
            rt.state = ObjectState::Starting;
            rt.pending = Some((ObjectState::Started, latency));
        }
        Ok(())
    }

    fn stop_unit(&self, name: &str) -> Result<(), HostError> {
        let mut state = self.host.state();
        state.take_failure(MockOp::StopUnit)?;
        state.commands.push(MockCommand::StopUnit(name.to_owned()));
        let latency = state.latency;
        let stuck = state.stuck_units.contains(name);
        let rt = state
            .units
            .get_mut(name)
            .ok_or_else(|| HostError::UnitNotFound(name.to_owned()))?;
        if rt.state != ObjectState::Stopped {
            rt.state = ObjectState::Stopping;
            rt.pending = (!stuck).then_some((ObjectState::Stopped, latency));
        }
        Ok(())
    }

    fn pool_state(&self, name: &str) -> Result<ObjectState, HostError> {
        let mut state = self.host.state();
        state.take_failure(MockOp::PoolState)?;
        state.observe_pool(name)
    }

    fn stop_pool(&self, name: &str) -> Result<(), HostError> {
        let mut state = self.host.state();
        state.take_failure(MockOp::StopPool)?;
        state.commands.push(MockCommand::StopPool(name.to_owned()));
        let latency = state.latency;
        let stuck = state.stuck_pools.contains(name);
        let rt = state
            .pools
            .get_mut(name)
            .ok_or_else(|| HostError::PoolNotFound(name.to_owned()))?;
        if rt.state != ObjectState::Stopped {
            rt.state = ObjectState::Stopping;
            rt.pending = (!stuck).then_some((ObjectState::Stopped, latency));
        }
        Ok(())
    }
}

impl ProcessControl for MockHost {
    fn is_alive(&self, pid: u32) -> Result<bool, HostError> {
        Ok(self.state().workers.iter().any(|w| w.pid == pid))
    }

    fn terminate(&self, pid: u32) -> Result<(), HostError> {
        let mut state = self.state();
        let before = state.workers.len();
        state.workers.retain(|w| w.pid != pid);
        if state.workers.len() == before {
            return Err(HostError::ProcessNotFound(pid));
        }
        state.killed.push(pid);
        Ok(())
    }

    fn wait_for_exit(&self, pid: u32) -> Result<(), HostError> {
        if self.is_alive(pid)? {
            return Err(HostError::Backend(format!("process {pid} is still running")));
        }
        Ok(())
    }
}

/// Records access rules in memory. Directories must exist.
#[derive(Debug, Default)]
pub struct MockAccessControl {
    entries: Mutex<Vec<(PathBuf, AccessRule)>>,
    fail_grants: AtomicBool,
}

impl MockAccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<(PathBuf, AccessRule)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent grants fail.
    pub fn fail_grants(&self, fail: bool) {
        self.fail_grants.store(fail, Ordering::SeqCst);
    }

    pub fn rules_for(&self, dir: &Path) -> Vec<AccessRule> {
        self.entries()
            .iter()
            .filter(|(path, _)| path == dir)
            .map(|(_, rule)| rule.clone())
            .collect()
    }
}

impl AccessControl for MockAccessControl {
    fn grant(&self, dir: &Path, rule: &AccessRule) -> Result<(), HostError> {
        if self.fail_grants.load(Ordering::SeqCst) {
            return Err(HostError::Access {
                path: dir.display().to_string(),
                reason: "injected grant failure".to_owned(),
            });
        }
        if !dir.is_dir() {
            return Err(HostError::Access {
                path: dir.display().to_string(),
                reason: "no such directory".to_owned(),
            });
        }
        let mut entries = self.entries();
        entries.retain(|(path, r)| !(path == dir && r.principal == rule.principal));
        entries.push((dir.to_path_buf(), rule.clone()));
        Ok(())
    }

    fn revoke_all(&self, dir: &Path, principal: &AccountName) -> Result<(), HostError> {
        self.entries()
            .retain(|(path, r)| !(path == dir && r.principal == *principal));
        Ok(())
    }
}

/// Tracks open ports in memory.
#[derive(Debug, Default)]
pub struct MockFirewall {
    open: Mutex<BTreeMap<u16, String>>,
}

impl MockFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self) -> MutexGuard<'_, BTreeMap<u16, String>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self, port: u16) -> bool {
        self.open().contains_key(&port)
    }

    pub fn label(&self, port: u16) -> Option<String> {
        self.open().get(&port).cloned()
    }
}

impl Firewall for MockFirewall {
    fn open_port(&self, port: u16, label: &str) -> Result<(), HostError> {
        self.open().insert(port, label.to_owned());
        Ok(())
    }

    fn close_port(&self, port: u16) -> Result<(), HostError> {
        self.open().remove(&port);
        Ok(())
    }
}
