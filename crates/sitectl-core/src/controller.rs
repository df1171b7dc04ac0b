use crate::concurrency::{shutdown_requested, RegistryGuard, RegistryLock};
use crate::startup_log::StartupLog;
use crate::teardown::{kill_pool_processes, orphaned_units};
use crate::wait::{wait_for_state, WaitOutcome, WaitPolicy};
use crate::CoreError;
use sitectl_autowire::{AutowireReport, AutowireRequest, Autowirer};
use sitectl_host::{
    AccessControl, AccessRule, FileRights, Firewall, HostError, HostingBackend, HostingUnit,
    PoolIdentity, PoolSettings, ProcessControl, RegistrySession,
};
use sitectl_schema::{
    ApplicationDescriptor, ApplicationVariable, ControllerConfig, ObjectState, RuntimeVariant,
    ServiceBinding, Timeouts,
};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// The external collaborators a controller drives.
#[derive(Clone)]
pub struct HostServices {
    pub backend: Arc<dyn HostingBackend>,
    pub acl: Arc<dyn AccessControl>,
    pub firewall: Arc<dyn Firewall>,
    pub processes: Arc<dyn ProcessControl>,
}

/// How a stop request ended. Stop never fails on a slow unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyStopped,
    Stopped,
    /// The unit had not reached `Stopped` when the budget ran out.
    TimedOut,
}

impl StopOutcome {
    pub fn is_stopped(self) -> bool {
        !matches!(self, StopOutcome::TimedOut)
    }
}

type CancelFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Lifecycle controller for one deployed application.
///
/// Every registry-touching operation holds the registry lock for its whole
/// duration. Composite operations run their steps under the same guard.
pub struct Controller {
    host: HostServices,
    lock: Arc<RegistryLock>,
    timeouts: Timeouts,
    runtime_variant: Option<RuntimeVariant>,
    autowirer: Autowirer,
    descriptor: Option<ApplicationDescriptor>,
    startup_log: Option<StartupLog>,
    should_stop: CancelFn,
}

fn app_dir_rights() -> FileRights {
    FileRights::READ | FileRights::WRITE | FileRights::MODIFY | FileRights::DELETE
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Controller {
    pub fn new(host: HostServices, lock: Arc<RegistryLock>, config: &ControllerConfig) -> Self {
        Self {
            host,
            lock,
            timeouts: config.timeouts,
            runtime_variant: config.runtime_variant,
            autowirer: Autowirer::from_config(config),
            descriptor: None,
            startup_log: None,
            should_stop: Arc::new(shutdown_requested),
        }
    }

    /// Replace the cancellation hook consulted by every wait.
    #[must_use]
    pub fn with_cancel(mut self, should_stop: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.should_stop = Arc::new(should_stop);
        self
    }

    pub fn descriptor(&self) -> Option<&ApplicationDescriptor> {
        self.descriptor.as_ref()
    }

    fn configured(&self) -> Result<&ApplicationDescriptor, CoreError> {
        self.descriptor.as_ref().ok_or(CoreError::NotConfigured)
    }

    /// Run a setup step, recording it in the application's startup log
    /// when one is configured.
    fn logged<T>(
        &self,
        step: &str,
        op: impl FnOnce() -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        match &self.startup_log {
            Some(log) => log.scope(step, op),
            None => op(),
        }
    }

    fn cancelled(&self) -> bool {
        (self.should_stop)()
    }

    /// Wait for `unit` to reach `target`. Cancellation is an error.
    fn wait_unit(
        &self,
        session: &dyn RegistrySession,
        unit: &str,
        target: ObjectState,
        budget: Duration,
    ) -> Result<WaitOutcome, CoreError> {
        let policy = WaitPolicy::new(self.timeouts.poll_interval(), budget);
        let outcome = wait_for_state(|| session.unit_state(unit), target, policy, || self.cancelled())?;
        if outcome == WaitOutcome::Cancelled {
            return Err(CoreError::Cancelled);
        }
        Ok(outcome)
    }

    fn retry_transient<F>(&self, mut op: F) -> Result<(), CoreError>
    where
        F: FnMut() -> Result<(), HostError>,
    {
        loop {
            match op() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    if self.cancelled() {
                        return Err(CoreError::Cancelled);
                    }
                    debug!("retrying after transient failure: {e}");
                    thread::sleep(self.timeouts.delete_poll_interval());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Record the application and autowire its configuration.
    ///
    /// Returns `Ok(None)` when the application ships no configuration
    /// document.
    pub fn configure(
        &mut self,
        descriptor: ApplicationDescriptor,
        variables: &[ApplicationVariable],
        services: &[ServiceBinding],
        log_file: &Path,
        error_log_file: &Path,
    ) -> Result<Option<AutowireReport>, CoreError> {
        self.startup_log = descriptor
            .startup_log()
            .map(StartupLog::open)
            .transpose()
            .inspect_err(|e| error!("opening startup log for '{}' failed: {e}", descriptor.name()))?;
        self.descriptor = Some(descriptor);
        let descriptor = self.configured()?;

        self.logged("configure", || {
            info!(
                "configuring '{}' as unit {} from {}",
                descriptor.name(),
                descriptor.unit_name(),
                descriptor.path().display()
            );
            let request = AutowireRequest {
                app_dir: descriptor.path(),
                user: descriptor.user(),
                variables,
                services,
                log_file,
                error_log_file,
            };
            self.autowirer
                .autowire(&request, self.host.acl.as_ref())
                .map_err(CoreError::from)
        })
        .inspect_err(|e| error!("autowiring '{}' failed: {e}", descriptor.name()))
    }

    /// Runtime variant the application targets.
    pub fn detect_runtime_variant(&self) -> RuntimeVariant {
        let variant = self.runtime_variant.unwrap_or_default();
        debug!("runtime variant {variant}");
        variant
    }

    /// Register the hosting unit and its process pool, grant the execution
    /// identity access to the deployment directory, and open the port.
    ///
    /// A failure part way through leaves earlier steps in place.
    pub fn provision(&self, variant: RuntimeVariant) -> Result<(), CoreError> {
        let descriptor = self.configured()?;
        let guard = self.lock.acquire()?;
        self.logged("provision", || self.provision_locked(&guard, descriptor, variant))
            .inspect_err(|e| error!("provisioning '{}' failed: {e}", descriptor.name()))
    }

    fn provision_locked(
        &self,
        _guard: &RegistryGuard,
        descriptor: &ApplicationDescriptor,
        variant: RuntimeVariant,
    ) -> Result<(), CoreError> {
        let name: &str = descriptor.unit_name();
        info!("provisioning unit {name} on port {}", descriptor.port());

        let rule = AccessRule::inherited(descriptor.user().clone(), app_dir_rights());
        self.host.acl.grant(descriptor.path(), &rule)?;

        let mut session = self.host.backend.open_session()?;
        if session.unit(name)?.is_some() {
            debug!("unit {name} already registered, reusing it");
        } else {
            session.create_unit(name, descriptor.path(), descriptor.port())?;
        }
        session.set_autostart(name, false)?;

        if session.pool(name)?.is_none() {
            session.create_pool(name)?;
            let settings = PoolSettings {
                runtime_version: Some(variant.runtime_version().to_owned()),
                identity: PoolIdentity::SpecificUser {
                    user: descriptor.user().clone(),
                    password: descriptor.password().to_owned(),
                },
                enable_32bit: true,
            };
            session.configure_pool(name, &settings)?;
        } else {
            debug!("process pool {name} exists, reusing it");
        }
        session.bind_unit_to_pool(name, name)?;

        self.host.firewall.open_port(descriptor.port(), descriptor.name())?;
        session.commit()?;
        Ok(())
    }

    /// Bring the unit to `Started`. Returns immediately if it already is.
    pub fn start(&self) -> Result<(), CoreError> {
        let descriptor = self.configured()?;
        let guard = self.lock.acquire()?;
        self.logged("start", || self.start_locked(&guard, descriptor))
            .inspect_err(|e| error!("starting '{}' failed: {e}", descriptor.name()))
    }

    fn start_locked(
        &self,
        _guard: &RegistryGuard,
        descriptor: &ApplicationDescriptor,
    ) -> Result<(), CoreError> {
        let name: &str = descriptor.unit_name();
        let session = self.host.backend.open_session()?;
        let settle = self.timeouts.start_settle();

        // Let an in-flight transition finish first; a timeout here is fine.
        self.wait_unit(session.as_ref(), name, ObjectState::Stopped, settle)?;

        let mut state = session.unit_state(name)?;
        if state == ObjectState::Started {
            debug!("unit {name} already started");
            return Ok(());
        }
        if state == ObjectState::Stopping {
            self.wait_unit(session.as_ref(), name, ObjectState::Stopped, settle)?;
            state = session.unit_state(name)?;
        }
        if state != ObjectState::Starting {
            info!("starting unit {name}");
            session.start_unit(name)?;
        }

        let budget = self.timeouts.start();
        let outcome = self.wait_unit(session.as_ref(), name, ObjectState::Started, budget)?;
        if !outcome.reached() {
            return Err(CoreError::Timeout {
                unit: name.to_owned(),
                state: ObjectState::Started,
                waited_ms: millis(budget),
            });
        }
        info!("unit {name} started");
        Ok(())
    }

    /// Bring the unit to `Stopped`, tolerating a slow stop.
    pub fn stop(&self) -> Result<StopOutcome, CoreError> {
        let descriptor = self.configured()?;
        let guard = self.lock.acquire()?;
        self.stop_locked(&guard, descriptor)
            .inspect_err(|e| error!("stopping '{}' failed: {e}", descriptor.name()))
    }

    fn stop_locked(
        &self,
        _guard: &RegistryGuard,
        descriptor: &ApplicationDescriptor,
    ) -> Result<StopOutcome, CoreError> {
        let name: &str = descriptor.unit_name();
        let session = self.host.backend.open_session()?;
        let budget = self.timeouts.stop();

        let state = session.unit_state(name)?;
        if state == ObjectState::Stopped {
            debug!("unit {name} already stopped");
            return Ok(StopOutcome::AlreadyStopped);
        }
        if matches!(state, ObjectState::Starting | ObjectState::Started) {
            self.wait_unit(session.as_ref(), name, ObjectState::Started, budget)?;
            info!("stopping unit {name}");
            session.stop_unit(name)?;
        }

        if let WaitOutcome::TimedOut(last) =
            self.wait_unit(session.as_ref(), name, ObjectState::Stopped, budget)?
        {
            let last = last.map_or_else(|| "unknown".to_owned(), |s| s.to_string());
            warn!(
                "unit {name} did not stop within {}ms (last state: {last})",
                millis(budget)
            );
            return Ok(StopOutcome::TimedOut);
        }
        Ok(StopOutcome::Stopped)
    }

    /// Stop the unit, then clean up every unit deployed under `root`, under
    /// one lock acquisition.
    pub fn stop_and_cleanup(&self, root: &Path) -> Result<(StopOutcome, Vec<String>), CoreError> {
        let descriptor = self.configured()?;
        let guard = self.lock.acquire()?;
        let outcome = self
            .stop_locked(&guard, descriptor)
            .inspect_err(|e| error!("stopping '{}' failed: {e}", descriptor.name()))?;
        let deleted = self
            .cleanup_locked(&guard, root)
            .inspect_err(|e| error!("cleanup of {} failed: {e}", root.display()))?;
        Ok((outcome, deleted))
    }

    /// Tear down the unit bound to `port` together with its process pool.
    pub fn delete(&self, port: u16) -> Result<(), CoreError> {
        let guard = self.lock.acquire()?;
        self.delete_locked(&guard, port)
            .inspect_err(|e| error!("deleting unit on port {port} failed: {e}"))
    }

    fn delete_locked(&self, guard: &RegistryGuard, port: u16) -> Result<(), CoreError> {
        let unit = self
            .host
            .backend
            .open_session()?
            .unit_by_port(port)?
            .ok_or(CoreError::NoUnitOnPort(port))?;
        self.delete_unit_locked(guard, &unit)
    }

    fn delete_policy(&self) -> WaitPolicy {
        WaitPolicy::new(
            self.timeouts.delete_poll_interval(),
            self.timeouts.delete_budget(),
        )
    }

    /// Stop `pool`, force-killing its workers if it does not stop in time,
    /// then remove it.
    fn teardown_pool(&self, pool: &str) -> Result<(), CoreError> {
        let mut session = self.host.backend.open_session()?;
        self.retry_transient(|| session.stop_pool(pool))?;
        let outcome = wait_for_state(
            || session.pool_state(pool),
            ObjectState::Stopped,
            self.delete_policy(),
            || self.cancelled(),
        )?;
        match outcome {
            WaitOutcome::Reached => {}
            WaitOutcome::TimedOut(_) => {
                warn!("process pool {pool} did not stop, killing its workers");
                kill_pool_processes(session.as_ref(), self.host.processes.as_ref(), pool)?;
            }
            WaitOutcome::Cancelled => return Err(CoreError::Cancelled),
        }
        session.remove_pool(pool)?;
        session.commit()?;
        Ok(())
    }

    fn delete_unit_locked(&self, _guard: &RegistryGuard, unit: &HostingUnit) -> Result<(), CoreError> {
        let name = unit.name.as_str();
        info!("deleting unit {name} (port {})", unit.port);

        let pool = {
            let mut session = self.host.backend.open_session()?;
            self.retry_transient(|| session.stop_unit(name))?;
            let outcome = wait_for_state(
                || session.unit_state(name),
                ObjectState::Stopped,
                self.delete_policy(),
                || self.cancelled(),
            )?;
            match outcome {
                WaitOutcome::Reached => {}
                WaitOutcome::TimedOut(_) => {
                    warn!("unit {name} did not stop, killing its workers");
                    if let Some(pool) = &unit.pool_name {
                        kill_pool_processes(session.as_ref(), self.host.processes.as_ref(), pool)?;
                    }
                }
                WaitOutcome::Cancelled => return Err(CoreError::Cancelled),
            }

            let pool = match &unit.pool_name {
                Some(pool) => session.pool(pool)?,
                None => None,
            };
            session.remove_unit(name)?;
            session.commit()?;
            pool
        };
        self.host.firewall.close_port(unit.port)?;

        let Some(pool) = pool else {
            return Ok(());
        };
        self.teardown_pool(&pool.name)?;

        if let Some(account) = pool.settings.identity.account() {
            if unit.physical_path.exists() {
                self.host.acl.revoke_all(&unit.physical_path, account)?;
                debug!("revoked {account} on {}", unit.physical_path.display());
            }
        }
        Ok(())
    }

    /// Delete every unit whose deployment path is gone, is `root`, or lies
    /// below `root`. Returns the deleted unit names.
    pub fn cleanup(&self, root: &Path) -> Result<Vec<String>, CoreError> {
        let guard = self.lock.acquire()?;
        self.cleanup_locked(&guard, root)
            .inspect_err(|e| error!("cleanup of {} failed: {e}", root.display()))
    }

    fn cleanup_locked(&self, guard: &RegistryGuard, root: &Path) -> Result<Vec<String>, CoreError> {
        let units = self.host.backend.open_session()?.units()?;
        let mut deleted = Vec::new();
        for unit in orphaned_units(&units, root) {
            self.delete_unit_locked(guard, unit)?;
            deleted.push(unit.name.clone());
        }
        if !deleted.is_empty() {
            info!("cleaned up {} unit(s) under {}", deleted.len(), root.display());
        }
        Ok(deleted)
    }

    /// Pid of the first worker serving the unit, if any.
    pub fn query_process_id(&self) -> Result<Option<u32>, CoreError> {
        let descriptor = self.configured()?;
        let _guard = self.lock.acquire()?;
        let session = self.host.backend.open_session()?;
        let Some(unit) = session.unit(descriptor.unit_name())? else {
            return Ok(None);
        };
        let Some(pool) = unit.pool_name else {
            return Ok(None);
        };
        Ok(session.pool_workers(&pool)?.first().map(|w| w.pid))
    }

    /// Force-kill every worker of the unit's pool without a graceful stop.
    pub fn kill(&self) -> Result<Vec<u32>, CoreError> {
        let descriptor = self.configured()?;
        let _guard = self.lock.acquire()?;
        let name: &str = descriptor.unit_name();
        let session = self.host.backend.open_session()?;
        let pool = session
            .unit(name)?
            .and_then(|u| u.pool_name)
            .unwrap_or_else(|| name.to_owned());
        let killed = kill_pool_processes(session.as_ref(), self.host.processes.as_ref(), &pool)
            .inspect_err(|e| error!("killing '{}' failed: {e}", descriptor.name()))?;
        info!("killed {} worker(s) of {name}", killed.len());
        Ok(killed)
    }
}
